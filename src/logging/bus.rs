//! Live fan-out of log lines to bounded subscriber channels.
//!
//! Publishing never blocks: a subscriber whose queue is full misses the line.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::mpsc;

/// Default per-subscriber queue size.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Default)]
struct BusInner {
    subscribers: RwLock<HashMap<u64, mpsc::Sender<Arc<str>>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Broadcast bus.
#[derive(Debug, Clone, Default)]
pub struct LogBus {
    inner: Arc<BusInner>,
}

/// Handle that removes its subscriber (closing the channel) on
/// [`cancel`](Self::cancel) or drop.
#[derive(Debug)]
pub struct LogSubscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl LogSubscription {
    /// Removes the subscriber. Idempotent.
    pub fn cancel(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl LogBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber with a queue of `buffer` lines (minimum 1).
    #[must_use]
    pub fn subscribe(&self, buffer: usize) -> (mpsc::Receiver<Arc<str>>, LogSubscription) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        (
            rx,
            LogSubscription {
                id,
                bus: Arc::downgrade(&self.inner),
            },
        )
    }

    /// Offers `line` to every subscriber without waiting.
    pub fn publish(&self, line: &Arc<str>) {
        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for tx in subscribers.values() {
            if tx.try_send(Arc::clone(line)).is_err() {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Lines not delivered because a queue was full or closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn line(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = LogBus::new();
        let (mut a, _sa) = bus.subscribe(4);
        let (mut b, _sb) = bus.subscribe(4);
        bus.publish(&line("x"));
        assert_eq!(a.recv().await.unwrap().as_ref(), "x");
        assert_eq!(b.recv().await.unwrap().as_ref(), "x");
    }

    #[tokio::test]
    async fn test_full_subscriber_drops() {
        let bus = LogBus::new();
        let (mut rx, _sub) = bus.subscribe(1);
        bus.publish(&line("1"));
        bus.publish(&line("2"));
        assert_eq!(bus.dropped(), 1);
        assert_eq!(rx.recv().await.unwrap().as_ref(), "1");
    }

    #[tokio::test]
    async fn test_cancel_closes_channel() {
        let bus = LogBus::new();
        let (mut rx, sub) = bus.subscribe(4);
        sub.cancel();
        sub.cancel();
        assert_eq!(bus.subscriber_count(), 0);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = LogBus::new();
        {
            let (_rx, _sub) = bus.subscribe(4);
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }
}
