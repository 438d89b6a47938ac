//! Bounded in-memory buffer of the newest log lines.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Default ring capacity.
pub const DEFAULT_RING_CAPACITY: usize = 2000;

/// Fixed-capacity buffer; pushing into a full ring evicts the oldest line.
#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    lines: Mutex<VecDeque<Arc<str>>>,
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

impl LogRing {
    /// Creates a ring holding at most `capacity` lines (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, line: Arc<str>) {
        let mut lines = self.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The newest `limit` lines in emission order; `0` returns all.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Arc<str>> {
        let lines = self.lock();
        let skip = if limit == 0 {
            0
        } else {
            lines.len().saturating_sub(limit)
        };
        lines.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<str>>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let ring = LogRing::new(3);
        for i in 0..5 {
            ring.push(line(&i.to_string()));
        }
        assert_eq!(ring.len(), 3);
        let recent: Vec<String> = ring.recent(0).iter().map(|l| l.to_string()).collect();
        assert_eq!(recent, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_recent_limit_keeps_chronological_order() {
        let ring = LogRing::new(10);
        for i in 0..5 {
            ring.push(line(&i.to_string()));
        }
        let recent: Vec<String> = ring.recent(2).iter().map(|l| l.to_string()).collect();
        assert_eq!(recent, vec!["3", "4"]);
        assert_eq!(ring.recent(50).len(), 5);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let ring = LogRing::new(0);
        ring.push(line("a"));
        ring.push(line("b"));
        assert_eq!(ring.capacity(), 1);
        assert_eq!(ring.recent(0)[0].as_ref(), "b");
    }
}
