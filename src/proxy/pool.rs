//! Lease pool with expiry buffer, random rotation and invalidation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{Proxy, ProxyError, ProxyProvider, ProxyRotator};
use crate::crawler::unix_now;

/// Default number of leases requested per refill.
pub const DEFAULT_POOL_COUNT: usize = 2;

/// Default margin before expiry at which a lease is no longer handed out.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct PoolState {
    leases: Vec<Proxy>,
    current: Option<Proxy>,
}

/// Pool of proxy leases drawn from a [`ProxyProvider`].
///
/// Lease state sits behind a short synchronous lock so
/// [`invalidate_current`](Self::invalidate_current) never waits on provider
/// I/O; acquisitions are serialized by a separate async gate that is held
/// across the provider call.
pub struct ProxyPool {
    provider: Arc<dyn ProxyProvider>,
    count: usize,
    buffer: Duration,
    state: Mutex<PoolState>,
    acquire_gate: tokio::sync::Mutex<()>,
    invalidations: AtomicUsize,
}

impl std::fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyPool")
            .field("provider", &self.provider.name())
            .field("count", &self.count)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

impl ProxyPool {
    /// Creates a pool requesting `count` leases per refill.
    #[must_use]
    pub fn new(provider: Arc<dyn ProxyProvider>, count: usize, buffer: Duration) -> Self {
        Self {
            provider,
            count: count.max(1),
            buffer,
            state: Mutex::new(PoolState::default()),
            acquire_gate: tokio::sync::Mutex::new(()),
            invalidations: AtomicUsize::new(0),
        }
    }

    /// Returns the current lease, rotating to a new one when there is none
    /// or it is within the expiry buffer.
    ///
    /// # Errors
    ///
    /// [`ProxyError::Canceled`] when the token fires,
    /// [`ProxyError::NoProxyAvailable`] when a refill yields nothing usable,
    /// or the provider's own error.
    #[instrument(level = "debug", skip(self, cancel), fields(provider = self.provider.name()))]
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Proxy, ProxyError> {
        let _gate = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProxyError::Canceled),
            gate = self.acquire_gate.lock() => gate,
        };

        let needs_refill = {
            let mut state = self.lock_state();
            if let Some(current) = &state.current {
                if !current.is_expired(self.buffer) {
                    return Ok(current.clone());
                }
                debug!(ip = %current.ip, "current proxy within expiry buffer, rotating");
                state.current = None;
            }
            state.leases.retain(|p| !p.is_expired(self.buffer));
            state.leases.is_empty()
        };

        if needs_refill {
            let fresh = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ProxyError::Canceled),
                fresh = self.provider.get_proxies(cancel, self.count) => fresh?,
            };
            let now = unix_now();
            let usable: Vec<Proxy> = fresh
                .into_iter()
                .filter(|p| !p.is_expired_at(now, self.buffer))
                .collect();
            info!(count = usable.len(), "refilled proxy pool");
            self.lock_state().leases.extend(usable);
        }

        let mut state = self.lock_state();
        if state.leases.is_empty() {
            warn!("proxy provider returned no usable leases");
            return Err(ProxyError::NoProxyAvailable);
        }
        let index = rand::thread_rng().gen_range(0..state.leases.len());
        let lease = state.leases.swap_remove(index);
        debug!(ip = %lease.ip, port = lease.port, "proxy lease designated current");
        state.current = Some(lease.clone());
        Ok(lease)
    }

    /// Copy of the current lease.
    #[must_use]
    pub fn current(&self) -> Option<Proxy> {
        self.lock_state().current.clone()
    }

    /// Drops the current lease; the next acquire rotates.
    pub fn invalidate_current(&self) {
        let dropped = self.lock_state().current.take();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        if let Some(proxy) = dropped {
            info!(ip = %proxy.ip, port = proxy.port, "proxy lease invalidated");
        }
    }

    /// Number of invalidation calls so far.
    #[must_use]
    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Number of unused leases.
    #[must_use]
    pub fn available(&self) -> usize {
        self.lock_state().leases.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProxyRotator for ProxyPool {
    async fn current_proxy_url(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ProxyError> {
        self.acquire(cancel).await.map(|p| Some(p.url()))
    }

    fn invalidate_current(&self) {
        ProxyPool::invalidate_current(self);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::proxy::StaticProvider;

    fn pool_of(list: &str) -> ProxyPool {
        ProxyPool::new(
            Arc::new(StaticProvider::from_list(list).unwrap()),
            DEFAULT_POOL_COUNT,
            DEFAULT_EXPIRY_BUFFER,
        )
    }

    // ==================== Acquire Tests ====================

    #[tokio::test]
    async fn test_acquire_returns_same_current_lease() {
        let pool = pool_of("1.1.1.1:80,2.2.2.2:80");
        let token = CancellationToken::new();
        let first = pool.acquire(&token).await.unwrap();
        let second = pool.acquire(&token).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(pool.current(), Some(first));
    }

    #[tokio::test]
    async fn test_empty_provider_yields_no_proxy_available() {
        let pool = pool_of("");
        let token = CancellationToken::new();
        let err = pool.acquire(&token).await.unwrap_err();
        assert!(matches!(err, ProxyError::NoProxyAvailable));
        assert_eq!(err.to_string(), "no proxy available");
    }

    #[tokio::test]
    async fn test_cancelled_acquire() {
        let pool = pool_of("1.1.1.1:80");
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            pool.acquire(&token).await,
            Err(ProxyError::Canceled)
        ));
    }

    // ==================== Invalidation Tests ====================

    #[tokio::test]
    async fn test_invalidate_rotates_to_other_lease() {
        let pool = pool_of("1.1.1.1:80,2.2.2.2:80");
        let token = CancellationToken::new();
        let first = pool.acquire(&token).await.unwrap();
        pool.invalidate_current();
        assert!(pool.current().is_none());
        let second = pool.acquire(&token).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(pool.invalidation_count(), 1);
    }
}
