//! Proxy leases, providers and the rotating pool used by the fetch client.
//!
//! The fetch client only sees [`ProxyRotator`]; [`ProxyPool`] is the
//! implementation wired in by the supervisor when `enable_ip_proxy` is set.

mod pool;
mod provider;
mod types;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use pool::{DEFAULT_EXPIRY_BUFFER, DEFAULT_POOL_COUNT, ProxyPool};
pub use provider::{ProxyProvider, StaticProvider, build_provider, load_proxy_file, parse_proxy_list};
pub use types::{Proxy, ProxyError};

/// Proxy lease seam consumed by the fetch client.
#[async_trait]
pub trait ProxyRotator: Send + Sync {
    /// URL of the lease to use for the next attempt, or `None` for a direct
    /// connection.
    async fn current_proxy_url(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ProxyError>;

    /// Marks the current lease as burned.
    fn invalidate_current(&self);
}
