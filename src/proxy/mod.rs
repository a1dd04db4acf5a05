//! Request cache proxy.
//!
//! Sits between the portal's pages and the network:
//! - Portal-scoped GETs are served cache-first, falling back to the cached
//!   root page (navigations) or a synthesized 503 when the server is gone
//! - Other GETs go network-first with a cache fallback
//! - Anything that isn't a GET passes straight through
//!
//! The host drives it through [`ProxyLifecycle`].

mod cache;
mod interceptor;

use async_trait::async_trait;
use color_eyre::Result;

use crate::net::{NetworkRequest, NetworkResponse};

pub use cache::{CachedResponse, ResponseCache, SqliteResponseCache};
pub use interceptor::{CacheProxy, ProxySettings};

/// Hooks invoked by the host's request-interception mechanism.
#[async_trait]
pub trait ProxyLifecycle: Send + Sync {
  /// Populate the cache with the critical asset manifest.
  async fn on_install(&self) -> Result<()>;

  /// Drop stale cache generations and start intercepting.
  async fn on_activate(&self) -> Result<()>;

  /// Resolve one outgoing request.
  async fn on_intercept(&self, request: NetworkRequest) -> Result<NetworkResponse>;
}
