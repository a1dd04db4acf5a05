//! Cache proxy orchestrating the response cache and the network.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::cache::{CachedResponse, ResponseCache};
use super::ProxyLifecycle;
use crate::config::Config;
use crate::net::{Method, Network, NetworkRequest, NetworkResponse};
use crate::store::{DurableStore, StoreKey};

/// What the proxy needs to know about the portal it fronts.
#[derive(Debug, Clone)]
pub struct ProxySettings {
  /// Origin the portal is served from
  pub origin: Url,
  /// Path prefix of portal-owned routes (e.g. "/portal/")
  pub scope_prefix: String,
  /// Page served to navigations when the network is gone
  pub root_page: Url,
  /// Current cache generation name
  pub cache_generation: String,
  /// Assets cached at install time
  pub manifest: Vec<Url>,
}

impl ProxySettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    let origin = config.origin_url()?;
    let manifest = config
      .proxy
      .manifest
      .iter()
      .map(|path| config.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      root_page: config.resolve(&config.proxy.root_page)?,
      origin,
      scope_prefix: config.proxy.scope_prefix.clone(),
      cache_generation: config.proxy.cache_generation.clone(),
      manifest,
    })
  }

  /// Same origin and under the portal's route prefix.
  pub fn is_portal_scoped(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin() && url.path().starts_with(&self.scope_prefix)
  }
}

/// Cache-first/network-first request proxy.
pub struct CacheProxy<C: ResponseCache> {
  network: Arc<dyn Network>,
  store: Arc<dyn DurableStore>,
  cache: C,
  settings: ProxySettings,
  installed: AtomicBool,
  active: AtomicBool,
}

impl<C: ResponseCache> CacheProxy<C> {
  pub fn new(
    network: Arc<dyn Network>,
    store: Arc<dyn DurableStore>,
    cache: C,
    settings: ProxySettings,
  ) -> Self {
    Self {
      network,
      store,
      cache,
      settings,
      installed: AtomicBool::new(false),
      active: AtomicBool::new(false),
    }
  }

  /// Whether the proxy currently controls requests.
  pub fn is_active(&self) -> bool {
    self.active.load(Ordering::SeqCst)
  }

  /// Take control again if an earlier run activated a generation whose cache
  /// is still on disk. A later failed install leaves this in force.
  pub fn resume(&self) -> Result<bool> {
    let Some(generation) = self.store.get(StoreKey::ProxyGeneration)? else {
      return Ok(false);
    };

    if !self.cache.cache_names()?.contains(&generation) {
      debug!(generation = %generation, "activated generation has no cache, staying passive");
      return Ok(false);
    }

    self.active.store(true, Ordering::SeqCst);
    info!(generation = %generation, "proxy resumed previous activation");
    Ok(true)
  }

  /// Cache lookup across all generations. Storage errors count as a miss.
  fn lookup(&self, request_key: &str) -> Option<NetworkResponse> {
    match self
      .cache
      .get_any(request_key, &self.settings.cache_generation)
    {
      Ok(hit) => hit.map(|entry| entry.to_response()),
      Err(e) => {
        warn!(request = request_key, error = %e, "cache lookup failed");
        None
      }
    }
  }

  fn store(&self, entry: &CachedResponse) {
    if let Err(e) = self.cache.put(&self.settings.cache_generation, entry) {
      warn!(request = %entry.request_key, error = %e, "failed to cache response");
    }
  }

  /// Cached root page, used as the shell for failed navigations.
  fn cached_root_page(&self) -> Option<NetworkResponse> {
    self.lookup(&NetworkRequest::get(self.settings.root_page.clone()).cache_key())
  }

  async fn cache_first(&self, request: NetworkRequest) -> Result<NetworkResponse> {
    let key = request.cache_key();

    if let Some(hit) = self.lookup(&key) {
      debug!(request = %key, "cache hit");
      return Ok(hit);
    }

    let navigate = request.is_navigation();
    match self.network.fetch(request).await {
      Ok(response) => {
        if let Some(entry) = CachedResponse::from_response(key.as_str(), &response) {
          self.store(&entry);
        }
        Ok(response)
      }
      Err(e) => {
        warn!(request = %key, error = %e, "network failed for portal request");
        if navigate {
          if let Some(shell) = self.cached_root_page() {
            return Ok(shell);
          }
        }
        Ok(NetworkResponse::unavailable())
      }
    }
  }

  async fn network_first(&self, request: NetworkRequest) -> Result<NetworkResponse> {
    let key = request.cache_key();

    match self.network.fetch(request).await {
      Ok(response) => Ok(response),
      Err(e) => match self.lookup(&key) {
        Some(hit) => {
          debug!(request = %key, "network failed, serving cached copy");
          Ok(hit)
        }
        None => Err(e),
      },
    }
  }
}

#[async_trait]
impl<C: ResponseCache> ProxyLifecycle for CacheProxy<C> {
  async fn on_install(&self) -> Result<()> {
    let entries = try_join_all(self.settings.manifest.iter().map(|url| async move {
      let request = NetworkRequest::get(url.clone());
      let key = request.cache_key();
      let response = self.network.fetch(request).await?;

      CachedResponse::from_response(key, &response)
        .ok_or_else(|| eyre!("Failed to cache {}: status {}", url, response.status))
    }))
    .await?;

    self
      .cache
      .put_all(&self.settings.cache_generation, &entries)?;
    self.installed.store(true, Ordering::SeqCst);

    info!(
      generation = %self.settings.cache_generation,
      assets = entries.len(),
      "proxy installed"
    );
    Ok(())
  }

  async fn on_activate(&self) -> Result<()> {
    if !self.installed.load(Ordering::SeqCst) {
      return Err(eyre!("Cannot activate proxy before a successful install"));
    }

    for name in self.cache.cache_names()? {
      if name != self.settings.cache_generation {
        self.cache.delete_cache(&name)?;
        info!(cache = %name, "deleted stale cache generation");
      }
    }

    self
      .store
      .put(StoreKey::ProxyGeneration, &self.settings.cache_generation)?;
    self.active.store(true, Ordering::SeqCst);
    info!(generation = %self.settings.cache_generation, "proxy active");
    Ok(())
  }

  async fn on_intercept(&self, request: NetworkRequest) -> Result<NetworkResponse> {
    if request.method != Method::GET || !self.is_active() {
      return self.network.fetch(request).await;
    }

    if self.settings.is_portal_scoped(&request.url) {
      self.cache_first(request).await
    } else {
      self.network_first(request).await
    }
  }
}
