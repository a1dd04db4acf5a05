use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::brand::BrandConfig;
use crate::config::Config;
use crate::db::Database;
use crate::monitor::{Connectivity, ConnectivityMonitor};
use crate::net::{HttpNetwork, Network, NetworkRequest, NetworkResponse};
use crate::notify::{Notifier, TracingNotifier};
use crate::proxy::{CacheProxy, ProxyLifecycle, ProxySettings, SqliteResponseCache};
use crate::queue::ActionQueue;
use crate::store::SqliteStore;

/// The offline core wired together over one database.
pub struct App {
  config: Config,
  proxy: CacheProxy<SqliteResponseCache>,
  monitor: Arc<ConnectivityMonitor>,
  queue: Arc<ActionQueue>,
  brands: BrandConfig,
}

impl App {
  /// Wire the core against the real server and the configured database.
  pub fn new(config: Config) -> Result<Self> {
    let db = Database::open(config.database.as_deref())?;
    let network = Arc::new(HttpNetwork::new()?);
    Self::with_parts(config, db, network, Arc::new(TracingNotifier))
  }

  pub fn with_parts(
    config: Config,
    db: Database,
    network: Arc<dyn Network>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    let store = Arc::new(SqliteStore::new(db.clone()));

    let proxy = CacheProxy::new(
      network.clone(),
      store.clone(),
      SqliteResponseCache::new(db),
      ProxySettings::from_config(&config)?,
    );
    let monitor = Arc::new(ConnectivityMonitor::new(
      network.clone(),
      store.clone(),
      notifier.clone(),
      Connectivity::new(),
      config.resolve(&config.monitor.health_path)?,
    ));
    let queue = Arc::new(ActionQueue::new(
      network.clone(),
      store.clone(),
      notifier,
      config.resolve(&config.queue.action_path)?,
    ));
    let brands = BrandConfig::new(network, store, config.resolve(&config.brand_config_path)?);

    Ok(Self {
      config,
      proxy,
      monitor,
      queue,
      brands,
    })
  }

  pub fn proxy(&self) -> &CacheProxy<SqliteResponseCache> {
    &self.proxy
  }

  pub fn monitor(&self) -> &ConnectivityMonitor {
    &self.monitor
  }

  pub fn queue(&self) -> &ActionQueue {
    &self.queue
  }

  pub fn brands(&self) -> &BrandConfig {
    &self.brands
  }

  /// Resume the previous activation, then install and activate the current
  /// generation. Returns whether the proxy controls requests afterwards.
  pub async fn start_proxy(&self) -> bool {
    if let Err(e) = self.proxy.resume() {
      warn!(error = %e, "failed to restore proxy activation");
    }

    if let Err(e) = self.proxy.on_install().await {
      if self.proxy.is_active() {
        warn!(error = %e, "proxy install failed, serving the previous cache");
      } else {
        warn!(error = %e, "proxy install failed, requests will bypass the cache");
      }
    } else if let Err(e) = self.proxy.on_activate().await {
      warn!(error = %e, "proxy activation failed");
    }

    self.proxy.is_active()
  }

  /// Resolve one GET through the proxy.
  pub async fn fetch(&self, path: &str, navigate: bool) -> Result<NetworkResponse> {
    let url = self.config.resolve(path)?;
    let request = if navigate {
      NetworkRequest::navigate(url)
    } else {
      NetworkRequest::get(url)
    };
    self.proxy.on_intercept(request).await
  }

  /// Run the monitor and the queue until Ctrl-C.
  pub async fn run(&self) -> Result<()> {
    self.start_proxy().await;
    self.brands.load().await;

    let monitor = self.monitor.schedule(self.config.monitor.probe_interval());
    let queue = self.queue.schedule(self.config.queue.drain_interval());
    info!(origin = %self.config.origin, "offline system initialized");

    let signal = tokio::signal::ctrl_c()
      .await
      .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e));

    for handle in [monitor, queue] {
      info!(task = handle.name(), "stopping");
      handle.cancel();
      handle.join().await;
    }

    signal
  }
}
