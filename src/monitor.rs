//! Connectivity monitor: periodic liveness probe driving the shared
//! online/offline state and the offline banner.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::net::{Network, NetworkRequest};
use crate::notify::{Notifier, Severity};
use crate::store::{DurableStore, StoreKey};
use crate::task::{RepeatingTask, TaskHandle};

/// Value written under the liveness key after a successful probe.
const LIVENESS_OK: &str = "1";

const OFFLINE_MESSAGE: &str = "Portal is offline — continuing in local mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
  Online,
  Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivitySnapshot {
  pub state: ConnectivityState,
  /// When the last probe completed; `None` until the first one does
  pub last_checked: Option<DateTime<Utc>>,
}

/// Shared online/offline state. Cheap to clone; every clone sees the same value.
///
/// Only [`ConnectivityMonitor`] writes to it.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<ConnectivitySnapshot>>,
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new()
  }
}

impl Connectivity {
  /// Starts OFFLINE and unchecked.
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(ConnectivitySnapshot {
      state: ConnectivityState::Offline,
      last_checked: None,
    });
    Self { tx: Arc::new(tx) }
  }

  pub fn snapshot(&self) -> ConnectivitySnapshot {
    *self.tx.borrow()
  }

  pub fn state(&self) -> ConnectivityState {
    self.snapshot().state
  }

  pub fn is_online(&self) -> bool {
    self.state() == ConnectivityState::Online
  }

  /// Receive every update, including probes that didn't change the state.
  pub fn subscribe(&self) -> watch::Receiver<ConnectivitySnapshot> {
    self.tx.subscribe()
  }

  /// Record a probe result. Returns the new state when it should be announced:
  /// on the first probe, and afterwards only when the state flips.
  fn record(&self, probed: ConnectivityState) -> Option<ConnectivityState> {
    let mut transition = None;
    self.tx.send_modify(|snapshot| {
      if snapshot.last_checked.is_none() || snapshot.state != probed {
        transition = Some(probed);
      }
      snapshot.state = probed;
      snapshot.last_checked = Some(Utc::now());
    });
    transition
  }
}

/// Probes the health endpoint and keeps [`Connectivity`] current.
pub struct ConnectivityMonitor {
  network: Arc<dyn Network>,
  store: Arc<dyn DurableStore>,
  notifier: Arc<dyn Notifier>,
  connectivity: Connectivity,
  health_url: Url,
}

impl ConnectivityMonitor {
  pub fn new(
    network: Arc<dyn Network>,
    store: Arc<dyn DurableStore>,
    notifier: Arc<dyn Notifier>,
    connectivity: Connectivity,
    health_url: Url,
  ) -> Self {
    Self {
      network,
      store,
      notifier,
      connectivity,
      health_url,
    }
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  /// One liveness check.
  ///
  /// A failed check reports ONLINE anyway if a probe has ever succeeded,
  /// so a server that is merely slow to wake doesn't flip the UI.
  pub async fn probe(&self) -> ConnectivityState {
    let request = NetworkRequest::get(self.health_url.clone()).no_store();

    match self.network.fetch(request).await {
      Ok(response) if response.is_ok() => {
        if let Err(e) = self.store.put(StoreKey::LivenessFlag, LIVENESS_OK) {
          warn!(error = %e, "failed to persist liveness flag");
        }
        ConnectivityState::Online
      }
      Ok(response) => {
        debug!(status = response.status, "liveness probe rejected");
        self.last_known()
      }
      Err(e) => {
        debug!(error = %e, "liveness probe failed");
        self.last_known()
      }
    }
  }

  fn last_known(&self) -> ConnectivityState {
    match self.store.get(StoreKey::LivenessFlag) {
      Ok(Some(flag)) if flag == LIVENESS_OK => ConnectivityState::Online,
      Ok(_) => ConnectivityState::Offline,
      Err(e) => {
        warn!(error = %e, "failed to read liveness flag");
        ConnectivityState::Offline
      }
    }
  }

  /// Probe once and announce the result if the state changed.
  ///
  /// Returns the state that was announced, if any.
  pub async fn tick(&self) -> Option<ConnectivityState> {
    let probed = self.probe().await;
    let transition = self.connectivity.record(probed);

    match transition {
      Some(ConnectivityState::Offline) => {
        info!("portal entered offline mode");
        self.notifier.set_offline_indicator(true);
        self
          .notifier
          .show_transient_message(OFFLINE_MESSAGE, Severity::Warning);
      }
      Some(ConnectivityState::Online) => {
        info!("portal is online");
        self.notifier.set_offline_indicator(false);
      }
      None => {}
    }

    transition
  }

  /// Run [`tick`](Self::tick) every `period` until the handle is cancelled.
  pub fn schedule(self: &Arc<Self>, period: Duration) -> TaskHandle {
    let monitor = Arc::clone(self);
    RepeatingTask::new("connectivity-monitor", period, move || {
      let monitor = Arc::clone(&monitor);
      async move {
        monitor.tick().await;
      }
    })
    .spawn()
  }
}
