//! Brand config with an offline mirror in the durable store.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::net::{Network, NetworkRequest};
use crate::store::{DurableStore, DurableStoreExt, StoreKey};

/// Loads the brand config document, falling back to the last good copy.
pub struct BrandConfig {
  network: Arc<dyn Network>,
  store: Arc<dyn DurableStore>,
  url: Url,
}

impl BrandConfig {
  pub fn new(network: Arc<dyn Network>, store: Arc<dyn DurableStore>, url: Url) -> Self {
    Self {
      network,
      store,
      url,
    }
  }

  /// Fetch the document and mirror it; when that fails, return the mirror.
  ///
  /// Never fails: with neither network nor mirror, returns an empty array.
  pub async fn load(&self) -> Value {
    match self.fetch().await {
      Some(doc) => {
        if let Err(e) = self.store.write_json(StoreKey::BrandConfig, &doc) {
          warn!(error = %e, "failed to mirror brand config");
        }
        doc
      }
      None => self.mirrored(),
    }
  }

  async fn fetch(&self) -> Option<Value> {
    let response = match self.network.fetch(NetworkRequest::get(self.url.clone())).await {
      Ok(response) if response.is_ok() => response,
      Ok(response) => {
        debug!(status = response.status, "brand config unavailable");
        return None;
      }
      Err(e) => {
        debug!(error = %e, "brand config fetch failed");
        return None;
      }
    };

    match response.json() {
      Ok(doc) => Some(doc),
      Err(e) => {
        warn!(error = %e, "brand config is not valid JSON");
        None
      }
    }
  }

  /// Last mirrored copy, or an empty array.
  pub fn mirrored(&self) -> Value {
    match self.store.read_json::<Option<Value>>(StoreKey::BrandConfig) {
      Ok(Some(doc)) => doc,
      Ok(None) => Value::Array(Vec::new()),
      Err(e) => {
        warn!(error = %e, "failed to read mirrored brand config");
        Value::Array(Vec::new())
      }
    }
  }
}
