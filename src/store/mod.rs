//! Durable key/value store shared by the offline components.
//!
//! Values are opaque strings written wholesale. Each component owns its own
//! key, so a full-value overwrite never clobbers another component's state.

mod sqlite;

use color_eyre::Result;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

pub use sqlite::SqliteStore;

/// Keys used by the offline core. One key per owning component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
  /// Set once the liveness probe has ever succeeded (connectivity monitor)
  LivenessFlag,
  /// Pending actions, JSON array (action queue)
  ActionQueue,
  /// Last successfully fetched brand config (brand fallback)
  BrandConfig,
  /// Cache generation the proxy last activated (cache proxy)
  ProxyGeneration,
}

impl StoreKey {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::LivenessFlag => "portal.liveness_ok",
      Self::ActionQueue => "portal.download_queue",
      Self::BrandConfig => "portal.brands",
      Self::ProxyGeneration => "portal.proxy_generation",
    }
  }
}

/// Trait for durable store backends.
pub trait DurableStore: Send + Sync {
  /// Raw value stored under `key`, if any.
  fn get(&self, key: StoreKey) -> Result<Option<String>>;

  /// Replace the value stored under `key`.
  fn put(&self, key: StoreKey, value: &str) -> Result<()>;
}

/// Typed JSON access on top of any [`DurableStore`].
pub trait DurableStoreExt: DurableStore {
  /// Read and decode the value under `key`.
  ///
  /// A missing key or a value that doesn't decode yields `T::default()`.
  /// Only backend failures are returned as errors.
  fn read_json<T: DeserializeOwned + Default>(&self, key: StoreKey) -> Result<T> {
    let Some(raw) = self.get(key)? else {
      return Ok(T::default());
    };

    match serde_json::from_str(&raw) {
      Ok(value) => Ok(value),
      Err(e) => {
        warn!(key = key.as_str(), error = %e, "discarding corrupt store value");
        Ok(T::default())
      }
    }
  }

  /// Encode `value` as JSON and overwrite the value under `key`.
  fn write_json<T: Serialize + ?Sized>(&self, key: StoreKey, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    self.put(key, &raw)
  }
}

impl<S: DurableStore + ?Sized> DurableStoreExt for S {}
