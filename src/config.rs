use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL the portal is served from
  pub origin: String,
  /// Database file (defaults to $XDG_DATA_HOME/portal-offline/offline.db)
  pub database: Option<PathBuf>,
  pub proxy: ProxyConfig,
  pub monitor: MonitorConfig,
  pub queue: QueueConfig,
  /// Brand config document mirrored for offline use
  pub brand_config_path: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5000".to_string(),
      database: None,
      proxy: ProxyConfig::default(),
      monitor: MonitorConfig::default(),
      queue: QueueConfig::default(),
      brand_config_path: "/portal/static/watermarks/brands.json".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
  /// Route prefix served cache-first
  pub scope_prefix: String,
  /// Shell page for navigations that fail
  pub root_page: String,
  /// Bump to invalidate every previously cached response
  pub cache_generation: String,
  /// Assets cached at install time
  pub manifest: Vec<String>,
}

impl Default for ProxyConfig {
  fn default() -> Self {
    Self {
      scope_prefix: "/portal/".to_string(),
      root_page: "/portal/".to_string(),
      cache_generation: "wtf-portal-v1".to_string(),
      manifest: vec![
        "/portal/".to_string(),
        "/portal/static/manifest.json".to_string(),
        "/portal/static/watermarks/brands.json".to_string(),
        "/portal/static/js/offline.js".to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  pub health_path: String,
  pub probe_interval_secs: u64,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      health_path: "/portal/test".to_string(),
      probe_interval_secs: 5,
    }
  }
}

impl MonitorConfig {
  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs.max(1))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  pub action_path: String,
  pub drain_interval_secs: u64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      action_path: "/api/videos/fetch".to_string(),
      drain_interval_secs: 8,
    }
  }
}

impl QueueConfig {
  pub fn drain_interval(&self) -> Duration {
    Duration::from_secs(self.drain_interval_secs.max(1))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./portal-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/portal-offline/config.yaml
  ///
  /// Without any file, the built-in defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("portal-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("portal-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty document deserializes as null rather than an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    let config: Config = serde_yaml::from_str(contents)?;
    config.origin_url()?;
    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a portal path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.origin, "http://localhost:5000");
    assert_eq!(config.proxy.cache_generation, "wtf-portal-v1");
    assert_eq!(config.proxy.manifest.len(), 4);
    assert_eq!(config.monitor.probe_interval(), Duration::from_secs(5));
    assert_eq!(config.queue.drain_interval(), Duration::from_secs(8));
  }

  #[test]
  fn test_partial_sections_keep_defaults() {
    let config = Config::parse(
      "origin: https://wtf.example\nmonitor:\n  probe_interval_secs: 10\nproxy:\n  cache_generation: wtf-portal-v2\n",
    )
    .unwrap();
    assert_eq!(config.monitor.probe_interval_secs, 10);
    assert_eq!(config.monitor.health_path, "/portal/test");
    assert_eq!(config.proxy.cache_generation, "wtf-portal-v2");
    assert_eq!(config.proxy.scope_prefix, "/portal/");
  }

  #[test]
  fn test_resolve_against_origin() {
    let config = Config {
      origin: "https://wtf.example".to_string(),
      ..Config::default()
    };
    assert_eq!(
      config.resolve("/api/videos/fetch").unwrap().as_str(),
      "https://wtf.example/api/videos/fetch"
    );
  }

  #[test]
  fn test_invalid_origin_is_rejected() {
    assert!(Config::parse("origin: not a url\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/portal-offline.yaml"))).is_err());
  }
}
