//! Notification surface driven by the offline core.
//!
//! The core only calls into [`Notifier`]; rendering belongs to whoever hosts it.

use std::fmt;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Success,
  Warning,
  Error,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Severity::Success => write!(f, "success"),
      Severity::Warning => write!(f, "warning"),
      Severity::Error => write!(f, "error"),
    }
  }
}

/// UI side effects the core may trigger.
pub trait Notifier: Send + Sync {
  /// Show a short, self-dismissing message.
  fn show_transient_message(&self, text: &str, severity: Severity);

  /// Show or hide the persistent offline banner.
  fn set_offline_indicator(&self, offline: bool);
}

/// Notifier for headless hosts: every message becomes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn show_transient_message(&self, text: &str, severity: Severity) {
    match severity {
      Severity::Success => info!(%severity, "{}", text),
      Severity::Warning => warn!(%severity, "{}", text),
      Severity::Error => error!(%severity, "{}", text),
    }
  }

  fn set_offline_indicator(&self, offline: bool) {
    if offline {
      warn!("offline mode banner shown");
    } else {
      info!("offline mode banner hidden");
    }
  }
}
