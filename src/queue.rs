//! Durable action queue for download requests issued while the server is
//! unreachable.
//!
//! The whole queue lives under one store key and is always rewritten as a
//! unit. A drain replays entries oldest first and keeps only the ones that
//! didn't get a definitive answer, so closing the page mid-drain can cause a
//! repeat delivery but never loses a pending action.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::net::{Network, NetworkRequest};
use crate::notify::{Notifier, Severity};
use crate::store::{DurableStore, DurableStoreExt, StoreKey};
use crate::task::{RepeatingTask, TaskHandle};

const WAKING_MESSAGE: &str = "Server waking up — UI still works.";

/// A download request waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAction {
  /// Video URL to download
  pub url: String,
  /// Enqueue time, milliseconds since the epoch
  pub timestamp: i64,
}

impl QueuedAction {
  pub fn new(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      timestamp: Utc::now().timestamp_millis(),
    }
  }
}

/// Body of a delivery request.
#[derive(Debug, Serialize)]
struct FetchRequest<'a> {
  urls: [&'a str; 1],
}

/// Response body of the download endpoint.
#[derive(Debug, Deserialize)]
struct FetchResponse {
  success: bool,
  #[serde(default)]
  error: Option<String>,
  #[serde(default)]
  results: Vec<FetchResult>,
}

/// Per-URL result inside a [`FetchResponse`].
#[derive(Debug, Deserialize)]
struct FetchResult {
  success: bool,
  #[serde(default)]
  url: Option<String>,
  #[serde(default)]
  filename: Option<String>,
  #[serde(default)]
  size_mb: Option<f64>,
  #[serde(default)]
  download_url: Option<String>,
  #[serde(default)]
  error: Option<String>,
}

/// What one delivery attempt amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
  /// The server accepted the action
  Delivered,
  /// The server answered with a failure; retrying won't change it
  Rejected(String),
  /// No definitive answer (transport failure or non-OK status)
  Retry,
}

/// Counts from one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Another drain was already running, nothing was done
  pub skipped: bool,
  pub attempted: usize,
  pub delivered: usize,
  pub rejected: usize,
  pub requeued: usize,
}

/// Clears the in-flight flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

pub struct ActionQueue {
  network: Arc<dyn Network>,
  store: Arc<dyn DurableStore>,
  notifier: Arc<dyn Notifier>,
  action_url: Url,
  draining: AtomicBool,
  /// Serializes read-modify-write cycles on the persisted queue
  write_lock: Mutex<()>,
}

impl ActionQueue {
  pub fn new(
    network: Arc<dyn Network>,
    store: Arc<dyn DurableStore>,
    notifier: Arc<dyn Notifier>,
    action_url: Url,
  ) -> Self {
    Self {
      network,
      store,
      notifier,
      action_url,
      draining: AtomicBool::new(false),
      write_lock: Mutex::new(()),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, ()>> {
    self
      .write_lock
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn load(&self) -> Result<Vec<QueuedAction>> {
    self.store.read_json(StoreKey::ActionQueue)
  }

  fn save(&self, queue: &[QueuedAction]) -> Result<()> {
    self.store.write_json(StoreKey::ActionQueue, queue)
  }

  /// Everything currently persisted, oldest first.
  pub fn pending(&self) -> Result<Vec<QueuedAction>> {
    self.load()
  }

  /// Durably append a download request. Does not attempt delivery.
  pub fn enqueue(&self, url: &str) -> Result<QueuedAction> {
    let action = QueuedAction::new(url);

    let _lock = self.lock()?;
    let mut queue = self.load()?;
    queue.push(action.clone());
    self.save(&queue)?;

    info!(url, queued = queue.len(), "queued download");
    Ok(action)
  }

  /// Queue a download and try to deliver it right away.
  ///
  /// The action stays queued unless the server gives a definitive answer.
  pub async fn submit(&self, url: &str) -> Result<DeliveryOutcome> {
    let action = self.enqueue(url)?;
    let outcome = self.deliver(&action).await;

    match outcome {
      DeliveryOutcome::Retry => {
        self
          .notifier
          .show_transient_message(WAKING_MESSAGE, Severity::Warning);
      }
      DeliveryOutcome::Delivered | DeliveryOutcome::Rejected(_) => self.remove(&action)?,
    }

    Ok(outcome)
  }

  fn remove(&self, action: &QueuedAction) -> Result<()> {
    let _lock = self.lock()?;
    let mut queue = self.load()?;
    if let Some(pos) = queue.iter().position(|a| a == action) {
      queue.remove(pos);
      self.save(&queue)?;
    }
    Ok(())
  }

  /// Attempt delivery of one action against the download endpoint.
  pub async fn deliver(&self, action: &QueuedAction) -> DeliveryOutcome {
    let body = FetchRequest {
      urls: [action.url.as_str()],
    };
    let request = match NetworkRequest::post_json(self.action_url.clone(), &body) {
      Ok(request) => request,
      Err(e) => {
        warn!(url = %action.url, error = %e, "failed to build delivery request");
        return DeliveryOutcome::Retry;
      }
    };

    let response = match self.network.fetch(request).await {
      Ok(response) => response,
      Err(e) => {
        debug!(url = %action.url, error = %e, "delivery failed");
        return DeliveryOutcome::Retry;
      }
    };

    if !response.is_ok() {
      debug!(url = %action.url, status = response.status, "delivery not accepted");
      return DeliveryOutcome::Retry;
    }

    match response.json::<FetchResponse>() {
      Ok(body) if body.success => self.report_results(action, &body.results),
      Ok(body) => {
        let error = body.error.unwrap_or_else(|| "Download failed".to_string());
        self
          .notifier
          .show_transient_message(&format!("Error: {}", error), Severity::Error);
        DeliveryOutcome::Rejected(error)
      }
      Err(e) => {
        warn!(url = %action.url, error = %e, "unreadable delivery response, treating as delivered");
        DeliveryOutcome::Delivered
      }
    }
  }

  fn report_results(&self, action: &QueuedAction, results: &[FetchResult]) -> DeliveryOutcome {
    let mut outcome = DeliveryOutcome::Delivered;

    for result in results {
      if result.success {
        let filename = result.filename.as_deref().unwrap_or("video");
        let size = result
          .size_mb
          .map(|mb| format!(" ({:.2} MB)", mb))
          .unwrap_or_default();
        debug!(filename, download_url = ?result.download_url, "download ready");
        let message = format!("Downloaded {}{}", filename, size);
        self
          .notifier
          .show_transient_message(&message, Severity::Success);
      } else {
        let url = result.url.as_deref().unwrap_or(&action.url);
        let error = result.error.as_deref().unwrap_or("unknown error");
        let message = format!("Download failed for {}: {}", url, error);
        self
          .notifier
          .show_transient_message(&message, Severity::Error);
        outcome = DeliveryOutcome::Rejected(error.to_string());
      }
    }

    outcome
  }

  /// Replay every queued action once, oldest first, and persist the ones
  /// that need another attempt.
  ///
  /// A no-op while another drain is in flight.
  pub async fn drain(&self) -> DrainReport {
    let Some(_guard) = DrainGuard::acquire(&self.draining) else {
      debug!("drain already in flight");
      return DrainReport {
        skipped: true,
        ..DrainReport::default()
      };
    };

    let snapshot = match self.load() {
      Ok(queue) => queue,
      Err(e) => {
        warn!(error = %e, "failed to read action queue");
        return DrainReport::default();
      }
    };
    if snapshot.is_empty() {
      return DrainReport::default();
    }

    info!(count = snapshot.len(), "processing queued downloads");
    let mut report = DrainReport {
      attempted: snapshot.len(),
      ..DrainReport::default()
    };
    let mut remaining = Vec::new();

    for action in &snapshot {
      match self.deliver(action).await {
        DeliveryOutcome::Delivered => {
          report.delivered += 1;
          info!(url = %action.url, "delivered queued download");
        }
        DeliveryOutcome::Rejected(error) => {
          report.rejected += 1;
          info!(url = %action.url, %error, "queued download rejected by server");
        }
        DeliveryOutcome::Retry => {
          report.requeued += 1;
          info!(url = %action.url, "re-queuing failed download");
          remaining.push(action.clone());
        }
      }
    }

    if let Err(e) = self.persist_remaining(&snapshot, remaining) {
      warn!(error = %e, "failed to persist action queue after drain");
    }
    if report.requeued > 0 {
      info!(count = report.requeued, "downloads still queued");
    }

    report
  }

  /// Overwrite the queue with the undelivered entries, keeping anything
  /// enqueued after `snapshot` was taken.
  fn persist_remaining(
    &self,
    snapshot: &[QueuedAction],
    mut remaining: Vec<QueuedAction>,
  ) -> Result<()> {
    let _lock = self.lock()?;
    let current = self.load()?;
    remaining.extend(current.into_iter().filter(|a| !snapshot.contains(a)));
    self.save(&remaining)
  }

  /// Run [`drain`](Self::drain) every `period` until the handle is cancelled.
  pub fn schedule(self: &Arc<Self>, period: Duration) -> TaskHandle {
    let queue = Arc::clone(self);
    RepeatingTask::new("action-queue", period, move || {
      let queue = Arc::clone(&queue);
      async move {
        queue.drain().await;
      }
    })
    .spawn()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::net::{Method, NetworkResponse};
  use crate::store::SqliteStore;
  use crate::testing::{url, RecordingNotifier, ScriptedNetwork};
  use async_trait::async_trait;
  use std::sync::atomic::AtomicUsize;
  use tokio::sync::Notify;

  const ENDPOINT: &str = "/api/videos/fetch";
  const OK_BODY: &str = r#"{"success": true, "results": []}"#;

  struct Fixture {
    network: Arc<ScriptedNetwork>,
    store: Arc<SqliteStore>,
    notifier: Arc<RecordingNotifier>,
    queue: ActionQueue,
  }

  fn fixture() -> Fixture {
    let network = Arc::new(ScriptedNetwork::new());
    let store = Arc::new(SqliteStore::new(Database::open_in_memory().unwrap()));
    let notifier = Arc::new(RecordingNotifier::default());
    let queue = ActionQueue::new(network.clone(), store.clone(), notifier.clone(), url(ENDPOINT));
    Fixture {
      network,
      store,
      notifier,
      queue,
    }
  }

  fn urls(queue: &ActionQueue) -> Vec<String> {
    queue
      .pending()
      .unwrap()
      .into_iter()
      .map(|a| a.url)
      .collect()
  }

  #[test]
  fn test_enqueue_appends_in_order() {
    let f = fixture();
    f.queue.enqueue("https://youtu.be/a").unwrap();
    f.queue.enqueue("https://youtu.be/b").unwrap();
    assert_eq!(urls(&f.queue), vec!["https://youtu.be/a", "https://youtu.be/b"]);
  }

  #[test]
  fn test_persisted_format() {
    let f = fixture();
    let action = f.queue.enqueue("https://youtu.be/a").unwrap();
    let raw = f.store.get(StoreKey::ActionQueue).unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
      value,
      serde_json::json!([{ "url": "https://youtu.be/a", "timestamp": action.timestamp }])
    );
  }

  #[test]
  fn test_enqueue_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");
    let notifier = Arc::new(RecordingNotifier::default());

    {
      let store = Arc::new(SqliteStore::new(Database::open(Some(path.as_path())).unwrap()));
      let queue = ActionQueue::new(
        Arc::new(ScriptedNetwork::new()),
        store,
        notifier.clone(),
        url(ENDPOINT),
      );
      queue.enqueue("https://youtu.be/a").unwrap();
    }

    let store = Arc::new(SqliteStore::new(Database::open(Some(path.as_path())).unwrap()));
    let queue = ActionQueue::new(Arc::new(ScriptedNetwork::new()), store, notifier, url(ENDPOINT));
    assert_eq!(urls(&queue), vec!["https://youtu.be/a"]);
  }

  #[tokio::test]
  async fn test_drain_empty_is_noop() {
    let f = fixture();
    let report = f.queue.drain().await;

    assert_eq!(report, DrainReport::default());
    assert_eq!(f.network.call_count(), 0);
    assert_eq!(f.store.get(StoreKey::ActionQueue).unwrap(), None);
  }

  #[tokio::test]
  async fn test_drain_keeps_only_failures() {
    let f = fixture();
    f.network.respond(Method::POST, ENDPOINT, 200, OK_BODY);
    f.network.fail(Method::POST, ENDPOINT);
    f.network.respond(Method::POST, ENDPOINT, 200, OK_BODY);
    f.queue.enqueue("https://youtu.be/1").unwrap();
    let second = f.queue.enqueue("https://youtu.be/2").unwrap();
    f.queue.enqueue("https://youtu.be/3").unwrap();

    let report = f.queue.drain().await;

    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.requeued, 1);
    assert_eq!(f.queue.pending().unwrap(), vec![second]);

    f.queue.enqueue("https://youtu.be/4").unwrap();
    assert_eq!(urls(&f.queue), vec!["https://youtu.be/2", "https://youtu.be/4"]);
  }

  #[tokio::test]
  async fn test_drain_delivers_in_fifo_order() {
    let f = fixture();
    f.network.respond(Method::POST, ENDPOINT, 200, OK_BODY);
    f.queue.enqueue("https://youtu.be/1").unwrap();
    f.queue.enqueue("https://youtu.be/2").unwrap();

    f.queue.drain().await;

    let bodies: Vec<serde_json::Value> = f
      .network
      .calls()
      .iter()
      .map(|c| serde_json::from_slice(c.body.as_ref().unwrap()).unwrap())
      .collect();
    assert_eq!(
      bodies,
      vec![
        serde_json::json!({ "urls": ["https://youtu.be/1"] }),
        serde_json::json!({ "urls": ["https://youtu.be/2"] }),
      ]
    );
    assert!(f.queue.pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_non_ok_status_is_requeued() {
    let f = fixture();
    f.network.respond(Method::POST, ENDPOINT, 503, "sleeping");
    f.queue.enqueue("https://youtu.be/1").unwrap();

    let report = f.queue.drain().await;

    assert_eq!(report.requeued, 1);
    assert_eq!(urls(&f.queue), vec!["https://youtu.be/1"]);
  }

  #[tokio::test]
  async fn test_server_reported_failure_is_dropped() {
    let f = fixture();
    f.network.respond(
      Method::POST,
      ENDPOINT,
      200,
      r#"{"success": false, "error": "yt-dlp not installed"}"#,
    );
    f.queue.enqueue("https://youtu.be/1").unwrap();

    let report = f.queue.drain().await;

    assert_eq!(report.rejected, 1);
    assert!(f.queue.pending().unwrap().is_empty());
    assert_eq!(
      f.notifier.messages(Severity::Error),
      vec!["Error: yt-dlp not installed"]
    );
  }

  #[tokio::test]
  async fn test_per_url_failure_is_dropped() {
    let f = fixture();
    f.network.respond(
      Method::POST,
      ENDPOINT,
      200,
      r#"{"success": true, "results": [{"success": false, "url": "https://youtu.be/1", "error": "private video"}]}"#,
    );
    let action = f.queue.enqueue("https://youtu.be/1").unwrap();

    assert_eq!(
      f.queue.deliver(&action).await,
      DeliveryOutcome::Rejected("private video".to_string())
    );
    assert_eq!(
      f.notifier.messages(Severity::Error),
      vec!["Download failed for https://youtu.be/1: private video"]
    );
  }

  #[tokio::test]
  async fn test_success_results_are_reported() {
    let f = fixture();
    f.network.respond(
      Method::POST,
      ENDPOINT,
      200,
      r#"{"success": true, "results": [{"success": true, "filename": "clip.mp4", "size_mb": 12.5, "download_url": "/api/videos/download/clip.mp4"}]}"#,
    );
    let action = QueuedAction::new("https://youtu.be/1");

    assert_eq!(f.queue.deliver(&action).await, DeliveryOutcome::Delivered);
    assert_eq!(
      f.notifier.messages(Severity::Success),
      vec!["Downloaded clip.mp4 (12.50 MB)"]
    );
  }

  #[tokio::test]
  async fn test_unreadable_body_counts_as_delivered() {
    let f = fixture();
    f.network.respond(Method::POST, ENDPOINT, 200, "<html>ok</html>");
    let action = QueuedAction::new("https://youtu.be/1");

    assert_eq!(f.queue.deliver(&action).await, DeliveryOutcome::Delivered);
  }

  #[tokio::test]
  async fn test_corrupt_queue_treated_as_empty() {
    let f = fixture();
    f.store.put(StoreKey::ActionQueue, "not json").unwrap();

    assert_eq!(f.queue.drain().await, DrainReport::default());
    assert_eq!(f.network.call_count(), 0);

    f.queue.enqueue("https://youtu.be/1").unwrap();
    assert_eq!(urls(&f.queue), vec!["https://youtu.be/1"]);
  }

  #[tokio::test]
  async fn test_submit_delivered_leaves_queue_empty() {
    let f = fixture();
    f.network.respond(Method::POST, ENDPOINT, 200, OK_BODY);

    let outcome = f.queue.submit("https://youtu.be/1").await.unwrap();

    assert_eq!(outcome, DeliveryOutcome::Delivered);
    assert!(f.queue.pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_submit_rejected_removes_entry() {
    let f = fixture();
    f.network.respond(
      Method::POST,
      ENDPOINT,
      200,
      r#"{"success": false, "error": "Unsupported URL"}"#,
    );

    let outcome = f.queue.submit("https://example.com/not-a-video").await.unwrap();

    assert_eq!(outcome, DeliveryOutcome::Rejected("Unsupported URL".to_string()));
    assert!(f.queue.pending().unwrap().is_empty());
    assert_eq!(
      f.notifier.messages(Severity::Error),
      vec!["Error: Unsupported URL"]
    );
    assert!(f.notifier.messages(Severity::Warning).is_empty());
  }

  #[tokio::test]
  async fn test_submit_offline_keeps_action_queued() {
    let f = fixture();

    let outcome = f.queue.submit("https://youtu.be/1").await.unwrap();

    assert_eq!(outcome, DeliveryOutcome::Retry);
    assert_eq!(urls(&f.queue), vec!["https://youtu.be/1"]);
    assert_eq!(f.notifier.messages(Severity::Warning), vec![WAKING_MESSAGE]);
  }

  /// Network that holds every request until released.
  struct GatedNetwork {
    gate: Notify,
    calls: AtomicUsize,
  }

  #[async_trait]
  impl Network for GatedNetwork {
    async fn fetch(&self, _request: NetworkRequest) -> Result<NetworkResponse> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.gate.notified().await;
      Ok(NetworkResponse::new(200, OK_BODY))
    }
  }

  #[tokio::test]
  async fn test_overlapping_drain_is_skipped_and_new_entries_survive() {
    let network = Arc::new(GatedNetwork {
      gate: Notify::new(),
      calls: AtomicUsize::new(0),
    });
    let store = Arc::new(SqliteStore::new(Database::open_in_memory().unwrap()));
    let queue = Arc::new(ActionQueue::new(
      network.clone(),
      store,
      Arc::new(RecordingNotifier::default()),
      url(ENDPOINT),
    ));
    queue.enqueue("https://youtu.be/1").unwrap();

    let first = tokio::spawn({
      let queue = Arc::clone(&queue);
      async move { queue.drain().await }
    });
    while network.calls.load(Ordering::SeqCst) == 0 {
      tokio::task::yield_now().await;
    }

    let second = queue.drain().await;
    assert!(second.skipped);
    queue.enqueue("https://youtu.be/2").unwrap();

    network.gate.notify_one();
    let report = first.await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(network.calls.load(Ordering::SeqCst), 1);
    assert_eq!(urls(&queue), vec!["https://youtu.be/2"]);
  }
}
