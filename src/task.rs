//! Periodic background jobs with an explicit cancel handle.
//!
//! The connectivity monitor and the action queue expose single-step
//! operations (`tick`, `drain`); this module is what runs them on an interval.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// A boxed future produced by a job on each run
type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A factory creating one run of the job
type JobFn = Box<dyn Fn() -> BoxFuture + Send + Sync>;

/// A job to run on a fixed period.
pub struct RepeatingTask {
  name: &'static str,
  period: Duration,
  job: JobFn,
}

impl RepeatingTask {
  /// Create a task that runs `job` every `period`.
  pub fn new<F, Fut>(name: &'static str, period: Duration, job: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    Self {
      name,
      period,
      job: Box::new(move || Box::pin(job())),
    }
  }

  /// Start running on the current tokio runtime.
  ///
  /// The first run happens immediately. A run is never interrupted by
  /// cancellation; the loop stops before the next one.
  pub fn spawn(self) -> TaskHandle {
    let cancel = Arc::new(Notify::new());
    let stop = Arc::clone(&cancel);
    let Self { name, period, job } = self;

    let join = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

      loop {
        tokio::select! {
          biased;
          _ = stop.notified() => break,
          _ = ticker.tick() => {
            debug!(task = name, "running periodic task");
            job().await;
          }
        }
      }

      debug!(task = name, "periodic task stopped");
    });

    TaskHandle { name, cancel, join }
  }
}

/// Handle to a spawned [`RepeatingTask`]. Dropping it leaves the task running.
pub struct TaskHandle {
  name: &'static str,
  cancel: Arc<Notify>,
  join: JoinHandle<()>,
}

impl TaskHandle {
  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Ask the task to stop after its current run, if any.
  pub fn cancel(&self) {
    self.cancel.notify_one();
  }

  /// Wait for the task loop to exit.
  pub async fn join(self) {
    let _ = self.join.await;
  }
}
