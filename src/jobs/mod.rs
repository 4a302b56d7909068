//! Recurring job scheduler
//!
//! Each registered job gets its own interval timer. A tick that fires while the
//! previous run of the same job is still in flight is skipped, never queued.
//! Failures and panics are contained to the run that produced them.

mod server_count;

pub use server_count::UpdateServerCountJob;

use crate::error::ManagerError;
use crate::metrics::ManagerMetrics;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// A named recurring task
#[async_trait]
pub trait Job: Send + Sync {
    /// Unique name within the scheduler
    fn name(&self) -> &str;

    /// Time between runs
    fn interval(&self) -> Duration;

    /// Whether the first run happens immediately at start
    fn run_on_start(&self) -> bool {
        false
    }

    async fn run(&self) -> Result<(), ManagerError>;
}

/// Snapshot of a scheduled task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub name: String,
    pub interval_ms: u64,
    pub running: bool,
    pub runs: u64,
    pub skipped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Bookkeeping shared between a job's timer and its runs
struct TaskSlot {
    job: Arc<dyn Job>,
    running: AtomicBool,
    runs: AtomicU64,
    skipped: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl TaskSlot {
    fn snapshot(&self) -> ScheduledTask {
        ScheduledTask {
            name: self.job.name().to_string(),
            interval_ms: u64::try_from(self.job.interval().as_millis()).unwrap_or(u64::MAX),
            running: self.running.load(Ordering::SeqCst),
            runs: self.runs.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }

    fn record_failure(&self, reason: String) {
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = Some(reason);
        }
    }
}

/// Clears the running flag even when the run panics
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Scheduler over a fixed job registry
#[derive(Clone)]
pub struct JobScheduler {
    slots: Arc<Vec<Arc<TaskSlot>>>,
    metrics: Arc<ManagerMetrics>,
    shutdown_tx: broadcast::Sender<()>,
}

impl JobScheduler {
    /// Create a scheduler; jobs with a duplicate name are dropped
    pub fn new(jobs: Vec<Arc<dyn Job>>, metrics: Arc<ManagerMetrics>) -> Self {
        let mut slots: Vec<Arc<TaskSlot>> = Vec::with_capacity(jobs.len());

        for job in jobs {
            if slots.iter().any(|s| s.job.name() == job.name()) {
                warn!(job = job.name(), "Duplicate job name, ignoring registration");
                continue;
            }
            slots.push(Arc::new(TaskSlot {
                job,
                running: AtomicBool::new(false),
                runs: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                last_error: Mutex::new(None),
            }));
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            slots: Arc::new(slots),
            metrics,
            shutdown_tx,
        }
    }

    /// Start one timer per job
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        info!(jobs = self.slots.len(), "Starting job scheduler");

        self.slots
            .iter()
            .map(|slot| {
                let slot = Arc::clone(slot);
                let metrics = Arc::clone(&self.metrics);
                let mut shutdown_rx = self.shutdown_tx.subscribe();

                tokio::spawn(async move {
                    let period = slot.job.interval();
                    let start = if slot.job.run_on_start() {
                        tokio::time::Instant::now()
                    } else {
                        tokio::time::Instant::now() + period
                    };
                    let mut ticker = tokio::time::interval_at(start, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => tick(&slot, &metrics),
                            _ = shutdown_rx.recv() => {
                                debug!(job = slot.job.name(), "Job timer stopped");
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Stop all timers; runs already in flight finish on their own
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Snapshot of every registered task
    pub fn tasks(&self) -> Vec<ScheduledTask> {
        self.slots.iter().map(|s| s.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("jobs", &self.slots.iter().map(|s| s.job.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Handle one timer tick: start a run unless one is in flight
fn tick(slot: &Arc<TaskSlot>, metrics: &Arc<ManagerMetrics>) {
    let name = slot.job.name();

    if slot
        .running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!(job = name, "Previous run still in progress, skipping tick");
        slot.skipped.fetch_add(1, Ordering::SeqCst);
        metrics.record_job_skipped(name);
        return;
    }

    let slot = Arc::clone(slot);
    let metrics = Arc::clone(metrics);

    tokio::spawn(async move {
        let name = slot.job.name().to_string();

        let run = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                let _guard = RunGuard(&slot.running);
                slot.job.run().await
            })
        };

        let outcome = match run.await {
            Ok(result) => result,
            Err(join_error) => Err(ManagerError::JobFailed {
                job: name.clone(),
                reason: format!("run panicked: {join_error}"),
            }),
        };

        slot.runs.fetch_add(1, Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                debug!(job = %name, "Job run completed");
                metrics.record_job_run(&name, true);
            }
            Err(e) => {
                error!(job = %name, error = %e, "Job run failed");
                slot.record_failure(e.to_string());
                metrics.record_job_run(&name, false);
            }
        }
    });
}
