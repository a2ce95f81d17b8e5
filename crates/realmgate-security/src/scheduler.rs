//! Recurring background jobs

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use realmgate_common::error::{Error, Result};

/// A job body. Returning `ControlFlow::Break` ends the schedule.
pub type Job = Box<dyn FnMut() -> ControlFlow<()> + Send + 'static>;

/// Runs named jobs on a fixed period
pub trait Scheduler: Send + Sync {
    fn schedule_recurring(
        &self,
        name: &str,
        initial_delay: Duration,
        period: Duration,
        job: Job,
    ) -> Result<JobHandle>;
}

/// Handle to a scheduled job.
///
/// Cancellation is observed between runs; a run in progress completes.
/// Runs execute on the blocking pool.
#[derive(Debug, Clone)]
pub struct JobHandle {
    name: String,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl JobHandle {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cancelled: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True once the job will never run again
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Scheduler backed by a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime of the calling task
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::Internal(format!("No tokio runtime available: {}", e)))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_recurring(
        &self,
        name: &str,
        initial_delay: Duration,
        period: Duration,
        mut job: Job,
    ) -> Result<JobHandle> {
        if period.is_zero() {
            return Err(Error::Validation(format!(
                "Job '{}' needs a positive period",
                name
            )));
        }

        let handle = JobHandle::new(name);
        let task = handle.clone();
        info!("Scheduling job '{}' every {:?}", name, period);

        self.handle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + initial_delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = task.wake.notified() => {}
                }

                if task.is_cancelled() {
                    debug!("Job '{}' cancelled", task.name);
                    break;
                }
                // job bodies do blocking file I/O
                let ran = tokio::task::spawn_blocking(move || {
                    let mut job = job;
                    let flow = job();
                    (job, flow)
                })
                .await;
                let flow = match ran {
                    Ok((returned, flow)) => {
                        job = returned;
                        flow
                    }
                    Err(e) => {
                        warn!("Job '{}' aborted: {}", task.name, e);
                        break;
                    }
                };
                if flow.is_break() {
                    debug!("Job '{}' stopped itself", task.name);
                    break;
                }
            }

            task.finished.store(true, Ordering::SeqCst);
        });

        Ok(handle)
    }
}
