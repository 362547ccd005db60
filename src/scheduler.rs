//! Scheduling engine: the lease loop and supervised child execution.
//!
//! Each [`Scheduler`] polls the store on its own interval, leases every due
//! job in one atomic store call, and runs each as an independent task. A
//! supervised execution launches the job command as a child process bounded
//! by the job timeout and unconditionally marks the job done afterwards, so
//! the schedule advances whether the run succeeded, failed, or timed out.
//!
//! Several schedulers may run in one process, and several processes may
//! point at the same store; lease atomicity lives in the store, not here.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::store::{Job, JobStore};

pub struct Scheduler {
    store: Arc<dyn JobStore>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Run the lease loop until `cancel` fires, then wait for in-flight
    /// executions to finish. In-flight jobs are not aborted on
    /// cancellation; each is already bounded by its own timeout.
    pub async fn run(&self, cancel: CancellationToken) {
        let tracker = TaskTracker::new();
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            let due = match self.store.lease_due(Utc::now()).await {
                Ok(jobs) => jobs,
                Err(err) => {
                    // Next tick retries.
                    error!(?err, "failed leasing due jobs");
                    continue;
                }
            };

            for job in due {
                let store = Arc::clone(&self.store);
                tracker.spawn(async move {
                    let job_id = job.id;
                    let execution = std::panic::AssertUnwindSafe(execute_job(store, job));
                    if let Err(panic) = execution.catch_unwind().await {
                        error!(
                            job_id = %job_id,
                            panic = panic_message(&panic),
                            "panic in supervised execution"
                        );
                    }
                });
            }
        }

        tracker.close();
        tracker.wait().await;
        info!("scheduler stopped");
    }
}

/// Spawn a scheduler onto the runtime; the handle resolves once the lease
/// loop has stopped and every in-flight execution has returned.
pub fn spawn_scheduler(
    store: Arc<dyn JobStore>,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { Scheduler::new(store, poll_interval).run(cancel).await })
}

/// One supervised execution: run the command under its deadline, then mark
/// the job done regardless of the outcome.
async fn execute_job(store: Arc<dyn JobStore>, job: Job) {
    info!(job_id = %job.id, name = %job.name, command = %job.command, "executing job");

    run_command(&job).await;

    if let Err(err) = store.mark_done(&job).await {
        // Self-heals: the lease bit is cleared by the next startup reset.
        error!(job_id = %job.id, ?err, "failed marking job done");
    }
}

async fn run_command(job: &Job) {
    let mut command = Command::new(&job.command);
    command
        .args(&job.arguments)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(job_id = %job.id, command = %job.command, ?err, "failed spawning job command");
            return;
        }
    };

    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => {
                info!(job_id = %job.id, "job finished");
            }
            Ok(status) => {
                warn!(job_id = %job.id, %status, "job exited with failure");
            }
            Err(err) => {
                error!(job_id = %job.id, ?err, "failed waiting for job");
            }
        },
        _ = tokio::time::sleep(job.timeout) => {
            warn!(
                job_id = %job.id,
                timeout_secs = job.timeout.as_secs(),
                "job timed out, killing"
            );
            if let Err(err) = child.start_kill() {
                error!(job_id = %job.id, ?err, "failed killing timed out job");
            }
            // Reap; proceed even if the child lingers somehow.
            if let Err(err) = child.wait().await {
                error!(job_id = %job.id, ?err, "failed reaping timed out job");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
