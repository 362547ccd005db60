//! Job model and the storage interface shared by all backends.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cron::CronError;

/// Unique identifier for a job, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A registered job together with its scheduling state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub crontab: String,
    pub command: String,
    pub arguments: Vec<String>,
    pub timeout: Duration,
    pub next_execution_time: Option<DateTime<Utc>>,
    /// Lease bit; true between `lease_due` and `mark_done`.
    pub running: bool,
}

/// Parameters for registering a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub crontab: String,
    pub command: String,
    pub arguments: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found")]
    NotFound,

    #[error("job name {0:?} already exists")]
    DuplicateName(String),

    #[error("invalid crontab expression: {0}")]
    InvalidCrontab(#[from] CronError),

    #[error("store operation deadline exceeded")]
    Deadline,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable, concurrency-safe collection of jobs. Every operation is atomic
/// with respect to the others; two concurrent `lease_due` calls over the
/// same store return disjoint sets.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Register a job. Computes the initial `next_execution_time` from the
    /// crontab evaluated at wall-clock now.
    async fn create(&self, job: NewJob) -> StoreResult<JobId>;

    async fn get(&self, id: JobId) -> StoreResult<Job>;

    async fn get_by_name(&self, name: &str) -> StoreResult<Job>;

    /// Idempotent; deleting a missing id is not an error.
    async fn delete(&self, id: JobId) -> StoreResult<()>;

    /// Atomically select every job due at `now` that is not already
    /// running, set its lease bit, and return the leased snapshots.
    async fn lease_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<Job>>;

    /// Clear the lease bit and advance `next_execution_time` to the next
    /// crontab instant after now. The only transition that does either.
    async fn mark_done(&self, job: &Job) -> StoreResult<()>;

    /// Startup pass: clear all lease bits and recompute every
    /// `next_execution_time` from the current wall clock forward.
    async fn reset_and_reschedule(&self) -> StoreResult<()>;
}
