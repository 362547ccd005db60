//! In-memory job store.
//!
//! Mirrors the PostgreSQL semantics — including lease atomicity — without
//! requiring a database. Used by tests and local development; production
//! deployments want [`crate::db::Database`], which survives restarts.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cron::Crontab;
use crate::store::{Job, JobId, JobStore, NewJob, StoreError, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<i64, Job>,
    next_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn set_next_execution_time(&self, id: JobId, at: Option<DateTime<Utc>>) {
        let mut inner = self.inner.lock().expect("job map lock poisoned");
        if let Some(job) = inner.jobs.get_mut(&id.0) {
            job.next_execution_time = at;
        }
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: NewJob) -> StoreResult<JobId> {
        let crontab: Crontab = job.crontab.parse()?;
        let next_execution_time = crontab.next_after(Utc::now());

        let mut inner = self.inner.lock().expect("job map lock poisoned");
        if inner.jobs.values().any(|existing| existing.name == job.name) {
            return Err(StoreError::DuplicateName(job.name));
        }

        inner.next_id += 1;
        let id = JobId(inner.next_id);
        inner.jobs.insert(
            id.0,
            Job {
                id,
                name: job.name,
                crontab: job.crontab,
                command: job.command,
                arguments: job.arguments,
                timeout: job.timeout,
                next_execution_time,
                running: false,
            },
        );
        Ok(id)
    }

    async fn get(&self, id: JobId) -> StoreResult<Job> {
        let inner = self.inner.lock().expect("job map lock poisoned");
        inner.jobs.get(&id.0).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_by_name(&self, name: &str) -> StoreResult<Job> {
        let inner = self.inner.lock().expect("job map lock poisoned");
        inner
            .jobs
            .values()
            .find(|job| job.name == name)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: JobId) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("job map lock poisoned");
        inner.jobs.remove(&id.0);
        Ok(())
    }

    async fn lease_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let mut inner = self.inner.lock().expect("job map lock poisoned");
        let mut leased = Vec::new();
        for job in inner.jobs.values_mut() {
            let due = matches!(job.next_execution_time, Some(at) if at <= now);
            if due && !job.running {
                job.running = true;
                leased.push(job.clone());
            }
        }
        Ok(leased)
    }

    async fn mark_done(&self, job: &Job) -> StoreResult<()> {
        let crontab: Crontab = job.crontab.parse()?;
        let next_execution_time = crontab.next_after(Utc::now());

        let mut inner = self.inner.lock().expect("job map lock poisoned");
        if let Some(stored) = inner.jobs.get_mut(&job.id.0) {
            stored.running = false;
            stored.next_execution_time = next_execution_time;
        }
        Ok(())
    }

    async fn reset_and_reschedule(&self) -> StoreResult<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("job map lock poisoned");
        for job in inner.jobs.values_mut() {
            let crontab: Crontab = job.crontab.parse()?;
            job.running = false;
            job.next_execution_time = crontab.next_after(now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use std::time::Duration;

    fn new_job(name: &str) -> NewJob {
        NewJob {
            name: name.to_string(),
            crontab: "*/1 * * * *".to_string(),
            command: "/bin/true".to_string(),
            arguments: Vec::new(),
            timeout: Duration::from_secs(15),
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_name() {
        let store = MemoryStore::new();
        store.create(new_job("j1")).await.unwrap();
        let err = store.create(new_job("j1")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(name) if name == "j1"));
    }

    #[tokio::test]
    async fn create_rejects_invalid_crontab() {
        let store = MemoryStore::new();
        let mut job = new_job("j1");
        job.crontab = "not a cron".to_string();
        let err = store.create(job).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidCrontab(_)));
    }

    #[tokio::test]
    async fn get_by_id_and_name() {
        let store = MemoryStore::new();
        let id = store.create(new_job("j1")).await.unwrap();

        let by_id = store.get(id).await.unwrap();
        let by_name = store.get_by_name("j1").await.unwrap();
        assert_eq!(by_id, by_name);
        assert!(by_id.next_execution_time.is_some());
        assert!(!by_id.running);

        assert!(matches!(
            store.get(JobId(9999)).await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        let id = store.create(new_job("j1")).await.unwrap();
        store.delete(id).await.unwrap();
        store.delete(id).await.unwrap();
        assert!(matches!(
            store.get(id).await.unwrap_err(),
            StoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn lease_due_skips_running_and_future_jobs() {
        let store = MemoryStore::new();
        let due = store.create(new_job("due")).await.unwrap();
        let future = store.create(new_job("future")).await.unwrap();

        let now = Utc::now();
        store.set_next_execution_time(due, Some(now - ChronoDuration::minutes(1)));
        store.set_next_execution_time(future, Some(now + ChronoDuration::minutes(5)));

        let leased = store.lease_due(now).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].id, due);
        assert!(leased[0].running);

        // Leased job must not be returned again until mark_done.
        assert!(store.lease_due(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_leases_return_disjoint_sets() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for i in 0..10 {
            let id = store.create(new_job(&format!("job_{i}"))).await.unwrap();
            store.set_next_execution_time(id, Some(now - ChronoDuration::minutes(1)));
        }

        let (left, right) = tokio::join!(store.lease_due(now), store.lease_due(now));
        let left = left.unwrap();
        let right = right.unwrap();

        assert_eq!(left.len() + right.len(), 10);
        for job in &left {
            assert!(right.iter().all(|other| other.id != job.id));
        }
    }

    #[tokio::test]
    async fn mark_done_clears_lease_and_advances_schedule() {
        let store = MemoryStore::new();
        let id = store.create(new_job("j1")).await.unwrap();
        let now = Utc::now();
        store.set_next_execution_time(id, Some(now - ChronoDuration::minutes(1)));

        let leased = store.lease_due(now).await.unwrap();
        assert_eq!(leased.len(), 1);

        store.mark_done(&leased[0]).await.unwrap();

        let job = store.get(id).await.unwrap();
        assert!(!job.running);
        assert!(job.next_execution_time.expect("schedule advanced") > now);
    }

    #[tokio::test]
    async fn reset_clears_lease_bits_and_reschedules() {
        let store = MemoryStore::new();
        let stale = store.create(new_job("stale")).await.unwrap();
        let unset = store.create(new_job("unset")).await.unwrap();

        let now = Utc::now();
        store.set_next_execution_time(stale, Some(now - ChronoDuration::hours(2)));
        store.set_next_execution_time(unset, None);
        // Simulate a crash mid-execution.
        store.lease_due(now).await.unwrap();

        store.reset_and_reschedule().await.unwrap();

        for id in [stale, unset] {
            let job = store.get(id).await.unwrap();
            assert!(!job.running);
            assert!(job.next_execution_time.expect("rescheduled") > now);
        }
    }
}
