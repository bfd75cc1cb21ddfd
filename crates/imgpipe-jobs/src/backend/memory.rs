use super::JobBackend;
use crate::error::{JobError, Result};
use crate::job::{JobRecord, JobStatus, Lease};
use crate::retry::Retention;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const LEASE_EXPIRED: &str = "Lease expired before the job finished";

#[derive(Debug)]
struct LeaseSlot {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<String, JobRecord>,
    /// Ordered by eligibility time, then insertion order
    waiting: BTreeSet<(DateTime<Utc>, u64, String)>,
    leases: HashMap<String, LeaseSlot>,
    failed: Vec<String>,
    seq: u64,
}

impl State {
    fn enqueue_waiting(&mut self, id: String, run_at: DateTime<Utc>) {
        self.seq += 1;
        self.waiting.insert((run_at, self.seq, id));
    }

    /// The lease still holds the job and has not run out at `now`
    fn owns(&self, lease: &Lease, now: DateTime<Utc>) -> bool {
        self.leases
            .get(&lease.job.id)
            .map(|slot| slot.token == lease.token && slot.expires_at > now)
            .unwrap_or(false)
    }

    fn reclaim_expired(&mut self, now: DateTime<Utc>) -> Vec<JobRecord> {
        let expired: Vec<String> = self
            .leases
            .iter()
            .filter(|(_, slot)| slot.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut failed = Vec::new();
        for id in expired {
            self.leases.remove(&id);
            let Some(job) = self.jobs.get_mut(&id) else {
                continue;
            };
            job.last_error = Some(LEASE_EXPIRED.to_string());

            if job.attempts_exhausted() {
                job.status = JobStatus::Failed;
                job.finished_at = Some(now);
                failed.push(job.clone());
                self.failed.push(id.clone());
                tracing::warn!(job_id = %id, "Lease expired on final attempt, job failed");
            } else {
                job.status = JobStatus::Waiting;
                job.run_at = now;
                self.enqueue_waiting(id.clone(), now);
                tracing::warn!(job_id = %id, "Lease expired, job requeued");
            }
        }
        failed
    }
}

/// In-memory job backend (not persistent, for testing/dev)
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| JobError::BackendError("Lock poisoned".to_string()))
    }

    /// Number of jobs waiting, eligible or not
    pub fn waiting_len(&self) -> usize {
        self.state().map(|s| s.waiting.len()).unwrap_or(0)
    }

    /// Number of jobs currently leased
    pub fn active_len(&self) -> usize {
        self.state().map(|s| s.leases.len()).unwrap_or(0)
    }
}

#[async_trait]
impl JobBackend for InMemoryBackend {
    async fn push(&self, job: JobRecord) -> Result<()> {
        let mut state = self.state()?;
        let (id, run_at) = (job.id.clone(), job.run_at);
        state.jobs.insert(id.clone(), job);
        state.enqueue_waiting(id, run_at);
        Ok(())
    }

    async fn lease(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_for: Duration,
    ) -> Result<Option<Lease>> {
        let mut state = self.state()?;
        let Some(entry) = state.waiting.iter().next().cloned() else {
            return Ok(None);
        };
        if entry.0 > now {
            return Ok(None);
        }
        state.waiting.remove(&entry);
        let id = entry.2;

        let expires_at = now
            + chrono::Duration::from_std(lease_for)
                .map_err(|e| JobError::ConfigError(e.to_string()))?;
        let token = uuid::Uuid::new_v4().to_string();

        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.attempts += 1;
        job.status = JobStatus::Active;
        let job = job.clone();

        state.leases.insert(
            id,
            LeaseSlot {
                token: token.clone(),
                expires_at,
            },
        );

        Ok(Some(Lease {
            job,
            token,
            worker_id: worker_id.to_string(),
            expires_at,
        }))
    }

    async fn reclaim(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>> {
        Ok(self.state()?.reclaim_expired(now))
    }

    async fn complete(&self, lease: &Lease, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state()?;
        if !state.owns(lease, now) {
            return Ok(false);
        }
        let id = lease.job_id();
        state.leases.remove(id);

        let discard = state
            .jobs
            .get(id)
            .map(|job| job.retention == Retention::DiscardOnSuccess)
            .unwrap_or(true);
        if discard {
            state.jobs.remove(id);
        } else if let Some(job) = state.jobs.get_mut(id) {
            job.status = JobStatus::Completed;
            job.finished_at = Some(now);
        }
        Ok(true)
    }

    async fn retry(
        &self,
        lease: &Lease,
        error: &str,
        now: DateTime<Utc>,
        run_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state()?;
        if !state.owns(lease, now) {
            return Ok(false);
        }
        let id = lease.job_id().to_string();
        state.leases.remove(&id);

        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = JobStatus::Waiting;
            job.run_at = run_at;
            job.last_error = Some(error.to_string());
            state.enqueue_waiting(id, run_at);
        }
        Ok(true)
    }

    async fn fail(&self, lease: &Lease, error: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state()?;
        if !state.owns(lease, now) {
            return Ok(false);
        }
        let id = lease.job_id().to_string();
        state.leases.remove(&id);

        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = JobStatus::Failed;
            job.finished_at = Some(now);
            job.last_error = Some(error.to_string());
            state.failed.push(id);
        }
        Ok(true)
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.state()?.jobs.get(job_id).cloned())
    }

    async fn failed(&self) -> Result<Vec<JobRecord>> {
        let state = self.state()?;
        Ok(state
            .failed
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::JobOptions;

    fn job(now: DateTime<Utc>) -> JobRecord {
        JobRecord::new("image:flip", serde_json::json!({}), JobOptions::default(), now)
    }

    #[tokio::test]
    async fn test_future_jobs_are_not_leased() {
        let backend = InMemoryBackend::new();
        let now = Utc::now();
        let mut delayed = job(now);
        delayed.run_at = now + chrono::Duration::seconds(10);
        backend.push(delayed).await.unwrap();

        let lease_for = Duration::from_secs(30);
        assert!(backend.lease("w", now, lease_for).await.unwrap().is_none());

        let later = now + chrono::Duration::seconds(10);
        let lease = backend.lease("w", later, lease_for).await.unwrap().unwrap();
        assert_eq!(lease.attempt(), 1);
        assert_eq!(lease.job.status, JobStatus::Active);
    }

    #[tokio::test]
    async fn test_fifo_among_eligible_jobs() {
        let backend = InMemoryBackend::new();
        let now = Utc::now();
        let first = job(now);
        let second = job(now);
        let first_id = first.id.clone();
        backend.push(first).await.unwrap();
        backend.push(second).await.unwrap();

        let lease = backend
            .lease("w", now, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.job_id(), first_id);
        assert_eq!(backend.waiting_len(), 1);
        assert_eq!(backend.active_len(), 1);
    }

    #[tokio::test]
    async fn test_expired_final_attempt_fails() {
        let backend = InMemoryBackend::new();
        let now = Utc::now();
        let mut record = job(now);
        record.max_attempts = 1;
        let id = record.id.clone();
        backend.push(record).await.unwrap();

        let lease_for = Duration::from_secs(5);
        let lease = backend.lease("w1", now, lease_for).await.unwrap().unwrap();

        let later = now + chrono::Duration::seconds(6);
        let reclaimed = backend.reclaim(later).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, id);
        assert_eq!(reclaimed[0].status, JobStatus::Failed);

        // handed out exactly once
        assert!(backend.reclaim(later).await.unwrap().is_empty());
        assert!(backend.lease("w2", later, lease_for).await.unwrap().is_none());
        assert!(!backend.complete(&lease, later).await.unwrap());

        let stored = backend.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(backend.failed().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_requeued_job_is_not_reported_as_failed() {
        let backend = InMemoryBackend::new();
        let now = Utc::now();
        backend.push(job(now)).await.unwrap();

        let lease_for = Duration::from_secs(5);
        backend.lease("w1", now, lease_for).await.unwrap().unwrap();

        let later = now + chrono::Duration::seconds(5);
        assert!(backend.reclaim(later).await.unwrap().is_empty());
        let lease = backend.lease("w2", later, lease_for).await.unwrap().unwrap();
        assert_eq!(lease.attempt(), 2);
    }

    #[tokio::test]
    async fn test_expired_lease_cannot_commit_before_reclaim() {
        let backend = InMemoryBackend::new();
        let now = Utc::now();
        let record = job(now);
        let id = record.id.clone();
        backend.push(record).await.unwrap();

        let lease = backend
            .lease("w", now, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let late = now + chrono::Duration::seconds(40);
        assert!(!backend.complete(&lease, late).await.unwrap());
        assert!(!backend.fail(&lease, "late", late).await.unwrap());
        assert!(!backend.retry(&lease, "late", late, late).await.unwrap());

        let stored = backend.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Active);
        assert_eq!(backend.reclaim(late).await.unwrap().len(), 0);
        assert_eq!(backend.waiting_len(), 1);
    }
}
