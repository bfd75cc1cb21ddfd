use crate::error::Result;
use crate::job::{JobRecord, Lease};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

/// Backend storage for jobs.
///
/// Every state change keyed by a [`Lease`] must be atomic and fenced by the
/// lease token and its expiry: a call whose token no longer owns the job, or
/// whose lease ran out at or before `now`, returns `false` and leaves the
/// record untouched. The [`JobQueue`](crate::JobQueue)
/// decides between retrying and failing; backends only apply the decision.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Store a new waiting job
    async fn push(&self, job: JobRecord) -> Result<()>;

    /// Take back active jobs whose lease expired at or before `now`.
    ///
    /// Jobs with attempts left go back to waiting, eligible at once. The
    /// rest are failed and returned, each exactly once, so the caller can
    /// report them.
    async fn reclaim(&self, now: DateTime<Utc>) -> Result<Vec<JobRecord>>;

    /// Claim the oldest waiting job whose `run_at` has passed.
    ///
    /// The claimed job has its attempt count incremented.
    async fn lease(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease_for: Duration,
    ) -> Result<Option<Lease>>;

    /// Mark the leased job completed, discarding it if its retention says so
    async fn complete(&self, lease: &Lease, now: DateTime<Utc>) -> Result<bool>;

    /// Put the leased job back to waiting until `run_at`
    async fn retry(
        &self,
        lease: &Lease,
        error: &str,
        now: DateTime<Utc>,
        run_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mark the leased job failed and retain it
    async fn fail(&self, lease: &Lease, error: &str, now: DateTime<Utc>) -> Result<bool>;

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// Retained terminal failures, oldest first
    async fn failed(&self) -> Result<Vec<JobRecord>>;
}
