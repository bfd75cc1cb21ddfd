use crate::backend::JobBackend;
use crate::clock::{Clock, SystemClock};
use crate::error::{JobError, Result};
use crate::image_job::ImageJob;
use crate::job::{AckOutcome, FailOutcome, FailureKind, JobRecord, Lease};
use crate::retry::JobOptions;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Main job queue manager
///
/// Owns the retry decision: backends only store what the queue tells them.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn JobBackend>,
    clock: Arc<dyn Clock>,
    options: JobOptions,
    lease_timeout: Duration,
}

impl JobQueue {
    /// Create a new job queue with a backend
    pub fn new<B: JobBackend + 'static>(backend: B) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn JobBackend>) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            options: JobOptions::default(),
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Options applied by [`JobQueue::enqueue`]
    pub fn default_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// How long a lease stays valid before the job is handed to another worker
    pub fn lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn options(&self) -> JobOptions {
        self.options
    }

    /// Enqueue a raw job
    pub async fn enqueue(&self, kind: &str, payload: serde_json::Value) -> Result<String> {
        self.enqueue_opts(kind, payload, self.options).await
    }

    /// Enqueue a raw job with options
    pub async fn enqueue_opts(
        &self,
        kind: &str,
        payload: serde_json::Value,
        opts: JobOptions,
    ) -> Result<String> {
        let record = JobRecord::new(kind, payload, opts, self.clock.now());
        let id = record.id.clone();

        self.backend.push(record).await?;
        tracing::debug!(job_id = %id, kind, "Job enqueued");
        Ok(id)
    }

    /// Enqueue a typed image job
    pub async fn enqueue_job(&self, job: &ImageJob) -> Result<String> {
        self.enqueue(job.kind(), job.payload()?).await
    }

    /// Take back jobs whose lease ran out.
    ///
    /// Returns the jobs that were on their final attempt and are now failed.
    /// Each is returned to exactly one caller, which owns reporting it.
    /// Workers call this before every [`JobQueue::lease`]; a job whose
    /// holder died is not handed out again until someone does.
    pub async fn reclaim_expired(&self) -> Result<Vec<JobRecord>> {
        let failed = self.backend.reclaim(self.clock.now()).await?;
        for job in &failed {
            tracing::warn!(job_id = %job.id, attempt = job.attempts, "Job failed after its lease expired");
        }
        Ok(failed)
    }

    /// Claim the next eligible job for `worker_id`, if any
    pub async fn lease(&self, worker_id: &str) -> Result<Option<Lease>> {
        let lease = self
            .backend
            .lease(worker_id, self.clock.now(), self.lease_timeout)
            .await?;

        if let Some(lease) = &lease {
            tracing::debug!(
                job_id = %lease.job_id(),
                worker_id,
                attempt = lease.attempt(),
                "Job leased"
            );
        }
        Ok(lease)
    }

    /// Commit a successful attempt
    pub async fn ack(&self, lease: &Lease) -> Result<AckOutcome> {
        if self.backend.complete(lease, self.clock.now()).await? {
            tracing::debug!(job_id = %lease.job_id(), "Job completed");
            Ok(AckOutcome::Completed)
        } else {
            tracing::warn!(job_id = %lease.job_id(), worker_id = %lease.worker_id, "Ack for expired lease ignored");
            Ok(AckOutcome::Stale)
        }
    }

    /// Release a failed attempt, scheduling a retry if the failure is
    /// retryable and attempts remain
    pub async fn fail(&self, lease: &Lease, error: &str, kind: FailureKind) -> Result<FailOutcome> {
        let job = &lease.job;
        let attempt = job.attempts;
        let now = self.clock.now();

        if kind == FailureKind::Retryable && !job.attempts_exhausted() {
            let delay = job.backoff.delay(attempt);
            let run_at = now
                + chrono::Duration::from_std(delay)
                    .map_err(|e| JobError::ConfigError(e.to_string()))?;

            if !self.backend.retry(lease, error, now, run_at).await? {
                tracing::warn!(job_id = %job.id, "Retry for expired lease ignored");
                return Ok(FailOutcome::Stale);
            }
            tracing::debug!(job_id = %job.id, attempt, ?delay, "Job scheduled for retry");
            return Ok(FailOutcome::Retrying { attempt, delay });
        }

        if !self.backend.fail(lease, error, now).await? {
            tracing::warn!(job_id = %job.id, "Failure for expired lease ignored");
            return Ok(FailOutcome::Stale);
        }
        tracing::debug!(job_id = %job.id, attempt, "Job failed permanently");
        Ok(FailOutcome::Failed { attempt })
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.backend.get(job_id).await
    }

    /// Retained terminal failures, oldest first
    pub async fn failed(&self) -> Result<Vec<JobRecord>> {
        self.backend.failed().await
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("clock", &self.clock)
            .field("options", &self.options)
            .field("lease_timeout", &self.lease_timeout)
            .finish_non_exhaustive()
    }
}
