//! Worker pool draining the image queue.

use crate::error::{JobError, Result};
use crate::image_job::{ImageJob, JobTarget};
use crate::job::{AckOutcome, FailOutcome, FailureKind, JobRecord, Lease};
use crate::queue::JobQueue;
use imgpipe_bus::FanoutBus;
use imgpipe_core::{
    BlobStore, CodecError, ImageCodec, ImageRecord, ImageStatus, ImageUpdate, JobResultEvent,
    MetadataStore, StoreError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Why one pipeline step failed, and whether retrying can help
#[derive(Debug)]
struct StepError {
    message: String,
    kind: FailureKind,
}

impl StepError {
    fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Retryable,
        }
    }

    fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Permanent,
        }
    }

    fn blob(step: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |e| Self::transient(format!("{step}: {e}"))
    }

    /// A vanished image record will not come back on retry
    fn metadata(e: StoreError) -> Self {
        let message = format!("update metadata: {e}");
        if e.is_not_found() {
            Self::permanent(message)
        } else {
            Self::transient(message)
        }
    }
}

impl From<CodecError> for StepError {
    fn from(e: CodecError) -> Self {
        if e.is_permanent() {
            Self::permanent(e.to_string())
        } else {
            Self::transient(e.to_string())
        }
    }
}

/// Runs single jobs end to end. Shared by every worker in a pool.
#[derive(Clone)]
pub struct Processor {
    queue: JobQueue,
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    codec: Arc<dyn ImageCodec>,
    bus: Arc<dyn FanoutBus>,
}

impl Processor {
    pub fn new(
        queue: JobQueue,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        codec: Arc<dyn ImageCodec>,
        bus: Arc<dyn FanoutBus>,
    ) -> Self {
        Self {
            queue,
            blobs,
            metadata,
            codec,
            bus,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Lease and run one job. Returns `false` when nothing was eligible.
    ///
    /// Expired leases are reclaimed first; jobs that died on their final
    /// attempt are reported to their owner like any other terminal failure.
    pub async fn process_one(&self, worker_id: &str) -> Result<bool> {
        for job in self.queue.reclaim_expired().await? {
            self.report_abandoned(&job).await;
        }

        let Some(lease) = self.queue.lease(worker_id).await? else {
            return Ok(false);
        };

        let job = match ImageJob::decode(&lease.job.kind, &lease.job.payload) {
            Ok(job) => job,
            Err(e) => {
                self.reject(&lease, e).await?;
                return Ok(true);
            }
        };

        match self.execute(&job).await {
            Ok(record) => self.succeed(&lease, &job, &record).await?,
            Err(e) => self.fail(&lease, &job, e).await?,
        }
        Ok(true)
    }

    /// fetch, transform, store, persist
    async fn execute(&self, job: &ImageJob) -> std::result::Result<ImageRecord, StepError> {
        let transform = job.transform()?;
        let target = &job.target;

        let source = self
            .blobs
            .get(&target.key)
            .await
            .map_err(StepError::blob("fetch source"))?;

        let codec = Arc::clone(&self.codec);
        let output = tokio::task::spawn_blocking(move || codec.apply(&source, &transform))
            .await
            .map_err(|e| StepError::transient(format!("codec task aborted: {e}")))??;

        let key = job.output_key(output.format);
        let size = output.bytes.len() as u64;
        self.blobs
            .put(&key, output.bytes, output.format.content_type())
            .await
            .map_err(StepError::blob("store result"))?;

        let update = ImageUpdate {
            key: Some(key),
            size: Some(size),
            width: Some(output.width),
            height: Some(output.height),
            format: Some(output.format),
            status: Some(ImageStatus::Processed),
        };
        self.metadata
            .update_image(&target.image_id, update)
            .await
            .map_err(StepError::metadata)
    }

    async fn succeed(&self, lease: &Lease, job: &ImageJob, record: &ImageRecord) -> Result<()> {
        match self.queue.ack(lease).await? {
            AckOutcome::Completed => {
                tracing::info!(
                    job_id = %lease.job_id(),
                    worker_id = %lease.worker_id,
                    attempt = lease.attempt(),
                    image_id = %record.id,
                    key = %record.key,
                    "Job completed"
                );
                let event = JobResultEvent::success(
                    job.target.image_id.clone(),
                    job.operation.success_message(),
                );
                self.notify(&job.target, &event).await;
            }
            // Someone else owns the job now and will report it
            AckOutcome::Stale => {}
        }
        Ok(())
    }

    async fn fail(&self, lease: &Lease, job: &ImageJob, error: StepError) -> Result<()> {
        let outcome = self.queue.fail(lease, &error.message, error.kind).await?;
        match outcome {
            FailOutcome::Retrying { attempt, delay } => {
                tracing::warn!(
                    job_id = %lease.job_id(),
                    worker_id = %lease.worker_id,
                    attempt,
                    ?delay,
                    error = %error.message,
                    "Job attempt failed, will retry"
                );
            }
            FailOutcome::Failed { attempt } => {
                tracing::error!(
                    job_id = %lease.job_id(),
                    worker_id = %lease.worker_id,
                    attempt,
                    error = %error.message,
                    "Job failed"
                );
                self.mark_failed(&job.target).await;
                let event = JobResultEvent::failure(
                    job.target.image_id.clone(),
                    job.operation.failure_message(),
                );
                self.notify(&job.target, &event).await;
            }
            FailOutcome::Stale => {}
        }
        Ok(())
    }

    /// A record this build cannot decode is failed at once, without retry.
    async fn reject(&self, lease: &Lease, error: JobError) -> Result<()> {
        tracing::error!(
            job_id = %lease.job_id(),
            kind = %lease.job.kind,
            error = %error,
            "Unprocessable job"
        );
        let outcome = self
            .queue
            .fail(lease, &error.to_string(), FailureKind::Permanent)
            .await?;

        if outcome.is_terminal() {
            if let Some(target) = JobTarget::from_payload(&lease.job.payload) {
                self.mark_failed(&target).await;
                let event = JobResultEvent::failure(target.image_id.clone(), "Image processing failed");
                self.notify(&target, &event).await;
            }
        }
        Ok(())
    }

    async fn report_abandoned(&self, job: &JobRecord) {
        let (target, message) = match ImageJob::decode(&job.kind, &job.payload) {
            Ok(decoded) => (decoded.target, decoded.operation.failure_message()),
            Err(_) => match JobTarget::from_payload(&job.payload) {
                Some(target) => (target, "Image processing failed"),
                None => return,
            },
        };
        self.mark_failed(&target).await;
        let event = JobResultEvent::failure(target.image_id.clone(), message);
        self.notify(&target, &event).await;
    }

    async fn mark_failed(&self, target: &JobTarget) {
        if let Err(e) = self
            .metadata
            .update_image(&target.image_id, ImageUpdate::status(ImageStatus::Failed))
            .await
        {
            tracing::warn!(image_id = %target.image_id, error = %e, "Failed to mark image as failed");
        }
    }

    async fn notify(&self, target: &JobTarget, event: &JobResultEvent) {
        if let Err(e) = self.bus.publish_event(&target.user_id, event).await {
            tracing::warn!(user_id = %target.user_id, error = %e, "Failed to publish job result");
        }
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    pub concurrency: usize,
    /// Sleep between lease attempts when the queue is empty
    pub poll_interval: Duration,
    /// Prefix for worker ids, usually the host or process name
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            poll_interval: Duration::from_millis(100),
            name: "worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A fixed number of independent workers sharing one [`Processor`]
#[derive(Debug)]
pub struct WorkerPool {
    processor: Arc<Processor>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(processor: Processor, config: WorkerConfig) -> Self {
        Self {
            processor: Arc::new(processor),
            config,
        }
    }

    /// Start every worker. They run until the returned handle is shut down.
    pub fn spawn(self) -> WorkerPoolHandle {
        let cancel = CancellationToken::new();
        let handles = (0..self.config.concurrency)
            .map(|n| {
                let worker_id = format!("{}-{}", self.config.name, n + 1);
                tokio::spawn(run_worker(
                    Arc::clone(&self.processor),
                    worker_id,
                    self.config.poll_interval,
                    cancel.child_token(),
                ))
            })
            .collect();

        tracing::info!(concurrency = self.config.concurrency, "Worker pool started");
        WorkerPoolHandle { cancel, handles }
    }
}

/// Running pool
#[derive(Debug)]
pub struct WorkerPoolHandle {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Stop leasing new jobs and wait for the in-flight ones to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for result in futures_util::future::join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn run_worker(
    processor: Arc<Processor>,
    worker_id: String,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!(worker_id = %worker_id, "Worker started");

    while !cancel.is_cancelled() {
        let idle = match processor.process_one(&worker_id).await {
            Ok(true) => continue,
            Ok(false) => poll_interval,
            Err(e) => {
                tracing::error!(worker_id = %worker_id, error = %e, "Worker error");
                ERROR_BACKOFF
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(idle) => {}
        }
    }

    tracing::debug!(worker_id = %worker_id, "Worker stopped");
}
