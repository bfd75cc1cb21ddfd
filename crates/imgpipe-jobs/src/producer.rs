use crate::error::EnqueueError;
use crate::image_job::{ImageJob, JobTarget, Operation};
use crate::queue::JobQueue;
use imgpipe_core::{ImageId, ImageStatus, ImageUpdate, MetadataStore, UserId};
use std::sync::Arc;

/// Request-facing side of the queue.
///
/// Checks preconditions, marks the image as processing and enqueues the
/// job. Completion is only observable later, through the job-result event
/// or the image status.
#[derive(Clone)]
pub struct ImageJobProducer {
    queue: JobQueue,
    metadata: Arc<dyn MetadataStore>,
}

impl ImageJobProducer {
    pub fn new(queue: JobQueue, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { queue, metadata }
    }

    /// Accept `operation` on `image_id` for `user_id` and return the job id
    pub async fn submit(
        &self,
        user_id: &UserId,
        image_id: &ImageId,
        operation: Operation,
    ) -> Result<String, EnqueueError> {
        operation
            .transform()
            .map_err(|e| EnqueueError::InvalidParameters(e.to_string()))?;

        let record = self
            .metadata
            .get_image(image_id)
            .await?
            .filter(|record| &record.user_id == user_id)
            .ok_or_else(|| EnqueueError::ImageNotFound(image_id.clone()))?;

        let job = ImageJob::new(
            JobTarget::new(record.key.clone(), image_id.clone(), user_id.clone()),
            operation,
        );

        // Status goes first so a fast worker cannot be overwritten by it
        self.metadata
            .update_image(image_id, ImageUpdate::status(ImageStatus::Processing))
            .await?;

        match self.queue.enqueue_job(&job).await {
            Ok(job_id) => {
                tracing::info!(
                    job_id = %job_id,
                    kind = job.kind(),
                    image_id = %image_id,
                    user_id = %user_id,
                    "Job accepted"
                );
                Ok(job_id)
            }
            Err(e) => {
                if let Err(revert) = self
                    .metadata
                    .update_image(image_id, ImageUpdate::status(record.status))
                    .await
                {
                    tracing::warn!(image_id = %image_id, error = %revert, "Failed to restore image status");
                }
                Err(e.into())
            }
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }
}

impl std::fmt::Debug for ImageJobProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageJobProducer")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
