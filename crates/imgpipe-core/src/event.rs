//! The job-result event delivered to clients over the real-time channel.

use crate::id::ImageId;
use serde::{Deserialize, Serialize};

/// Event discriminator. Serialized as the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobResultKind {
    #[serde(rename = "job-result")]
    JobResult,
}

/// Outcome of a job, as seen by the owning user's clients.
///
/// The field set (`type`, `success`, `message`, `imageId`) is a wire contract
/// with the client and must stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResultEvent {
    #[serde(rename = "type")]
    pub kind: JobResultKind,
    pub success: bool,
    pub message: String,
    pub image_id: ImageId,
}

impl JobResultEvent {
    pub fn success(image_id: ImageId, message: impl Into<String>) -> Self {
        Self {
            kind: JobResultKind::JobResult,
            success: true,
            message: message.into(),
            image_id,
        }
    }

    pub fn failure(image_id: ImageId, message: impl Into<String>) -> Self {
        Self {
            kind: JobResultKind::JobResult,
            success: false,
            message: message.into(),
            image_id,
        }
    }
}
