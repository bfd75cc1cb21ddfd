//! Image codec seam.
//!
//! The pipeline treats pixel work as an opaque capability: it hands the codec
//! source bytes and a [`Transform`], and gets encoded bytes back.

use crate::image::ImageFormat;
use bytes::Bytes;
use thiserror::Error;

/// Failure reported by an [`ImageCodec`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// The requested transform can never succeed for these arguments
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Failed to decode source image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),
}

impl CodecError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameters(msg.into())
    }

    /// Whether retrying the same transform could ever succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidParameters(_))
    }
}

/// One step of a transform, applied in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformStep {
    Resize { width: u32, height: u32 },
    Rotate { degrees: f64 },
    /// Upside down (vertical axis)
    Flip,
    /// Left to right (horizontal axis)
    Mirror,
    Convert(ImageFormat),
}

/// An ordered list of steps to apply to a source image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transform {
    steps: Vec<TransformStep>,
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resize(mut self, width: u32, height: u32) -> Self {
        self.steps.push(TransformStep::Resize { width, height });
        self
    }

    pub fn rotate(mut self, degrees: f64) -> Self {
        self.steps.push(TransformStep::Rotate { degrees });
        self
    }

    pub fn flip(mut self) -> Self {
        self.steps.push(TransformStep::Flip);
        self
    }

    pub fn mirror(mut self) -> Self {
        self.steps.push(TransformStep::Mirror);
        self
    }

    pub fn convert(mut self, format: ImageFormat) -> Self {
        self.steps.push(TransformStep::Convert(format));
        self
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    /// Target format if the transform converts, otherwise `None`.
    pub fn target_format(&self) -> Option<ImageFormat> {
        self.steps.iter().rev().find_map(|s| match s {
            TransformStep::Convert(f) => Some(*f),
            _ => None,
        })
    }
}

/// Result of applying a [`Transform`].
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

/// A pixel transformation capability.
///
/// Implementations are synchronous and CPU bound; callers are expected to run
/// them off the async executor.
pub trait ImageCodec: Send + Sync {
    fn apply(&self, source: &[u8], transform: &Transform) -> Result<TransformOutput, CodecError>;
}
