//! Image records as stored by the metadata store.

use crate::id::{ImageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Processing state of an image record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Uploaded, no transformation requested yet
    Uploaded,
    /// A transformation job has been accepted and not finished
    Processing,
    /// The latest transformation finished successfully
    Processed,
    /// The latest transformation failed terminally
    Failed,
}

/// Encodings the pipeline knows how to name, store and convert to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
    Bmp,
    Tiff,
}

impl ImageFormat {
    /// File extension used when deriving object keys.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a format name is not one of [`ImageFormat`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported image format: {0}")]
pub struct UnknownFormat(pub String);

impl FromStr for ImageFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            "gif" => Ok(Self::Gif),
            "bmp" => Ok(Self::Bmp),
            "tiff" | "tif" => Ok(Self::Tiff),
            other => Err(UnknownFormat(other.to_string())),
        }
    }
}

/// An image entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: ImageId,
    pub user_id: UserId,
    /// Blob store key of the current image bytes
    pub key: String,
    pub size: u64,
    pub original_name: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<ImageFormat>,
    pub status: ImageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn new(user_id: UserId, key: impl Into<String>, original_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ImageId::generate(),
            user_id,
            key: key.into(),
            size: 0,
            original_name: original_name.into(),
            width: None,
            height: None,
            format: None,
            status: ImageStatus::Uploaded,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: ImageId) -> Self {
        self.id = id;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// A partial update applied atomically to one image record.
///
/// Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUpdate {
    pub key: Option<String>,
    pub size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<ImageFormat>,
    pub status: Option<ImageStatus>,
}

impl ImageUpdate {
    pub fn status(status: ImageStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn apply_to(&self, record: &mut ImageRecord) {
        if let Some(key) = &self.key {
            record.key = key.clone();
        }
        if let Some(size) = self.size {
            record.size = size;
        }
        if let Some(width) = self.width {
            record.width = Some(width);
        }
        if let Some(height) = self.height {
            record.height = Some(height);
        }
        if let Some(format) = self.format {
            record.format = Some(format);
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        record.updated_at = Utc::now();
    }
}
