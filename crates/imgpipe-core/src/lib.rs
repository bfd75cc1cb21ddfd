//! # imgpipe-core
//!
//! Shared building blocks for the imgpipe processing pipeline.
//!
//! The pipeline talks to three collaborators it does not own:
//!
//! - a [`BlobStore`] holding source and derived image bytes,
//! - a [`MetadataStore`] holding image records,
//! - an [`ImageCodec`] performing the actual pixel transformations.
//!
//! This crate defines those seams, the records that flow through them, the
//! job-result event delivered to clients, and the ambient configuration and
//! telemetry setup used by the `imgpipe` binary.

pub mod blob;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod image;
pub mod metadata;
pub mod telemetry;

pub use blob::{BlobStore, FsBlobStore, InMemoryBlobStore};
pub use codec::{CodecError, ImageCodec, Transform, TransformOutput};
pub use config::{ConfigError, Environment, LogFormat, Settings};
pub use error::{Result, StoreError};
pub use event::{JobResultEvent, JobResultKind};
pub use id::{ImageId, UserId};
pub use image::{ImageFormat, ImageRecord, ImageStatus, ImageUpdate};
pub use metadata::{InMemoryMetadataStore, MetadataStore};

#[cfg(feature = "redis")]
pub use metadata::redis::RedisMetadataStore;
