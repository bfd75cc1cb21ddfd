//! # imgpipe
//!
//! Asynchronous image processing with durable jobs and real-time result
//! delivery.
//!
//! A request handler hands an operation to the [`ImageJobProducer`], which
//! marks the image as processing and enqueues a job. Workers lease jobs from
//! the queue, transform the stored image, update its metadata and publish a
//! job-result event on the owning user's bus channel. Every process relays
//! those events to the WebSocket clients it holds for that user.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use imgpipe::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let settings = Settings::from_env()?;
//!     let pipeline = Pipeline::from_settings(settings)?;
//!     pipeline.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Optional Features
//!
//! - `redis` (default) - Redis-backed queue, bus and cache, selected at
//!   runtime by `IMGPIPE_REDIS_URL`

pub mod app;

pub use app::{AppError, Pipeline, PipelineBuilder};

pub use imgpipe_bus as bus;
pub use imgpipe_cache as cache;
pub use imgpipe_jobs as jobs;
pub use imgpipe_ws as ws;

pub use imgpipe_core::{config, telemetry, Environment, ImageId, Settings, UserId};

pub use imgpipe_jobs::{ImageJobProducer, Operation};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::app::{AppError, Pipeline};
    pub use imgpipe_bus::{FanoutBus, InMemoryBus};
    pub use imgpipe_cache::{Cache, CachedMetadataStore};
    pub use imgpipe_core::{
        BlobStore, Environment, ImageId, ImageRecord, ImageStatus, JobResultEvent, MetadataStore,
        Settings, UserId,
    };
    pub use imgpipe_jobs::{
        CompositeParams, FormatParams, ImageJobProducer, JobQueue, Operation, ResizeParams,
        RotateParams, WorkerConfig, WorkerPool,
    };
    pub use imgpipe_ws::{ConnectionRegistry, WsServer};
    pub use tokio_util::sync::CancellationToken;
}
