//! Background image processing for imgpipe
//!
//! A [`JobQueue`] stores [`JobRecord`]s in a [`JobBackend`] and hands them to
//! workers under time-bounded [`Lease`]s. A [`WorkerPool`] runs N workers
//! that decode each record into a typed [`ImageJob`], run it against the blob
//! store, codec and metadata store, and report the outcome back to the queue
//! and to the owning user over the fanout bus.

pub mod backend;
pub mod clock;
pub mod codec;
pub mod error;
pub mod image_job;
pub mod job;
pub mod producer;
pub mod queue;
pub mod retry;
pub mod worker;

pub use backend::memory::InMemoryBackend;
pub use backend::JobBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::ImageRsCodec;
pub use error::{EnqueueError, JobError, Result};
pub use image_job::{
    CompositeParams, FormatParams, ImageJob, JobTarget, Operation, ResizeParams, RotateParams,
};
pub use job::{AckOutcome, FailOutcome, FailureKind, JobRecord, JobStatus, Lease};
pub use producer::ImageJobProducer;
pub use queue::JobQueue;
pub use retry::{BackoffPolicy, JobOptions, Retention};
pub use worker::{Processor, WorkerConfig, WorkerPool, WorkerPoolHandle};

#[cfg(feature = "redis")]
pub use backend::redis::RedisBackend;
