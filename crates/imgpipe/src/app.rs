//! Process assembly: build every component from [`Settings`] and run them
//! until shutdown.

use imgpipe_bus::{BusError, FanoutBus, InMemoryBus};
use imgpipe_cache::{Cache, CacheError, CacheStore, CachedMetadataStore, InMemoryCacheStore};
use imgpipe_core::{
    BlobStore, ConfigError, FsBlobStore, InMemoryMetadataStore, MetadataStore, Settings,
};
use imgpipe_jobs::{
    ImageJobProducer, ImageRsCodec, InMemoryBackend, JobBackend, JobError, JobOptions, JobQueue,
    Processor, Retention, WorkerConfig, WorkerPool,
};
use imgpipe_ws::{spawn_bridge, ConnectionRegistry, JwtValidator, WsError, WsServer};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Key prefix of the shared metadata store
#[cfg(feature = "redis")]
const METADATA_PREFIX: &str = "imgpipe";

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Job queue error: {0}")]
    Jobs(#[from] JobError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Every long-lived component of one imgpipe process.
///
/// With a Redis URL configured the queue, bus, cache and metadata are shared
/// with other processes; without one everything lives in this process. Blobs
/// go to `blob_root` unless a store is supplied through [`Pipeline::builder`].
pub struct Pipeline {
    settings: Settings,
    worker_name: String,
    queue: JobQueue,
    producer: ImageJobProducer,
    processor: Processor,
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    bus: Arc<dyn FanoutBus>,
    registry: ConnectionRegistry,
}

impl Pipeline {
    /// Build a pipeline from configuration alone
    pub fn from_settings(settings: Settings) -> Result<Self, AppError> {
        Self::builder(settings).build()
    }

    /// Start a builder, to supply stores this process does not create itself
    pub fn builder(settings: Settings) -> PipelineBuilder {
        PipelineBuilder {
            settings,
            metadata: None,
            blobs: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Prefix of this process's worker ids, unique across processes
    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn producer(&self) -> &ImageJobProducer {
        &self.producer
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn bus(&self) -> &Arc<dyn FanoutBus> {
        &self.bus
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Run workers, the event bridge and the WebSocket server until
    /// `shutdown` fires or one of them fails.
    ///
    /// In-flight jobs are allowed to finish before this returns.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), AppError> {
        let secret = self.settings.jwt_secret.as_deref().ok_or_else(|| {
            ConfigError::Invalid("jwt_secret is required to authenticate clients".to_string())
        })?;
        let validator = Arc::new(JwtValidator::new(secret));

        let mut bridge =
            spawn_bridge(Arc::clone(&self.bus), self.registry.clone(), shutdown.clone()).await?;

        let config = WorkerConfig::new()
            .concurrency(self.settings.worker_concurrency)
            .poll_interval(self.settings.poll_interval())
            .name(self.worker_name.clone());
        let pool = WorkerPool::new(self.processor, config).spawn();

        let server = WsServer::new(self.registry.clone(), validator);
        let server = server.run(&self.settings.ws_bind, shutdown.clone());
        tokio::pin!(server);

        let (outcome, server_done) = tokio::select! {
            res = &mut server => (res.map_err(AppError::from), true),
            res = &mut bridge => {
                let res = match res {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) if e.is_fatal() => {
                        tracing::error!(error = %e, "Event delivery stopped. Manual intervention required.");
                        Err(AppError::from(e))
                    }
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Event bridge failed");
                        Err(AppError::from(e))
                    }
                    Err(e) => Err(AppError::Task(e.to_string())),
                };
                (res, false)
            }
        };

        shutdown.cancel();
        if server_done {
            if let Err(e) = bridge.await {
                tracing::warn!(error = %e, "Event bridge task failed");
            }
        } else if let Err(e) = server.await {
            tracing::warn!(error = %e, "WebSocket server stopped with an error");
        }
        pool.shutdown().await;

        outcome
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("worker_name", &self.worker_name)
            .field("queue", &self.queue)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Builds a [`Pipeline`], optionally around caller-supplied stores.
///
/// A supplied metadata store replaces the one picked by configuration and is
/// still read through the cache.
pub struct PipelineBuilder {
    settings: Settings,
    metadata: Option<Arc<dyn MetadataStore>>,
    blobs: Option<Arc<dyn BlobStore>>,
}

impl PipelineBuilder {
    pub fn metadata(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(store);
        self
    }

    pub fn blobs(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(store);
        self
    }

    pub fn build(self) -> Result<Pipeline, AppError> {
        let settings = self.settings;
        let backends = Backends::connect(&settings)?;

        let cache = Cache::from_arc(backends.cache).default_ttl(settings.cache_ttl());
        let records = self.metadata.unwrap_or(backends.metadata);
        let metadata: Arc<dyn MetadataStore> = Arc::new(CachedMetadataStore::new(records, cache));
        let blobs: Arc<dyn BlobStore> = match self.blobs {
            Some(blobs) => blobs,
            None => Arc::new(FsBlobStore::new(&settings.blob_root)),
        };

        let retention = if settings.retain_completed {
            Retention::Keep
        } else {
            Retention::DiscardOnSuccess
        };
        let queue = JobQueue::from_arc(backends.jobs)
            .default_options(JobOptions::new().retention(retention))
            .lease_timeout(settings.lease_timeout());

        let producer = ImageJobProducer::new(queue.clone(), Arc::clone(&metadata));
        let processor = Processor::new(
            queue.clone(),
            Arc::clone(&blobs),
            Arc::clone(&metadata),
            Arc::new(ImageRsCodec::new()),
            Arc::clone(&backends.bus),
        );
        let worker_name = worker_name(&settings.queue_name);
        tracing::debug!(worker_name = %worker_name, "Pipeline assembled");

        Ok(Pipeline {
            settings,
            worker_name,
            queue,
            producer,
            processor,
            metadata,
            blobs,
            bus: backends.bus,
            registry: ConnectionRegistry::new(),
        })
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("metadata", &self.metadata.is_some())
            .field("blobs", &self.blobs.is_some())
            .finish_non_exhaustive()
    }
}

/// `<queue>-<pid>-<random>`, so processes sharing a queue never reuse ids
fn worker_name(queue_name: &str) -> String {
    let instance = uuid::Uuid::new_v4().simple().to_string();
    format!("{queue_name}-{}-{}", std::process::id(), &instance[..8])
}

/// Shared-state backends picked by configuration
struct Backends {
    jobs: Arc<dyn JobBackend>,
    bus: Arc<dyn FanoutBus>,
    cache: Arc<dyn CacheStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl Backends {
    fn connect(settings: &Settings) -> Result<Self, AppError> {
        match settings.redis_url.as_deref() {
            Some(url) => Self::redis(url, &settings.queue_name),
            None => {
                tracing::info!("No Redis URL configured, running single-process");
                Ok(Self::in_memory())
            }
        }
    }

    fn in_memory() -> Self {
        Self {
            jobs: Arc::new(InMemoryBackend::new()),
            bus: Arc::new(InMemoryBus::new()),
            cache: Arc::new(InMemoryCacheStore::new()),
            metadata: Arc::new(InMemoryMetadataStore::new()),
        }
    }

    #[cfg(feature = "redis")]
    fn redis(url: &str, queue_name: &str) -> Result<Self, AppError> {
        tracing::info!(queue = queue_name, "Using Redis for queue, bus, cache and metadata");
        Ok(Self {
            jobs: Arc::new(imgpipe_jobs::RedisBackend::new(url, queue_name)?),
            bus: Arc::new(imgpipe_bus::RedisBus::new(url)?),
            cache: Arc::new(imgpipe_cache::RedisCacheStore::new(url)?),
            metadata: Arc::new(
                imgpipe_core::RedisMetadataStore::new(url, METADATA_PREFIX)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?,
            ),
        })
    }

    #[cfg(not(feature = "redis"))]
    fn redis(_url: &str, _queue_name: &str) -> Result<Self, AppError> {
        Err(ConfigError::Invalid(
            "redis_url is set but this build has no Redis support".to_string(),
        )
        .into())
    }
}
