//! Application state.

use std::sync::Arc;

use launchpad_config::SystemConfig;
use launchpad_core::artifact::BlobStore;
use launchpad_core::queue::WorkQueue;
use launchpad_core::source::TokenProvider;
use launchpad_db::{
    AppRepo, ArtifactRepo, BuildRepo, DeploymentRepo, LogRepo, MemoryQueue, MemoryStore,
    PgAppRepo, PgArtifactRepo, PgBuildRepo, PgDeploymentRepo, PgLogRepo, PgRouteRepo,
    PgWorkQueue, RouteRepo,
};
use launchpad_pipeline::{
    ArtifactService, BuildDispatcher, DeploymentManager, LogBroker, LogStreamRelay,
    RoutingCacheRefresher, StatusPublisher, UploadSigner,
};
use launchpad_storage::{LocalBlobStore, LocalExtractor};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::services::github::GitHubTokenProvider;

/// The stores and collaborators the pipeline runs on.
#[derive(Clone)]
pub struct Backends {
    pub apps: Arc<dyn AppRepo>,
    pub builds: Arc<dyn BuildRepo>,
    pub artifacts: Arc<dyn ArtifactRepo>,
    pub deployments: Arc<dyn DeploymentRepo>,
    pub routes: Arc<dyn RouteRepo>,
    pub logs: Arc<dyn LogRepo>,
    pub queue: Arc<dyn WorkQueue>,
    pub blobs: Arc<dyn BlobStore>,
    pub tokens: Arc<dyn TokenProvider>,
    pub pool: Option<PgPool>,
}

impl Backends {
    /// Postgres for records and the queue, the local filesystem for blobs.
    pub fn postgres(pool: PgPool, config: &SystemConfig) -> Self {
        Self {
            apps: Arc::new(PgAppRepo::new(pool.clone())),
            builds: Arc::new(PgBuildRepo::new(pool.clone())),
            artifacts: Arc::new(PgArtifactRepo::new(pool.clone())),
            deployments: Arc::new(PgDeploymentRepo::new(pool.clone())),
            routes: Arc::new(PgRouteRepo::new(pool.clone())),
            logs: Arc::new(PgLogRepo::new(pool.clone())),
            queue: Arc::new(PgWorkQueue::new(pool.clone())),
            blobs: Arc::new(LocalBlobStore::new(config.storage.root.clone())),
            tokens: Arc::new(GitHubTokenProvider::new(
                config.github.api_base.clone(),
                config.github.app_token.clone(),
            )),
            pool: Some(pool),
        }
    }

    /// Everything in memory apart from the given blob store and token source.
    pub fn in_memory(
        store: &MemoryStore,
        queue: &MemoryQueue,
        blobs: Arc<dyn BlobStore>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            apps: Arc::new(store.clone()),
            builds: Arc::new(store.clone()),
            artifacts: Arc::new(store.clone()),
            deployments: Arc::new(store.clone()),
            routes: Arc::new(store.clone()),
            logs: Arc::new(store.clone()),
            queue: Arc::new(queue.clone()),
            blobs,
            tokens,
            pool: None,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SystemConfig>,
    pub apps: Arc<dyn AppRepo>,
    pub dispatcher: BuildDispatcher,
    pub artifacts: ArtifactService,
    pub deployments: DeploymentManager,
    pub status: StatusPublisher,
    pub logs: LogStreamRelay,
    pub signer: UploadSigner,
    pub pool: Option<PgPool>,
}

impl AppState {
    /// Wire the pipeline services. Cancelling `shutdown` ends every open
    /// status and log stream.
    pub fn new(
        backends: Backends,
        config: SystemConfig,
        shutdown: CancellationToken,
    ) -> launchpad_core::Result<Self> {
        let config = Arc::new(config);
        let signer = UploadSigner::new(
            &config.worker.upload_secret,
            &config.worker.upload_base_url,
        )?;
        let status = StatusPublisher::new(shutdown.clone());
        let routing =
            RoutingCacheRefresher::new(backends.queue.clone(), config.queue.routing_topic.clone());
        let extractor = Arc::new(LocalExtractor::new(
            backends.blobs.clone(),
            config.storage.served_root.clone(),
        ));

        let dispatcher = BuildDispatcher::new(
            backends.apps.clone(),
            backends.builds.clone(),
            backends.tokens.clone(),
            backends.queue.clone(),
            status.clone(),
            signer.clone(),
            config.clone(),
        );
        let artifacts = ArtifactService::new(
            backends.builds.clone(),
            backends.artifacts.clone(),
            backends.blobs.clone(),
        );
        let deployments = DeploymentManager::new(
            backends.apps.clone(),
            backends.builds.clone(),
            backends.artifacts.clone(),
            backends.deployments.clone(),
            backends.routes.clone(),
            extractor,
            status.clone(),
            routing,
        );
        let logs = LogStreamRelay::new(backends.logs.clone(), LogBroker::new(), shutdown);

        Ok(Self {
            config,
            apps: backends.apps,
            dispatcher,
            artifacts,
            deployments,
            status,
            logs,
            signer,
            pool: backends.pool,
        })
    }
}
