//! SPA and API deployments.
//!
//! Deployments are immutable records apart from their status. Which one is
//! live is recorded only in the app's pointer for that kind, and the pointer
//! is only ever moved through [`AppRepo::swap_active`], a single atomic
//! store update. A deployment that fails never touches the pointer.

use std::sync::Arc;

use chrono::Utc;
use launchpad_core::artifact::{Artifact, ArtifactRole};
use launchpad_core::deployment::{
    ApiDeployment, DeploymentKind, DeploymentStatus, DeploymentView, Extractor, SpaDeployment,
};
use launchpad_core::route::{Route, RouteMatch, RouteSnapshot};
use launchpad_core::status::StatusEvent;
use launchpad_core::{AppId, ArtifactId, BuildId, DeploymentId, Error, Result};
use launchpad_db::{AppRepo, ArtifactRepo, BuildRepo, DbError, DeploymentRepo, RouteRepo};
use tracing::{error, info};

use crate::status::{RoutingCacheRefresher, StatusPublisher};

/// What an SPA deployment serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaSource {
    /// The bundle a build uploaded.
    Build(BuildId),
    /// An existing artifact, deployed again without re-verification.
    Artifact(ArtifactId),
}

#[derive(Clone)]
pub struct DeploymentManager {
    apps: Arc<dyn AppRepo>,
    builds: Arc<dyn BuildRepo>,
    artifacts: Arc<dyn ArtifactRepo>,
    deployments: Arc<dyn DeploymentRepo>,
    routes: Arc<dyn RouteRepo>,
    extractor: Arc<dyn Extractor>,
    status: StatusPublisher,
    routing: RoutingCacheRefresher,
}

impl DeploymentManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        apps: Arc<dyn AppRepo>,
        builds: Arc<dyn BuildRepo>,
        artifacts: Arc<dyn ArtifactRepo>,
        deployments: Arc<dyn DeploymentRepo>,
        routes: Arc<dyn RouteRepo>,
        extractor: Arc<dyn Extractor>,
        status: StatusPublisher,
        routing: RoutingCacheRefresher,
    ) -> Self {
        Self {
            apps,
            builds,
            artifacts,
            deployments,
            routes,
            extractor,
            status,
            routing,
        }
    }

    /// Snapshot the app's enabled routes into a new API deployment and make
    /// it active.
    pub async fn publish_api_snapshot(&self, app_id: AppId) -> Result<ApiDeployment> {
        self.apps.get(app_id).await?;
        let live = self.routes.list_enabled(app_id).await?;

        let deployment = ApiDeployment {
            id: DeploymentId::new(),
            app_id,
            status: DeploymentStatus::Ready,
            snapshot: RouteSnapshot::capture(&live),
            created_at: Utc::now(),
        };
        self.deployments.create_api(&deployment).await?;

        let previous = self
            .apps
            .swap_active(app_id, DeploymentKind::Api, deployment.id)
            .await?;
        info!(
            app_id = %app_id,
            deployment_id = %deployment.id,
            previous = ?previous,
            routes = deployment.snapshot.route_count(),
            "API snapshot activated"
        );

        self.status.publish(StatusEvent::deployment(
            app_id,
            deployment.id,
            DeploymentKind::Api,
            DeploymentStatus::Ready,
            true,
        ));
        self.routing.refresh(app_id, deployment.id).await;
        Ok(deployment)
    }

    /// Deploy a bundle as the app's SPA.
    ///
    /// The deployment is recorded as pending, extracted, and only then made
    /// active. If extraction fails the deployment is marked failed, the
    /// previously active deployment keeps serving, and
    /// [`Error::ExtractionFailed`] is returned.
    pub async fn create_spa_deployment(
        &self,
        app_id: AppId,
        source: SpaSource,
    ) -> Result<SpaDeployment> {
        let (build_id, artifact) = self.resolve_source(app_id, source).await?;

        let pending = SpaDeployment::pending(app_id, build_id, artifact.id);
        self.deployments.create_spa(&pending).await?;
        self.status.publish(StatusEvent::deployment(
            app_id,
            pending.id,
            DeploymentKind::Spa,
            DeploymentStatus::Pending,
            false,
        ));

        match self.extractor.extract(&artifact, pending.id).await {
            Ok(summary) => {
                let ready = self
                    .deployments
                    .set_spa_status(pending.id, DeploymentStatus::Ready, None)
                    .await?;
                let previous = self
                    .apps
                    .swap_active(app_id, DeploymentKind::Spa, ready.id)
                    .await?;
                info!(
                    app_id = %app_id,
                    deployment_id = %ready.id,
                    artifact_id = %artifact.id,
                    previous = ?previous,
                    files = summary.files,
                    "SPA deployment activated"
                );
                self.status.publish(StatusEvent::deployment(
                    app_id,
                    ready.id,
                    DeploymentKind::Spa,
                    DeploymentStatus::Ready,
                    true,
                ));
                Ok(ready)
            }
            Err(e) => {
                let message = e.to_string();
                error!(
                    app_id = %app_id,
                    deployment_id = %pending.id,
                    error = %message,
                    "SPA extraction failed"
                );
                self.deployments
                    .set_spa_status(pending.id, DeploymentStatus::Failed, Some(&message))
                    .await?;
                self.status.publish(
                    StatusEvent::deployment(
                        app_id,
                        pending.id,
                        DeploymentKind::Spa,
                        DeploymentStatus::Failed,
                        false,
                    )
                    .with_message(message.clone()),
                );
                Err(Error::ExtractionFailed {
                    deployment_id: pending.id.to_string(),
                    message,
                })
            }
        }
    }

    async fn resolve_source(
        &self,
        app_id: AppId,
        source: SpaSource,
    ) -> Result<(Option<BuildId>, Artifact)> {
        self.apps.get(app_id).await?;
        match source {
            SpaSource::Build(build_id) => {
                let build = self.builds.get(build_id).await?;
                if build.app_id != app_id {
                    return Err(Error::NotFound(format!("build {}", build_id)));
                }
                let artifact = self
                    .artifacts
                    .find_for_build(build_id, ArtifactRole::Bundle)
                    .await?
                    .ok_or_else(|| {
                        Error::Conflict(format!("build {} has not uploaded a bundle", build_id))
                    })?;
                Ok((Some(build_id), artifact))
            }
            SpaSource::Artifact(artifact_id) => {
                let artifact = self.artifacts.get(artifact_id).await?;
                if artifact.app_id != app_id {
                    return Err(Error::NotFound(format!("artifact {}", artifact_id)));
                }
                Ok((None, artifact))
            }
        }
    }

    /// Point the app back at an earlier ready deployment.
    pub async fn rollback(
        &self,
        app_id: AppId,
        kind: DeploymentKind,
        deployment_id: DeploymentId,
    ) -> Result<DeploymentView> {
        let status = match kind {
            DeploymentKind::Spa => self.deployments.get_spa(app_id, deployment_id).await?.status,
            DeploymentKind::Api => self.deployments.get_api(app_id, deployment_id).await?.status,
        };
        if status != DeploymentStatus::Ready {
            return Err(Error::Conflict(format!(
                "deployment {} is {}, only ready deployments can be activated",
                deployment_id, status
            )));
        }

        let previous = self.apps.swap_active(app_id, kind, deployment_id).await?;
        info!(
            app_id = %app_id,
            deployment_id = %deployment_id,
            kind = %kind,
            previous = ?previous,
            "Rolled back deployment"
        );
        self.status.publish(StatusEvent::deployment(
            app_id,
            deployment_id,
            kind,
            DeploymentStatus::Ready,
            true,
        ));
        if kind == DeploymentKind::Api {
            self.routing.refresh(app_id, deployment_id).await;
        }

        self.get(app_id, deployment_id).await
    }

    /// All of an app's deployments, newest first within each kind.
    pub async fn list(
        &self,
        app_id: AppId,
        kind: Option<DeploymentKind>,
    ) -> Result<Vec<DeploymentView>> {
        let app = self.apps.get(app_id).await?;
        let mut views = Vec::new();

        if kind.is_none_or(|k| k == DeploymentKind::Spa) {
            let active = app.active_deployment(DeploymentKind::Spa);
            views.extend(
                self.deployments
                    .list_spa(app_id)
                    .await?
                    .iter()
                    .map(|d| DeploymentView::spa(d, active)),
            );
        }
        if kind.is_none_or(|k| k == DeploymentKind::Api) {
            let active = app.active_deployment(DeploymentKind::Api);
            views.extend(
                self.deployments
                    .list_api(app_id)
                    .await?
                    .iter()
                    .map(|d| DeploymentView::api(d, active)),
            );
        }
        Ok(views)
    }

    pub async fn get(&self, app_id: AppId, deployment_id: DeploymentId) -> Result<DeploymentView> {
        let app = self.apps.get(app_id).await?;
        match self.deployments.get_spa(app_id, deployment_id).await {
            Ok(d) => return Ok(DeploymentView::spa(&d, app.active_spa_deployment_id)),
            Err(DbError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        let d = self.deployments.get_api(app_id, deployment_id).await?;
        Ok(DeploymentView::api(&d, app.active_api_deployment_id))
    }

    /// The full route snapshot of an API deployment.
    pub async fn api_snapshot(
        &self,
        app_id: AppId,
        deployment_id: DeploymentId,
    ) -> Result<ApiDeployment> {
        Ok(self.deployments.get_api(app_id, deployment_id).await?)
    }

    /// The live, editable route set.
    pub async fn list_routes(&self, app_id: AppId) -> Result<Vec<Route>> {
        self.apps.get(app_id).await?;
        Ok(self.routes.list(app_id).await?)
    }

    /// Create or replace a live route. Published snapshots are unaffected.
    pub async fn save_route(&self, mut route: Route) -> Result<Route> {
        self.apps.get(route.app_id).await?;
        if let RouteMatch::Regex(pattern) = &route.matcher {
            regex::Regex::new(pattern)
                .map_err(|e| Error::InvalidInput(format!("route pattern {}: {}", pattern, e)))?;
        }
        route.updated_at = Utc::now();
        self.routes.upsert(&route).await?;
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use launchpad_core::app::App;
    use launchpad_core::artifact::{BlobKey, BuildArtifact, CompressionFormat, ContentHash};
    use launchpad_core::build::{BuildJob, BuildStatus};
    use launchpad_core::deployment::ExtractionSummary;
    use launchpad_core::route::RouteTarget;
    use launchpad_db::{MemoryQueue, MemoryStore};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Extractor that succeeds unless told to fail.
    #[derive(Default)]
    struct FakeExtractor {
        fail: AtomicBool,
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        async fn extract(
            &self,
            _artifact: &Artifact,
            _deployment_id: DeploymentId,
        ) -> Result<ExtractionSummary> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Storage("archive is truncated".to_string()));
            }
            Ok(ExtractionSummary { files: 3, bytes: 42 })
        }
    }

    struct Fixture {
        store: MemoryStore,
        queue: MemoryQueue,
        extractor: Arc<FakeExtractor>,
        manager: DeploymentManager,
        app_id: AppId,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let extractor = Arc::new(FakeExtractor::default());
        let app = App::new("storefront", "free");
        AppRepo::create(&store, &app).await.unwrap();

        let manager = DeploymentManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            extractor.clone(),
            StatusPublisher::default(),
            RoutingCacheRefresher::new(Arc::new(queue.clone()), "routing-cache"),
        );
        Fixture {
            store,
            queue,
            extractor,
            manager,
            app_id: app.id,
        }
    }

    /// A finished build with an uploaded bundle.
    async fn built(store: &MemoryStore, app_id: AppId) -> (BuildId, ArtifactId) {
        let now = Utc::now();
        let job = BuildJob {
            id: BuildId::new(),
            app_id,
            name: "build".to_string(),
            status: BuildStatus::Success,
            created_at: now,
            updated_at: now,
        };
        BuildRepo::create(store, &job).await.unwrap();

        let artifact = Artifact {
            id: ArtifactId::new(),
            app_id,
            content_hash: ContentHash::from_digest(job.id.as_uuid().as_bytes()),
            size_bytes: 42,
            storage_key: BlobKey::generate(app_id, CompressionFormat::TarZstd),
            compression_format: CompressionFormat::TarZstd,
            created_at: now,
        };
        store.insert(&artifact).await.unwrap();
        store
            .link(&BuildArtifact {
                build_id: job.id,
                artifact_id: artifact.id,
                role: ArtifactRole::Bundle,
                created_at: now,
            })
            .await
            .unwrap();
        (job.id, artifact.id)
    }

    async fn active(store: &MemoryStore, app_id: AppId, kind: DeploymentKind) -> Option<DeploymentId> {
        AppRepo::get(store, app_id).await.unwrap().active_deployment(kind)
    }

    #[tokio::test]
    async fn test_spa_deployment_activates_on_success() {
        let f = fixture().await;
        let (build_id, artifact_id) = built(&f.store, f.app_id).await;

        let deployment = f
            .manager
            .create_spa_deployment(f.app_id, SpaSource::Build(build_id))
            .await
            .unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Ready);
        assert_eq!(deployment.build_id, Some(build_id));
        assert_eq!(deployment.artifact_id, artifact_id);
        assert_eq!(
            active(&f.store, f.app_id, DeploymentKind::Spa).await,
            Some(deployment.id)
        );
    }

    #[tokio::test]
    async fn test_failed_extraction_keeps_previous_active() {
        let f = fixture().await;
        let (build_id, artifact_id) = built(&f.store, f.app_id).await;
        let good = f
            .manager
            .create_spa_deployment(f.app_id, SpaSource::Build(build_id))
            .await
            .unwrap();

        f.extractor.fail.store(true, Ordering::SeqCst);
        let result = f
            .manager
            .create_spa_deployment(f.app_id, SpaSource::Artifact(artifact_id))
            .await;
        let failed_id = match result {
            Err(Error::ExtractionFailed { deployment_id, .. }) => deployment_id,
            other => panic!("expected extraction failure, got {:?}", other),
        };

        assert_eq!(
            active(&f.store, f.app_id, DeploymentKind::Spa).await,
            Some(good.id)
        );
        let views = f.manager.list(f.app_id, Some(DeploymentKind::Spa)).await.unwrap();
        assert_eq!(views.len(), 2);
        let failed = views.iter().find(|v| v.id.to_string() == failed_id).unwrap();
        assert_eq!(failed.status, DeploymentStatus::Failed);
        assert!(!failed.is_active);
        assert_eq!(failed.build_id, None);
    }

    #[tokio::test]
    async fn test_foreign_build_is_not_found() {
        let f = fixture().await;
        let other = App::new("other", "free");
        AppRepo::create(&f.store, &other).await.unwrap();
        let (build_id, _) = built(&f.store, other.id).await;

        let result = f
            .manager
            .create_spa_deployment(f.app_id, SpaSource::Build(build_id))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_snapshot_is_immune_to_route_edits() {
        let f = fixture().await;
        let mut route = Route::new(
            f.app_id,
            RouteMatch::Prefix("/api".to_string()),
            RouteTarget::Api {
                upstream: "http://api-v1.internal".to_string(),
            },
        );
        f.manager.save_route(route.clone()).await.unwrap();
        let mut disabled = Route::new(f.app_id, RouteMatch::Exact("/old".to_string()), RouteTarget::Spa);
        disabled.enabled = false;
        f.manager.save_route(disabled).await.unwrap();

        let v1 = f.manager.publish_api_snapshot(f.app_id).await.unwrap();
        assert_eq!(v1.snapshot.route_count(), 1);

        route.target = RouteTarget::Api {
            upstream: "http://api-v2.internal".to_string(),
        };
        f.manager.save_route(route).await.unwrap();

        let stored = f.manager.api_snapshot(f.app_id, v1.id).await.unwrap();
        assert_eq!(
            stored.snapshot.resolve("/api/users").map(|r| &r.target),
            Some(&RouteTarget::Api {
                upstream: "http://api-v1.internal".to_string()
            })
        );
        assert_eq!(f.queue.pending("routing-cache").await.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_to_earlier_snapshot() {
        let f = fixture().await;
        let v1 = f.manager.publish_api_snapshot(f.app_id).await.unwrap();
        let v2 = f.manager.publish_api_snapshot(f.app_id).await.unwrap();
        assert_eq!(active(&f.store, f.app_id, DeploymentKind::Api).await, Some(v2.id));

        let view = f
            .manager
            .rollback(f.app_id, DeploymentKind::Api, v1.id)
            .await
            .unwrap();
        assert!(view.is_active);
        assert_eq!(active(&f.store, f.app_id, DeploymentKind::Api).await, Some(v1.id));

        let views = f.manager.list(f.app_id, None).await.unwrap();
        assert_eq!(views.iter().filter(|v| v.is_active).count(), 1);
        assert_eq!(f.queue.pending("routing-cache").await.len(), 3);
    }

    #[tokio::test]
    async fn test_rollback_rejects_failed_deployment() {
        let f = fixture().await;
        let (build_id, _) = built(&f.store, f.app_id).await;
        f.extractor.fail.store(true, Ordering::SeqCst);
        let result = f
            .manager
            .create_spa_deployment(f.app_id, SpaSource::Build(build_id))
            .await;
        let Err(Error::ExtractionFailed { deployment_id, .. }) = result else {
            panic!("expected extraction failure");
        };
        let deployment_id: DeploymentId = deployment_id.parse().unwrap();

        let result = f
            .manager
            .rollback(f.app_id, DeploymentKind::Spa, deployment_id)
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(active(&f.store, f.app_id, DeploymentKind::Spa).await, None);
    }

    #[tokio::test]
    async fn test_concurrent_publishes_settle_on_one_winner() {
        let f = fixture().await;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = f.manager.clone();
                let app_id = f.app_id;
                tokio::spawn(async move { manager.publish_api_snapshot(app_id).await })
            })
            .collect();

        let mut created = Vec::new();
        for handle in handles {
            created.push(handle.await.unwrap().unwrap().id);
        }

        let winner = active(&f.store, f.app_id, DeploymentKind::Api).await.unwrap();
        assert!(created.contains(&winner));
        let views = f.manager.list(f.app_id, Some(DeploymentKind::Api)).await.unwrap();
        assert_eq!(views.len(), 8);
        assert_eq!(views.iter().filter(|v| v.is_active).count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_regex_route_is_rejected() {
        let f = fixture().await;
        let route = Route::new(f.app_id, RouteMatch::Regex("([".to_string()), RouteTarget::Spa);
        let result = f.manager.save_route(route).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
