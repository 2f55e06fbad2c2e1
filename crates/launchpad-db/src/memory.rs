//! In-memory implementations of every repository trait and the work queue.
//!
//! Each operation holds the store's lock for its whole duration, so the
//! conditional updates (`transition`, `swap_active`, `insert`, `link`) are
//! as atomic here as their single-statement Postgres counterparts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use launchpad_core::app::App;
use launchpad_core::artifact::{Artifact, ArtifactRole, BuildArtifact, ContentHash};
use launchpad_core::build::{BuildJob, BuildStatus, Transition};
use launchpad_core::deployment::{ApiDeployment, DeploymentKind, DeploymentStatus, SpaDeployment};
use launchpad_core::logs::{LogEntry, LogOrigin};
use launchpad_core::queue::{QueueMessage, WorkQueue};
use launchpad_core::route::Route;
use launchpad_core::{AppId, ArtifactId, BuildId, DeploymentId};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::repo::{AppRepo, ArtifactRepo, BuildRepo, DeploymentRepo, LogRepo, RouteRepo};
use crate::{DbError, DbResult};

#[derive(Debug, Default)]
struct State {
    apps: HashMap<AppId, App>,
    builds: HashMap<BuildId, BuildJob>,
    artifacts: HashMap<ArtifactId, Artifact>,
    links: HashMap<(BuildId, ArtifactRole), BuildArtifact>,
    spa: HashMap<DeploymentId, SpaDeployment>,
    api: HashMap<DeploymentId, ApiDeployment>,
    routes: Vec<Route>,
    logs: HashMap<BuildId, Vec<LogEntry>>,
}

/// Store holding every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AppRepo for MemoryStore {
    async fn get(&self, id: AppId) -> DbResult<App> {
        let state = self.state.read().await;
        state
            .apps
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("app {}", id)))
    }

    async fn create(&self, app: &App) -> DbResult<()> {
        let mut state = self.state.write().await;
        if state.apps.contains_key(&app.id) {
            return Err(DbError::Duplicate(format!("app {}", app.id)));
        }
        state.apps.insert(app.id, app.clone());
        Ok(())
    }

    async fn swap_active(
        &self,
        app_id: AppId,
        kind: DeploymentKind,
        deployment_id: DeploymentId,
    ) -> DbResult<Option<DeploymentId>> {
        let mut state = self.state.write().await;
        let app = state
            .apps
            .get_mut(&app_id)
            .ok_or_else(|| DbError::NotFound(format!("app {}", app_id)))?;
        let pointer = match kind {
            DeploymentKind::Spa => &mut app.active_spa_deployment_id,
            DeploymentKind::Api => &mut app.active_api_deployment_id,
        };
        let previous = pointer.replace(deployment_id);
        app.updated_at = Utc::now();
        Ok(previous)
    }
}

#[async_trait]
impl BuildRepo for MemoryStore {
    async fn create(&self, job: &BuildJob) -> DbResult<()> {
        let mut state = self.state.write().await;
        if !state.apps.contains_key(&job.app_id) {
            return Err(DbError::NotFound(format!("app {}", job.app_id)));
        }
        state.builds.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: BuildId) -> DbResult<BuildJob> {
        let state = self.state.read().await;
        state
            .builds
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))
    }

    async fn list_for_app(&self, app_id: AppId, limit: i64) -> DbResult<Vec<BuildJob>> {
        let state = self.state.read().await;
        let mut jobs: Vec<BuildJob> = state
            .builds
            .values()
            .filter(|j| j.app_id == app_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        jobs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(jobs)
    }

    async fn transition(&self, id: BuildId, to: BuildStatus) -> DbResult<Transition> {
        let mut state = self.state.write().await;
        let job = state
            .builds
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;

        if job.status == to {
            return Ok(Transition::Unchanged(job.clone()));
        }
        if !job.status.can_transition_to(to) {
            return Err(DbError::InvalidTransition {
                from: job.status,
                to,
            });
        }
        job.status = to;
        job.updated_at = Utc::now();
        Ok(Transition::Applied(job.clone()))
    }
}

#[async_trait]
impl ArtifactRepo for MemoryStore {
    async fn get(&self, id: ArtifactId) -> DbResult<Artifact> {
        let state = self.state.read().await;
        state
            .artifacts
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("artifact {}", id)))
    }

    async fn find_by_hash(
        &self,
        app_id: AppId,
        hash: &ContentHash,
    ) -> DbResult<Option<Artifact>> {
        let state = self.state.read().await;
        Ok(state
            .artifacts
            .values()
            .find(|a| a.app_id == app_id && &a.content_hash == hash)
            .cloned())
    }

    async fn insert(&self, artifact: &Artifact) -> DbResult<Artifact> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .artifacts
            .values()
            .find(|a| a.app_id == artifact.app_id && a.content_hash == artifact.content_hash)
        {
            return Ok(existing.clone());
        }
        state.artifacts.insert(artifact.id, artifact.clone());
        Ok(artifact.clone())
    }

    async fn link(&self, link: &BuildArtifact) -> DbResult<BuildArtifact> {
        let mut state = self.state.write().await;
        let stored = state
            .links
            .entry((link.build_id, link.role))
            .or_insert_with(|| link.clone())
            .clone();

        if stored.artifact_id != link.artifact_id {
            return Err(DbError::Conflict(format!(
                "build {} already produced artifact {}",
                link.build_id, stored.artifact_id
            )));
        }
        Ok(stored)
    }

    async fn find_for_build(
        &self,
        build_id: BuildId,
        role: ArtifactRole,
    ) -> DbResult<Option<Artifact>> {
        let state = self.state.read().await;
        Ok(state
            .links
            .get(&(build_id, role))
            .and_then(|link| state.artifacts.get(&link.artifact_id))
            .cloned())
    }

    async fn links_for_artifact(&self, artifact_id: ArtifactId) -> DbResult<Vec<BuildArtifact>> {
        let state = self.state.read().await;
        let mut links: Vec<BuildArtifact> = state
            .links
            .values()
            .filter(|l| l.artifact_id == artifact_id)
            .cloned()
            .collect();
        links.sort_by_key(|l| (l.created_at, l.build_id));
        Ok(links)
    }

    async fn delete_unlinked(&self, id: ArtifactId) -> DbResult<bool> {
        let mut state = self.state.write().await;
        if state.links.values().any(|l| l.artifact_id == id) {
            return Ok(false);
        }
        Ok(state.artifacts.remove(&id).is_some())
    }
}

#[async_trait]
impl DeploymentRepo for MemoryStore {
    async fn create_spa(&self, deployment: &SpaDeployment) -> DbResult<()> {
        let mut state = self.state.write().await;
        state.spa.insert(deployment.id, deployment.clone());
        Ok(())
    }

    async fn set_spa_status(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> DbResult<SpaDeployment> {
        let mut state = self.state.write().await;
        let deployment = state
            .spa
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("deployment {}", id)))?;
        deployment.status = status;
        deployment.error = error.map(str::to_string);
        Ok(deployment.clone())
    }

    async fn get_spa(&self, app_id: AppId, id: DeploymentId) -> DbResult<SpaDeployment> {
        let state = self.state.read().await;
        state
            .spa
            .get(&id)
            .filter(|d| d.app_id == app_id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("deployment {}", id)))
    }

    async fn list_spa(&self, app_id: AppId) -> DbResult<Vec<SpaDeployment>> {
        let state = self.state.read().await;
        let mut deployments: Vec<SpaDeployment> = state
            .spa
            .values()
            .filter(|d| d.app_id == app_id)
            .cloned()
            .collect();
        deployments.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(deployments)
    }

    async fn create_api(&self, deployment: &ApiDeployment) -> DbResult<()> {
        let mut state = self.state.write().await;
        state.api.insert(deployment.id, deployment.clone());
        Ok(())
    }

    async fn get_api(&self, app_id: AppId, id: DeploymentId) -> DbResult<ApiDeployment> {
        let state = self.state.read().await;
        state
            .api
            .get(&id)
            .filter(|d| d.app_id == app_id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("deployment {}", id)))
    }

    async fn list_api(&self, app_id: AppId) -> DbResult<Vec<ApiDeployment>> {
        let state = self.state.read().await;
        let mut deployments: Vec<ApiDeployment> = state
            .api
            .values()
            .filter(|d| d.app_id == app_id)
            .cloned()
            .collect();
        deployments.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(deployments)
    }
}

#[async_trait]
impl RouteRepo for MemoryStore {
    async fn list(&self, app_id: AppId) -> DbResult<Vec<Route>> {
        let state = self.state.read().await;
        Ok(state
            .routes
            .iter()
            .filter(|r| r.app_id == app_id)
            .cloned()
            .collect())
    }

    async fn list_enabled(&self, app_id: AppId) -> DbResult<Vec<Route>> {
        let state = self.state.read().await;
        Ok(state
            .routes
            .iter()
            .filter(|r| r.app_id == app_id && r.enabled)
            .cloned()
            .collect())
    }

    async fn upsert(&self, route: &Route) -> DbResult<()> {
        let mut state = self.state.write().await;
        match state.routes.iter_mut().find(|r| r.id == route.id) {
            Some(existing) if existing.app_id != route.app_id => Err(DbError::Conflict(format!(
                "route {} belongs to another app",
                route.id
            ))),
            Some(existing) => {
                *existing = route.clone();
                Ok(())
            }
            None => {
                state.routes.push(route.clone());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl LogRepo for MemoryStore {
    async fn append(&self, entries: &[LogEntry]) -> DbResult<()> {
        let mut state = self.state.write().await;
        for entry in entries {
            let stored = LogEntry {
                origin: LogOrigin::History,
                ..entry.clone()
            };
            let build_logs = state.logs.entry(entry.build_id).or_default();
            match build_logs.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = stored,
                None => build_logs.push(stored),
            }
        }
        Ok(())
    }

    async fn history(&self, build_id: BuildId) -> DbResult<Vec<LogEntry>> {
        let state = self.state.read().await;
        Ok(state.logs.get(&build_id).cloned().unwrap_or_default())
    }
}

/// Work queue holding messages in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    messages: Arc<Mutex<Vec<MemoryMessage>>>,
}

#[derive(Debug, Clone)]
struct MemoryMessage {
    message: QueueMessage,
    completed: bool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages on `topic` not yet completed, oldest first.
    pub async fn pending(&self, topic: &str) -> Vec<QueueMessage> {
        let messages = self.messages.lock().await;
        messages
            .iter()
            .filter(|m| !m.completed && m.message.topic == topic)
            .map(|m| m.message.clone())
            .collect()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> launchpad_core::Result<Uuid> {
        let id = Uuid::now_v7();
        let mut messages = self.messages.lock().await;
        messages.push(MemoryMessage {
            message: QueueMessage {
                id,
                topic: topic.to_string(),
                payload,
                claimed_by: None,
                created_at: Utc::now(),
            },
            completed: false,
        });
        Ok(id)
    }

    async fn claim(
        &self,
        topic: &str,
        worker_id: &str,
    ) -> launchpad_core::Result<Option<QueueMessage>> {
        let mut messages = self.messages.lock().await;
        let next = messages.iter_mut().find(|m| {
            !m.completed && m.message.topic == topic && m.message.claimed_by.is_none()
        });
        Ok(next.map(|m| {
            m.message.claimed_by = Some(worker_id.to_string());
            m.message.clone()
        }))
    }

    async fn complete(&self, id: Uuid) -> launchpad_core::Result<()> {
        let mut messages = self.messages.lock().await;
        if let Some(m) = messages.iter_mut().find(|m| m.message.id == id) {
            m.completed = true;
        }
        Ok(())
    }

    async fn release(&self, id: Uuid) -> launchpad_core::Result<()> {
        let mut messages = self.messages.lock().await;
        if let Some(m) = messages.iter_mut().find(|m| m.message.id == id) {
            m.message.claimed_by = None;
        }
        Ok(())
    }
}
