//! Deployment types and the extraction contract.
//!
//! Deployments never record whether they are active. The app's per-kind
//! pointer is the only place "current" lives; [`DeploymentView::is_active`]
//! is computed by comparing against it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::route::RouteSnapshot;
use crate::{AppId, ArtifactId, BuildId, DeploymentId, Result};

/// The two kinds of activatable deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    /// Static files unpacked from an artifact.
    Spa,
    /// A snapshot of the app's route configuration.
    Api,
}

impl DeploymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentKind::Spa => "spa",
            DeploymentKind::Api => "api",
        }
    }
}

impl std::fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "spa" => Ok(DeploymentKind::Spa),
            "api" => Ok(DeploymentKind::Api),
            _ => Err(format!("Unknown deployment kind: {}", s)),
        }
    }
}

/// Status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Ready,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Ready => "ready",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "ready" => Ok(DeploymentStatus::Ready),
            "failed" => Ok(DeploymentStatus::Failed),
            _ => Err(format!("Unknown deployment status: {}", s)),
        }
    }
}

/// A deployment serving static files unpacked from an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaDeployment {
    pub id: DeploymentId,
    pub app_id: AppId,
    /// `None` when redeployed straight from an existing artifact.
    pub build_id: Option<BuildId>,
    pub artifact_id: ArtifactId,
    pub status: DeploymentStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SpaDeployment {
    pub fn pending(app_id: AppId, build_id: Option<BuildId>, artifact_id: ArtifactId) -> Self {
        Self {
            id: DeploymentId::new(),
            app_id,
            build_id,
            artifact_id,
            status: DeploymentStatus::Pending,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// A deployment serving an immutable route snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDeployment {
    pub id: DeploymentId,
    pub app_id: AppId,
    pub status: DeploymentStatus,
    pub snapshot: RouteSnapshot,
    pub created_at: DateTime<Utc>,
}

/// Read model returned by listing and detail endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentView {
    pub id: DeploymentId,
    pub kind: DeploymentKind,
    pub status: DeploymentStatus,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<BuildId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<ArtifactId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_route_count: Option<usize>,
}

impl DeploymentView {
    pub fn spa(deployment: &SpaDeployment, active: Option<DeploymentId>) -> Self {
        Self {
            id: deployment.id,
            kind: DeploymentKind::Spa,
            status: deployment.status,
            is_active: active == Some(deployment.id),
            created_at: deployment.created_at,
            build_id: deployment.build_id,
            artifact_id: Some(deployment.artifact_id),
            route_count: None,
            static_route_count: None,
        }
    }

    pub fn api(deployment: &ApiDeployment, active: Option<DeploymentId>) -> Self {
        Self {
            id: deployment.id,
            kind: DeploymentKind::Api,
            status: deployment.status,
            is_active: active == Some(deployment.id),
            created_at: deployment.created_at,
            build_id: None,
            artifact_id: None,
            route_count: Some(deployment.snapshot.route_count()),
            static_route_count: Some(deployment.snapshot.static_route_count()),
        }
    }
}

/// What an extraction produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub files: u64,
    pub bytes: u64,
}

/// Unpacks an artifact into a deployment's served-file namespace.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        artifact: &Artifact,
        deployment_id: DeploymentId,
    ) -> Result<ExtractionSummary>;
}
