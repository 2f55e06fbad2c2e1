//! App types.
//!
//! An App is the unit a tenant builds and deploys. Only the parts of it the
//! build pipeline reads are modelled here: the linked repository, the stored
//! build configuration, environment variables and the two active-deployment
//! pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deployment::DeploymentKind;
use crate::{AppId, DeploymentId};

/// Git provider hosting a linked repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitProvider {
    Github,
}

impl std::fmt::Display for GitProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GitProvider::Github => write!(f, "github"),
        }
    }
}

impl std::str::FromStr for GitProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(GitProvider::Github),
            _ => Err(format!("Unknown git provider: {}", s)),
        }
    }
}

/// A source repository linked to an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedRepository {
    pub provider: GitProvider,
    pub owner: String,
    pub name: String,
    /// Provider installation granting the platform access to the repository.
    pub installation_id: Option<i64>,
}

impl LinkedRepository {
    /// `owner/name`, as the worker and the provider APIs expect it.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Stored build configuration for an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub branch: String,
    /// Directory inside the repository the build runs in.
    pub directory: String,
    pub install_command: String,
    pub build_command: String,
    /// Directory, relative to `directory`, holding the build output.
    pub out_dir: String,
    pub runtime_version: String,
}

/// Which phase an environment variable is exposed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvTarget {
    Build,
    Runtime,
    All,
}

impl std::fmt::Display for EnvTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvTarget::Build => write!(f, "build"),
            EnvTarget::Runtime => write!(f, "runtime"),
            EnvTarget::All => write!(f, "all"),
        }
    }
}

impl std::str::FromStr for EnvTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "build" => Ok(EnvTarget::Build),
            "runtime" => Ok(EnvTarget::Runtime),
            "all" => Ok(EnvTarget::All),
            _ => Err(format!("Unknown env target: {}", s)),
        }
    }
}

/// An environment variable attached to an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
    pub target: EnvTarget,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>, target: EnvTarget) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            target,
        }
    }
}

/// An app as seen by the build pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub name: String,
    /// Billing plan; selects the resource limits forwarded to the worker.
    pub plan: String,
    pub repository: Option<LinkedRepository>,
    pub build_config: Option<BuildConfig>,
    pub env: Vec<EnvVar>,
    pub active_spa_deployment_id: Option<DeploymentId>,
    pub active_api_deployment_id: Option<DeploymentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl App {
    /// A bare app with nothing linked or configured.
    pub fn new(name: impl Into<String>, plan: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: AppId::new(),
            name: name.into(),
            plan: plan.into(),
            repository: None,
            build_config: None,
            env: Vec::new(),
            active_spa_deployment_id: None,
            active_api_deployment_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The pointer for the given deployment kind.
    pub fn active_deployment(&self, kind: DeploymentKind) -> Option<DeploymentId> {
        match kind {
            DeploymentKind::Spa => self.active_spa_deployment_id,
            DeploymentKind::Api => self.active_api_deployment_id,
        }
    }
}
