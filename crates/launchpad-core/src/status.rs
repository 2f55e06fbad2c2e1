//! Status events pushed to live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::build::{BuildJob, BuildStatus};
use crate::deployment::{DeploymentKind, DeploymentStatus};
use crate::{AppId, BuildId, DeploymentId};

/// What a status event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "subject", rename_all = "snake_case")]
pub enum StatusSubject {
    Build {
        build_id: BuildId,
        status: BuildStatus,
    },
    Deployment {
        deployment_id: DeploymentId,
        kind: DeploymentKind,
        status: DeploymentStatus,
        /// Set once the deployment became the app's active one.
        activated: bool,
    },
}

/// A status transition broadcast on an app's channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub app_id: AppId,
    #[serde(flatten)]
    pub subject: StatusSubject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusEvent {
    pub fn build(job: &BuildJob) -> Self {
        Self {
            app_id: job.app_id,
            subject: StatusSubject::Build {
                build_id: job.id,
                status: job.status,
            },
            message: None,
            at: Utc::now(),
        }
    }

    pub fn deployment(
        app_id: AppId,
        deployment_id: DeploymentId,
        kind: DeploymentKind,
        status: DeploymentStatus,
        activated: bool,
    ) -> Self {
        Self {
            app_id,
            subject: StatusSubject::Deployment {
                deployment_id,
                kind,
                status,
                activated,
            },
            message: None,
            at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
