//! Build jobs and the message handed to the external build worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{AppId, BuildId};

/// Status of a build job.
///
/// Transitions only move forward: queued -> running -> success | failed.
/// Steps may be skipped (a worker can report `failed` straight from `queued`)
/// but never revisited, and both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            BuildStatus::Queued => 0,
            BuildStatus::Running => 1,
            BuildStatus::Success | BuildStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward step.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Statuses from which `next` may legally be reached.
    pub fn predecessors(next: BuildStatus) -> Vec<BuildStatus> {
        [BuildStatus::Queued, BuildStatus::Running]
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Running => "running",
            BuildStatus::Success => "success",
            BuildStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(BuildStatus::Queued),
            "running" => Ok(BuildStatus::Running),
            "success" => Ok(BuildStatus::Success),
            "failed" => Ok(BuildStatus::Failed),
            _ => Err(format!("Unknown build status: {}", s)),
        }
    }
}

/// One attempt to turn source into a deployable artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: BuildId,
    pub app_id: AppId,
    pub name: String,
    pub status: BuildStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of applying a worker status callback.
#[derive(Debug, Clone)]
pub enum Transition {
    /// The status moved forward.
    Applied(BuildJob),
    /// The job was already in the requested status.
    Unchanged(BuildJob),
}

impl Transition {
    pub fn job(&self) -> &BuildJob {
        match self {
            Transition::Applied(job) | Transition::Unchanged(job) => job,
        }
    }

    pub fn into_job(self) -> BuildJob {
        match self {
            Transition::Applied(job) | Transition::Unchanged(job) => job,
        }
    }
}

/// Caller-supplied options for a build request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOptions {
    pub name: Option<String>,
}

/// Resource limits the worker should apply, chosen by the app's plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    /// CPU in millicores.
    pub cpu_millis: u32,
    pub memory_mb: u32,
    pub timeout_secs: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_millis: 1000,
            memory_mb: 2048,
            timeout_secs: 900,
        }
    }
}

/// Unit of work published to the build queue.
///
/// Field names are camelCased on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMessage {
    pub build_id: BuildId,
    pub repo_full_name: String,
    /// Clone URL carrying a short-lived credential.
    pub ephemeral_clone_url: String,
    pub branch: String,
    pub directory: String,
    pub out_dir: String,
    pub install_command: String,
    pub build_command: String,
    pub runtime_version: String,
    pub env_vars: HashMap<String, String>,
    pub artifacts_upload_url: String,
    pub limits: ResourceLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_are_allowed() {
        assert!(BuildStatus::Queued.can_transition_to(BuildStatus::Running));
        assert!(BuildStatus::Queued.can_transition_to(BuildStatus::Failed));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Success));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Failed));
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert!(!BuildStatus::Success.can_transition_to(BuildStatus::Failed));
        assert!(!BuildStatus::Failed.can_transition_to(BuildStatus::Success));
        assert!(!BuildStatus::Success.can_transition_to(BuildStatus::Running));
    }

    #[test]
    fn test_backwards_and_self_transitions_are_rejected() {
        assert!(!BuildStatus::Running.can_transition_to(BuildStatus::Queued));
        assert!(!BuildStatus::Running.can_transition_to(BuildStatus::Running));
    }

    #[test]
    fn test_predecessors_of_running() {
        assert_eq!(
            BuildStatus::predecessors(BuildStatus::Running),
            vec![BuildStatus::Queued]
        );
        assert_eq!(
            BuildStatus::predecessors(BuildStatus::Success),
            vec![BuildStatus::Queued, BuildStatus::Running]
        );
        assert!(BuildStatus::predecessors(BuildStatus::Queued).is_empty());
    }

    #[test]
    fn test_status_parses_from_wire_names() {
        for status in [
            BuildStatus::Queued,
            BuildStatus::Running,
            BuildStatus::Success,
            BuildStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<BuildStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<BuildStatus>().is_err());
    }
}
