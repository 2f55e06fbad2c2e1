//! Source repository credentials.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::app::{GitProvider, LinkedRepository};

/// A short-lived credential allowing one clone of a linked repository.
#[derive(Clone, Serialize, Deserialize)]
pub struct RepoCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for RepoCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoCredential")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl RepoCredential {
    /// HTTPS clone URL embedding the credential.
    pub fn clone_url(&self, repo: &LinkedRepository) -> String {
        match repo.provider {
            GitProvider::Github => format!(
                "https://x-access-token:{}@github.com/{}.git",
                self.token,
                repo.full_name()
            ),
        }
    }
}

/// Issues ephemeral clone credentials.
///
/// Implementations return [`crate::Error::NoAccessibleRepo`] when the platform
/// has lost access to the repository.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn clone_credential(&self, repo: &LinkedRepository) -> Result<RepoCredential>;
}
