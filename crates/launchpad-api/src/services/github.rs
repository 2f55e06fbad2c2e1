//! GitHub installation tokens for cloning linked repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use launchpad_core::app::LinkedRepository;
use launchpad_core::source::{RepoCredential, TokenProvider};
use launchpad_core::{Error, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

/// Exchanges the platform's GitHub App token for short-lived, single
/// repository installation tokens.
pub struct GitHubTokenProvider {
    client: reqwest::Client,
    api_base: String,
    app_token: Option<String>,
}

impl GitHubTokenProvider {
    pub fn new(api_base: impl Into<String>, app_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            app_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[async_trait]
impl TokenProvider for GitHubTokenProvider {
    async fn clone_credential(&self, repo: &LinkedRepository) -> Result<RepoCredential> {
        let app_token = self
            .app_token
            .as_deref()
            .ok_or_else(|| Error::Internal("GitHub app token is not configured".to_string()))?;
        let installation_id = repo.installation_id.ok_or_else(|| {
            Error::NoAccessibleRepo(format!("{} has no GitHub installation", repo.full_name()))
        })?;

        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base, installation_id
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", app_token))
            .header("User-Agent", "Launchpad")
            .header("Accept", "application/vnd.github+json")
            .json(&json!({
                "repositories": [repo.name],
                "permissions": { "contents": "read" }
            }))
            .send()
            .await
            .map_err(|e| Error::Internal(format!("GitHub request failed: {}", e)))?;

        let status = response.status();
        if matches!(
            status,
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY
        ) {
            warn!(repo = %repo.full_name(), status = %status, "Repository access was revoked");
            return Err(Error::NoAccessibleRepo(repo.full_name()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Internal(format!(
                "GitHub token exchange failed ({}): {}",
                status, text
            )));
        }

        let token: InstallationToken = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("GitHub token response: {}", e)))?;
        debug!(repo = %repo.full_name(), expires_at = %token.expires_at, "Issued clone token");

        Ok(RepoCredential {
            token: token.token,
            expires_at: token.expires_at,
        })
    }
}
