//! Signed per-build artifact upload URLs.
//!
//! The worker gets a URL carrying `token = hex(HMAC-SHA256(secret, build_id))`.
//! The token authorizes uploads for that one build and nothing else.

use hmac::{Hmac, Mac};
use launchpad_core::{AppId, BuildId, Error, Result};
use sha2::Sha256;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct UploadSigner {
    mac: HmacSha256,
    base_url: Url,
}

impl std::fmt::Debug for UploadSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSigner")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl UploadSigner {
    pub fn new(secret: &str, base_url: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::InvalidInput("upload secret is empty".to_string()));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("upload secret: {}", e)))?;

        let mut base_url = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("upload base url {}: {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { mac, base_url })
    }

    /// Upload token for a build.
    pub fn token_for(&self, build_id: BuildId) -> String {
        let mut mac = self.mac.clone();
        mac.update(build_id.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a presented token.
    pub fn verify(&self, build_id: BuildId, token: &str) -> bool {
        let Ok(raw) = hex::decode(token) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(build_id.to_string().as_bytes());
        mac.verify_slice(&raw).is_ok()
    }

    /// The URL the worker uploads a build's bundle to.
    pub fn upload_url(&self, app_id: AppId, build_id: BuildId) -> Result<String> {
        let mut url = self
            .base_url
            .join(&format!("internal/builds/{}/artifacts", build_id))
            .map_err(|e| Error::Internal(format!("upload url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("app_id", &app_id.to_string())
            .append_pair("token", &self.token_for(build_id));
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let signer = UploadSigner::new("s3cret", "https://launchpad.example.com").unwrap();
        let build = BuildId::new();
        let token = signer.token_for(build);

        assert_eq!(token.len(), 64);
        assert!(signer.verify(build, &token));
        assert!(!signer.verify(BuildId::new(), &token));
        assert!(!signer.verify(build, "not-hex"));

        let other = UploadSigner::new("different", "https://launchpad.example.com").unwrap();
        assert!(!other.verify(build, &token));
    }

    #[test]
    fn test_upload_url_keeps_base_path() {
        let signer = UploadSigner::new("s3cret", "https://example.com/launchpad").unwrap();
        let app = AppId::new();
        let build = BuildId::new();

        let url = Url::parse(&signer.upload_url(app, build).unwrap()).unwrap();
        assert_eq!(
            url.path(),
            format!("/launchpad/internal/builds/{}/artifacts", build)
        );
        let query: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(query["app_id"], app.to_string());
        assert_eq!(query["token"], signer.token_for(build));
    }

    #[test]
    fn test_rejects_bad_configuration() {
        assert!(UploadSigner::new("", "https://example.com").is_err());
        assert!(UploadSigner::new("key", "not a url").is_err());
    }
}
