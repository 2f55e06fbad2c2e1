//! Artifacts and the blob storage abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{AppId, ArtifactId, BuildId, Error, Result};

/// A stream of raw bytes, as uploaded or as read back from storage.
pub type ByteStream<'a> = BoxStream<'a, std::io::Result<Bytes>>;

/// Lower-case hex SHA-256 of an artifact's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse a hex-encoded SHA-256 digest. Upper-case input is normalised.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::MissingHash);
        }
        if raw.len() != 64 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidHash(format!(
                "expected 64 hex characters, got {:?}",
                raw
            )));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Wrap a digest computed locally.
    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The single archive format accepted from the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionFormat {
    /// A tar archive compressed with zstd (`.tar.zst`).
    #[serde(rename = "tar+zstd")]
    TarZstd,
}

impl CompressionFormat {
    pub const EXTENSION: &'static str = ".tar.zst";

    /// Detect the format from an uploaded file name.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        file_name
            .to_ascii_lowercase()
            .ends_with(Self::EXTENSION)
            .then_some(CompressionFormat::TarZstd)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionFormat::TarZstd => "tar+zstd",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CompressionFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tar+zstd" => Ok(CompressionFormat::TarZstd),
            _ => Err(format!("Unknown compression format: {}", s)),
        }
    }
}

/// An immutable, content-addressed bundle produced by a build.
///
/// There is at most one Artifact per (app, content hash); builds producing
/// identical bytes share it through [`BuildArtifact`] links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub app_id: AppId,
    pub content_hash: ContentHash,
    pub size_bytes: u64,
    pub storage_key: BlobKey,
    pub compression_format: CompressionFormat,
    pub created_at: DateTime<Utc>,
}

/// What a build artifact is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactRole {
    /// The static bundle served by SPA deployments.
    Bundle,
}

impl ArtifactRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactRole::Bundle => "bundle",
        }
    }
}

impl std::str::FromStr for ArtifactRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "bundle" => Ok(ArtifactRole::Bundle),
            _ => Err(format!("Unknown artifact role: {}", s)),
        }
    }
}

/// Link between a build and the artifact it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub build_id: BuildId,
    pub artifact_id: ArtifactId,
    pub role: ArtifactRole,
    pub created_at: DateTime<Utc>,
}

/// Key of a blob in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobKey(String);

impl BlobKey {
    /// A fresh key under the app's namespace.
    pub fn generate(app_id: AppId, format: CompressionFormat) -> Self {
        Self(format!(
            "artifacts/{}/{}{}",
            app_id,
            uuid::Uuid::now_v7(),
            format_extension(format)
        ))
    }

    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn format_extension(format: CompressionFormat) -> &'static str {
    match format {
        CompressionFormat::TarZstd => CompressionFormat::EXTENSION,
    }
}

impl std::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait for blob storage backends.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a blob, returning the number of bytes stored.
    async fn put(&self, key: &BlobKey, data: ByteStream<'_>) -> Result<u64>;

    /// Stream a stored blob back.
    async fn stream(&self, key: &BlobKey) -> Result<ByteStream<'static>>;

    /// Whether a blob exists under the key.
    async fn exists(&self, key: &BlobKey) -> Result<bool>;

    /// Delete a blob. Deleting a missing blob is not an error.
    async fn delete(&self, key: &BlobKey) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_normalises_case() {
        let upper = "A".repeat(64);
        let hash = ContentHash::parse(&upper).unwrap();
        assert_eq!(hash.as_str(), "a".repeat(64));
    }

    #[test]
    fn test_content_hash_rejects_bad_input() {
        assert!(matches!(ContentHash::parse(""), Err(Error::MissingHash)));
        assert!(matches!(
            ContentHash::parse("abc"),
            Err(Error::InvalidHash(_))
        ));
        assert!(matches!(
            ContentHash::parse(&"z".repeat(64)),
            Err(Error::InvalidHash(_))
        ));
    }

    #[test]
    fn test_content_hash_from_digest_is_hex() {
        let hash = ContentHash::from_digest(&[0x00, 0xab, 0xff]);
        assert_eq!(hash.as_str(), "00abff");
    }

    #[test]
    fn test_only_tar_zst_is_accepted() {
        assert_eq!(
            CompressionFormat::from_file_name("dist.tar.zst"),
            Some(CompressionFormat::TarZstd)
        );
        assert_eq!(
            CompressionFormat::from_file_name("DIST.TAR.ZST"),
            Some(CompressionFormat::TarZstd)
        );
        assert_eq!(CompressionFormat::from_file_name("dist.tar.gz"), None);
        assert_eq!(CompressionFormat::from_file_name("dist.zip"), None);
    }

    #[test]
    fn test_generated_keys_are_unique_and_namespaced() {
        let app = AppId::new();
        let a = BlobKey::generate(app, CompressionFormat::TarZstd);
        let b = BlobKey::generate(app, CompressionFormat::TarZstd);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with(&format!("artifacts/{}/", app)));
        assert!(a.as_str().ends_with(".tar.zst"));
    }
}
