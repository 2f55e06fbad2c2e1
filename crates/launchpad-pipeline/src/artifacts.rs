//! Content-addressed artifact ingestion.
//!
//! An artifact exists at most once per (app, SHA-256). Uploads are verified
//! against the hash the worker claims before anything is recorded, and a
//! build whose bytes already exist for the app is linked to the existing
//! artifact without writing a second blob.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use launchpad_core::artifact::{
    Artifact, ArtifactRole, BlobKey, BlobStore, BuildArtifact, ByteStream, CompressionFormat,
    ContentHash,
};
use launchpad_core::{AppId, ArtifactId, BuildId, Error, Result};
use launchpad_db::{ArtifactRepo, BuildRepo};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ArtifactService {
    builds: Arc<dyn BuildRepo>,
    artifacts: Arc<dyn ArtifactRepo>,
    blobs: Arc<dyn BlobStore>,
}

impl ArtifactService {
    pub fn new(
        builds: Arc<dyn BuildRepo>,
        artifacts: Arc<dyn ArtifactRepo>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            builds,
            artifacts,
            blobs,
        }
    }

    /// Ingest a build's uploaded bundle.
    ///
    /// The file name and claimed hash are validated before storage is
    /// touched. Re-ingesting the same bytes for the same build returns the
    /// artifact recorded the first time; different bytes for a build that
    /// already has a bundle are a conflict.
    pub async fn ingest(
        &self,
        app_id: AppId,
        build_id: BuildId,
        file_name: &str,
        data: ByteStream<'_>,
        claimed_hash: &str,
    ) -> Result<Artifact> {
        let format = CompressionFormat::from_file_name(file_name).ok_or_else(|| {
            Error::UnsupportedArchive(format!(
                "{} (expected a {} file)",
                file_name,
                CompressionFormat::EXTENSION
            ))
        })?;
        let claimed = ContentHash::parse(claimed_hash)?;

        let build = self.builds.get(build_id).await?;
        if build.app_id != app_id {
            return Err(Error::NotFound(format!("build {}", build_id)));
        }
        if let Some(bundle) = self.bundle_for_build(build_id).await? {
            if bundle.content_hash != claimed {
                return Err(Error::Conflict(format!(
                    "build {} already produced artifact {}",
                    build_id, bundle.id
                )));
            }
        }

        if let Some(existing) = self.artifacts.find_by_hash(app_id, &claimed).await? {
            let (actual, size) = digest_stream(data).await?;
            check_hash(&claimed, &actual)?;
            debug!(
                build_id = %build_id,
                artifact_id = %existing.id,
                size_bytes = size,
                "Upload matches an existing artifact"
            );
            self.link(build_id, &existing).await?;
            return Ok(existing);
        }

        let key = BlobKey::generate(app_id, format);
        let size_bytes = self.blobs.put(&key, data).await?;

        let artifact = match self.record(app_id, &claimed, &key, format, size_bytes).await {
            Ok(artifact) => artifact,
            Err(e) => {
                self.discard(&key).await;
                return Err(e);
            }
        };
        let created = artifact.storage_key == key;
        if !created {
            // Another upload of the same bytes committed first.
            self.discard(&key).await;
        }

        if let Err(e) = self.link(build_id, &artifact).await {
            if created {
                self.discard_artifact(&artifact).await;
            }
            return Err(e);
        }
        info!(
            build_id = %build_id,
            artifact_id = %artifact.id,
            content_hash = %artifact.content_hash,
            size_bytes = artifact.size_bytes,
            "Artifact ingested"
        );
        Ok(artifact)
    }

    /// Verify a freshly written blob and record it, returning the artifact
    /// that owns the hash afterwards.
    async fn record(
        &self,
        app_id: AppId,
        claimed: &ContentHash,
        key: &BlobKey,
        format: CompressionFormat,
        size_bytes: u64,
    ) -> Result<Artifact> {
        let (actual, _) = digest_stream(self.blobs.stream(key).await?).await?;
        check_hash(claimed, &actual)?;

        let artifact = Artifact {
            id: ArtifactId::new(),
            app_id,
            content_hash: actual,
            size_bytes,
            storage_key: key.clone(),
            compression_format: format,
            created_at: Utc::now(),
        };
        Ok(self.artifacts.insert(&artifact).await?)
    }

    async fn link(&self, build_id: BuildId, artifact: &Artifact) -> Result<BuildArtifact> {
        let link = BuildArtifact {
            build_id,
            artifact_id: artifact.id,
            role: ArtifactRole::Bundle,
            created_at: Utc::now(),
        };
        Ok(self.artifacts.link(&link).await?)
    }

    async fn discard(&self, key: &BlobKey) {
        if let Err(e) = self.blobs.delete(key).await {
            warn!(key = %key, error = %e, "Failed to delete unused blob");
        }
    }

    /// Remove an artifact this upload created but could not link.
    async fn discard_artifact(&self, artifact: &Artifact) {
        match self.artifacts.delete_unlinked(artifact.id).await {
            Ok(true) => self.discard(&artifact.storage_key).await,
            Ok(false) => {}
            Err(e) => {
                warn!(artifact_id = %artifact.id, error = %e, "Failed to delete unlinked artifact");
            }
        }
    }

    pub async fn get(&self, artifact_id: ArtifactId) -> Result<Artifact> {
        Ok(self.artifacts.get(artifact_id).await?)
    }

    /// The bundle a build produced, if it has uploaded one.
    pub async fn bundle_for_build(&self, build_id: BuildId) -> Result<Option<Artifact>> {
        Ok(self
            .artifacts
            .find_for_build(build_id, ArtifactRole::Bundle)
            .await?)
    }
}

fn check_hash(claimed: &ContentHash, actual: &ContentHash) -> Result<()> {
    if claimed != actual {
        return Err(Error::HashMismatch {
            claimed: claimed.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

async fn digest_stream(mut data: ByteStream<'_>) -> Result<(ContentHash, u64)> {
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    while let Some(chunk) = data.next().await {
        let chunk = chunk.map_err(|e| Error::Storage(e.to_string()))?;
        size += chunk.len() as u64;
        hasher.update(&chunk);
    }
    Ok((ContentHash::from_digest(&hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use launchpad_core::app::App;
    use launchpad_core::build::{BuildJob, BuildStatus};
    use launchpad_db::{AppRepo, DbResult, MemoryStore};
    use launchpad_storage::MemoryBlobStore;

    struct Fixture {
        store: MemoryStore,
        blobs: MemoryBlobStore,
        service: ArtifactService,
        app_id: AppId,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let blobs = MemoryBlobStore::new();
        let app = App::new("storefront", "free");
        AppRepo::create(&store, &app).await.unwrap();
        let service = ArtifactService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(blobs.clone()),
        );
        Fixture {
            store,
            blobs,
            service,
            app_id: app.id,
        }
    }

    async fn new_build(store: &MemoryStore, app_id: AppId) -> BuildId {
        let now = Utc::now();
        let job = BuildJob {
            id: BuildId::new(),
            app_id,
            name: "build".to_string(),
            status: BuildStatus::Running,
            created_at: now,
            updated_at: now,
        };
        BuildRepo::create(store, &job).await.unwrap();
        job.id
    }

    fn body(bytes: &'static [u8]) -> ByteStream<'static> {
        futures::stream::iter(vec![Ok(Bytes::from_static(bytes))]).boxed()
    }

    fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    const BUNDLE: &[u8] = b"pretend this is a zstd tarball";

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let f = fixture().await;
        let build = new_build(&f.store, f.app_id).await;
        let hash = sha256_hex(BUNDLE);

        let first = f
            .service
            .ingest(f.app_id, build, "dist.tar.zst", body(BUNDLE), &hash)
            .await
            .unwrap();
        let second = f
            .service
            .ingest(f.app_id, build, "dist.tar.zst", body(BUNDLE), &hash.to_uppercase())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.size_bytes, BUNDLE.len() as u64);
        assert_eq!(first.content_hash.as_str(), hash);
        assert_eq!(f.blobs.blob_count().await, 1);
        assert_eq!(
            f.service.bundle_for_build(build).await.unwrap().map(|a| a.id),
            Some(first.id)
        );
    }

    #[tokio::test]
    async fn test_identical_builds_share_one_artifact() {
        let f = fixture().await;
        let a = new_build(&f.store, f.app_id).await;
        let b = new_build(&f.store, f.app_id).await;
        let hash = sha256_hex(BUNDLE);

        let first = f
            .service
            .ingest(f.app_id, a, "a.tar.zst", body(BUNDLE), &hash)
            .await
            .unwrap();
        let second = f
            .service
            .ingest(f.app_id, b, "b.tar.zst", body(BUNDLE), &hash)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(f.blobs.blob_count().await, 1);
        let links = f.store.links_for_artifact(first.id).await.unwrap();
        assert_eq!(links.len(), 2);
    }

    #[tokio::test]
    async fn test_hash_mismatch_leaves_nothing_behind() {
        let f = fixture().await;
        let build = new_build(&f.store, f.app_id).await;
        let wrong = sha256_hex(b"some other bytes");

        let result = f
            .service
            .ingest(f.app_id, build, "dist.tar.zst", body(BUNDLE), &wrong)
            .await;
        assert!(matches!(result, Err(Error::HashMismatch { .. })));
        assert_eq!(f.blobs.blob_count().await, 0);
        assert!(f.service.bundle_for_build(build).await.unwrap().is_none());
        let hash = ContentHash::parse(&sha256_hex(BUNDLE)).unwrap();
        assert!(f.store.find_by_hash(f.app_id, &hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mismatch_against_existing_hash_is_rejected() {
        let f = fixture().await;
        let a = new_build(&f.store, f.app_id).await;
        let b = new_build(&f.store, f.app_id).await;
        let hash = sha256_hex(BUNDLE);
        f.service
            .ingest(f.app_id, a, "a.tar.zst", body(BUNDLE), &hash)
            .await
            .unwrap();

        // Claims the known hash but sends different bytes.
        let result = f
            .service
            .ingest(f.app_id, b, "b.tar.zst", body(b"tampered"), &hash)
            .await;
        assert!(matches!(result, Err(Error::HashMismatch { .. })));
        assert!(f.service.bundle_for_build(b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_bundle_for_a_build_is_a_conflict() {
        let f = fixture().await;
        let build = new_build(&f.store, f.app_id).await;
        let first = f
            .service
            .ingest(f.app_id, build, "dist.tar.zst", body(b"one"), &sha256_hex(b"one"))
            .await
            .unwrap();

        let result = f
            .service
            .ingest(f.app_id, build, "dist.tar.zst", body(b"two"), &sha256_hex(b"two"))
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        assert_eq!(f.blobs.blob_count().await, 1);
        let two = ContentHash::parse(&sha256_hex(b"two")).unwrap();
        assert!(f.store.find_by_hash(f.app_id, &two).await.unwrap().is_none());
        assert_eq!(
            f.service.bundle_for_build(build).await.unwrap().map(|a| a.id),
            Some(first.id)
        );
    }

    #[tokio::test]
    async fn test_unlinkable_artifact_is_cleaned_up() {
        let f = fixture().await;
        let build = new_build(&f.store, f.app_id).await;
        let hash = ContentHash::parse(&sha256_hex(b"one")).unwrap();
        let taken = Artifact {
            id: ArtifactId::new(),
            app_id: f.app_id,
            content_hash: ContentHash::parse(&sha256_hex(b"other")).unwrap(),
            size_bytes: 5,
            storage_key: BlobKey::new("elsewhere"),
            compression_format: CompressionFormat::TarZstd,
            created_at: Utc::now(),
        };
        f.store.insert(&taken).await.unwrap();

        // A concurrent upload links the build after the bundle pre-check.
        let racing = RacingLinks {
            store: f.store.clone(),
            build,
            artifact: taken.id,
        };
        let service = ArtifactService::new(
            Arc::new(f.store.clone()),
            Arc::new(racing),
            Arc::new(f.blobs.clone()),
        );
        let result = service
            .ingest(f.app_id, build, "dist.tar.zst", body(b"one"), hash.as_str())
            .await;

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(f.blobs.blob_count().await, 0);
        assert!(f.store.find_by_hash(f.app_id, &hash).await.unwrap().is_none());
    }

    /// Links `build` to `artifact` right before the service's own link.
    struct RacingLinks {
        store: MemoryStore,
        build: BuildId,
        artifact: ArtifactId,
    }

    #[async_trait::async_trait]
    impl ArtifactRepo for RacingLinks {
        async fn get(&self, id: ArtifactId) -> DbResult<Artifact> {
            ArtifactRepo::get(&self.store, id).await
        }

        async fn find_by_hash(
            &self,
            app_id: AppId,
            hash: &ContentHash,
        ) -> DbResult<Option<Artifact>> {
            self.store.find_by_hash(app_id, hash).await
        }

        async fn insert(&self, artifact: &Artifact) -> DbResult<Artifact> {
            self.store.insert(artifact).await
        }

        async fn link(&self, link: &BuildArtifact) -> DbResult<BuildArtifact> {
            self.store
                .link(&BuildArtifact {
                    artifact_id: self.artifact,
                    build_id: self.build,
                    ..link.clone()
                })
                .await?;
            self.store.link(link).await
        }

        async fn find_for_build(
            &self,
            build_id: BuildId,
            role: ArtifactRole,
        ) -> DbResult<Option<Artifact>> {
            self.store.find_for_build(build_id, role).await
        }

        async fn links_for_artifact(
            &self,
            artifact_id: ArtifactId,
        ) -> DbResult<Vec<BuildArtifact>> {
            self.store.links_for_artifact(artifact_id).await
        }

        async fn delete_unlinked(&self, id: ArtifactId) -> DbResult<bool> {
            self.store.delete_unlinked(id).await
        }
    }

    #[tokio::test]
    async fn test_validation_happens_before_storage() {
        let f = fixture().await;
        let build = new_build(&f.store, f.app_id).await;
        let hash = sha256_hex(BUNDLE);

        let result = f
            .service
            .ingest(f.app_id, build, "dist.zip", body(BUNDLE), &hash)
            .await;
        assert!(matches!(result, Err(Error::UnsupportedArchive(_))));

        let result = f
            .service
            .ingest(f.app_id, build, "dist.tar.zst", body(BUNDLE), "")
            .await;
        assert!(matches!(result, Err(Error::MissingHash)));

        let result = f
            .service
            .ingest(f.app_id, build, "dist.tar.zst", body(BUNDLE), "abc123")
            .await;
        assert!(matches!(result, Err(Error::InvalidHash(_))));

        assert_eq!(f.blobs.blob_count().await, 0);
    }

    #[tokio::test]
    async fn test_build_must_belong_to_app() {
        let f = fixture().await;
        let other = App::new("other", "free");
        AppRepo::create(&f.store, &other).await.unwrap();
        let foreign = new_build(&f.store, other.id).await;

        let result = f
            .service
            .ingest(f.app_id, foreign, "dist.tar.zst", body(BUNDLE), &sha256_hex(BUNDLE))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(f.blobs.blob_count().await, 0);
    }
}
