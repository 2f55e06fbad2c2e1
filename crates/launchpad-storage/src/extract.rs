//! Unpacking SPA bundles into served-file directories.
//!
//! Each deployment gets its own directory, `{served_root}/{app_id}/{deployment_id}`.
//! Bundles are unpacked into a hidden staging directory first and renamed
//! into place only once every entry has been written, so a failed
//! extraction never leaves a partial tree behind.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use launchpad_core::artifact::{Artifact, BlobStore};
use launchpad_core::deployment::{ExtractionSummary, Extractor};
use launchpad_core::{AppId, DeploymentId};
use tokio::task::spawn_blocking;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{debug, info};

use crate::{StorageError, StorageResult};

/// Default ceiling on the total size of the files a bundle may unpack to.
pub const MAX_UNPACKED_BYTES: u64 = 4 * 1024 * 1024 * 1024;

pub struct LocalExtractor {
    blobs: Arc<dyn BlobStore>,
    served_root: PathBuf,
    max_unpacked_bytes: u64,
}

impl LocalExtractor {
    pub fn new(blobs: Arc<dyn BlobStore>, served_root: impl Into<PathBuf>) -> Self {
        Self {
            blobs,
            served_root: served_root.into(),
            max_unpacked_bytes: MAX_UNPACKED_BYTES,
        }
    }

    pub fn with_max_unpacked_bytes(mut self, limit: u64) -> Self {
        self.max_unpacked_bytes = limit;
        self
    }

    /// Directory a deployment's files are served from.
    pub fn deployment_dir(&self, app_id: AppId, deployment_id: DeploymentId) -> PathBuf {
        self.served_root
            .join(app_id.to_string())
            .join(deployment_id.to_string())
    }
}

#[async_trait]
impl Extractor for LocalExtractor {
    async fn extract(
        &self,
        artifact: &Artifact,
        deployment_id: DeploymentId,
    ) -> launchpad_core::Result<ExtractionSummary> {
        let stream = self.blobs.stream(&artifact.storage_key).await?;
        let reader = SyncIoBridge::new(StreamReader::new(stream));

        let dest = self.deployment_dir(artifact.app_id, deployment_id);
        let staging = dest.with_file_name(format!(".{}.partial", deployment_id));
        let limit = self.max_unpacked_bytes;
        debug!(
            deployment_id = %deployment_id,
            artifact_id = %artifact.id,
            compressed_size = artifact.size_bytes,
            "Extracting bundle"
        );

        let summary = spawn_blocking(move || unpack_bundle(reader, limit, &staging, &dest))
            .await
            .map_err(StorageError::from)??;

        info!(
            deployment_id = %deployment_id,
            files = summary.files,
            bytes = summary.bytes,
            "Extracted bundle"
        );
        Ok(summary)
    }
}

fn unpack_bundle(
    reader: impl Read,
    limit: u64,
    staging: &Path,
    dest: &Path,
) -> StorageResult<ExtractionSummary> {
    if staging.exists() {
        std::fs::remove_dir_all(staging)?;
    }
    std::fs::create_dir_all(staging)?;

    match unpack_into(reader, limit, staging) {
        Ok(summary) => {
            if dest.exists() {
                std::fs::remove_dir_all(dest)?;
            }
            std::fs::rename(staging, dest)?;
            Ok(summary)
        }
        Err(e) => {
            let _ = std::fs::remove_dir_all(staging);
            Err(e)
        }
    }
}

fn unpack_into(reader: impl Read, limit: u64, dir: &Path) -> StorageResult<ExtractionSummary> {
    let archive_err = |e: std::io::Error| StorageError::Archive(e.to_string());

    let decoder = zstd::stream::read::Decoder::new(reader).map_err(archive_err)?;
    let mut archive = tar::Archive::new(decoder);
    let mut summary = ExtractionSummary::default();

    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let path = entry.path().map_err(archive_err)?.into_owned();
        let kind = entry.header().entry_type();

        if kind.is_symlink() || kind.is_hard_link() {
            return Err(StorageError::Archive(format!(
                "links are not allowed: {}",
                path.display()
            )));
        }

        let size = entry.size();
        if summary.bytes.saturating_add(size) > limit {
            return Err(StorageError::Archive(format!(
                "bundle unpacks to more than {} bytes",
                limit
            )));
        }
        if !entry.unpack_in(dir).map_err(archive_err)? {
            return Err(StorageError::Archive(format!(
                "entry escapes the deployment directory: {}",
                path.display()
            )));
        }
        if kind.is_file() {
            summary.files += 1;
            summary.bytes += size;
        }
    }

    if summary.files == 0 {
        return Err(StorageError::Archive("archive contains no files".to_string()));
    }
    Ok(summary)
}

/// Build a `.tar.zst` bundle from in-memory files.
pub fn pack_bundle(files: &[(&str, &[u8])]) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *contents)?;
    }
    let tar_data = builder.into_inner()?;
    zstd::encode_all(Cursor::new(tar_data), 3)
}
