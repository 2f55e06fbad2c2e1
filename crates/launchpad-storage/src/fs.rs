//! Filesystem blob store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use launchpad_core::artifact::{BlobKey, BlobStore, ByteStream};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{StorageError, StorageResult};

/// Stores each blob as a file under `root`, at the path named by its key.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &BlobKey) -> StorageResult<PathBuf> {
        let relative = Path::new(key.as_str());
        let clean = !key.as_str().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn write_stream(
        &self,
        path: &Path,
        mut data: ByteStream<'_>,
    ) -> StorageResult<u64> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = data.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &BlobKey, data: ByteStream<'_>) -> launchpad_core::Result<u64> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StorageError::from)?;
        }

        // Readers never see a half-written blob under the final key.
        let partial = path.with_extension("partial");
        match self.write_stream(&partial, data).await {
            Ok(written) => {
                tokio::fs::rename(&partial, &path)
                    .await
                    .map_err(StorageError::from)?;
                debug!(key = %key, bytes = written, "Stored blob");
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(e.into())
            }
        }
    }

    async fn stream(&self, key: &BlobKey) -> launchpad_core::Result<ByteStream<'static>> {
        let path = self.path_for(key)?;
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn exists(&self, key: &BlobKey) -> launchpad_core::Result<bool> {
        let path = self.path_for(key)?;
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(StorageError::from)?;
        Ok(exists)
    }

    async fn delete(&self, key: &BlobKey) -> launchpad_core::Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e).into()),
        }
    }
}
