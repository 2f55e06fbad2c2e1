//! In-memory blob store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use launchpad_core::artifact::{BlobKey, BlobStore, ByteStream};
use tokio::sync::RwLock;

use crate::StorageError;

/// Size of the chunks a stored blob is streamed back in.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<BlobKey, Bytes>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored.
    pub async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Keys of all stored blobs.
    pub async fn keys(&self) -> Vec<BlobKey> {
        self.blobs.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &BlobKey, mut data: ByteStream<'_>) -> launchpad_core::Result<u64> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = data.next().await {
            let chunk = chunk.map_err(StorageError::from)?;
            buf.extend_from_slice(&chunk);
        }
        let written = buf.len() as u64;
        self.blobs.write().await.insert(key.clone(), buf.freeze());
        Ok(written)
    }

    async fn stream(&self, key: &BlobKey) -> launchpad_core::Result<ByteStream<'static>> {
        let blob = self
            .blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        let chunks: Vec<std::io::Result<Bytes>> = (0..blob.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(blob.slice(start..(start + CHUNK_SIZE).min(blob.len()))))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn exists(&self, key: &BlobKey) -> launchpad_core::Result<bool> {
        Ok(self.blobs.read().await.contains_key(key))
    }

    async fn delete(&self, key: &BlobKey) -> launchpad_core::Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}
