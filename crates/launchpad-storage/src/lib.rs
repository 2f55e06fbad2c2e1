//! Blob storage backends and bundle extraction.
//!
//! - [`LocalBlobStore`] keeps artifact blobs on the local filesystem
//! - [`MemoryBlobStore`] keeps them in memory for tests
//! - [`LocalExtractor`] unpacks `.tar.zst` bundles into per-deployment
//!   served-file directories

pub mod error;
pub mod extract;
pub mod fs;
pub mod memory;

pub use error::{StorageError, StorageResult};
pub use extract::{LocalExtractor, pack_bundle};
pub use fs::LocalBlobStore;
pub use memory::MemoryBlobStore;
