//! Object storage publishing
//!
//! Uploads staged images to blob storage (or the local cache directory in
//! legacy mode) and derives the public URL handed back to callers.

pub mod client;
pub mod local;
pub mod mock;

pub use client::BlobClient;
pub use local::LocalCacheStore;
pub use mock::MockBlobClient;

use crate::models::LocalArtifact;
use crate::Result;
use async_trait::async_trait;

const STORAGE_PREFIX: &str = "upload-";
const FRIENDLY_PREFIX: &str = "generated_image-";

#[async_trait]
pub trait BlobService: Send + Sync {
    /// Upload `artifact` under `object_name` and return its public URL.
    async fn upload(&self, artifact: &LocalArtifact, object_name: &str) -> Result<String>;
}

/// Rewrite storage-assigned `upload-` names to `generated_image-`.
///
/// URLs without the storage prefix are returned unchanged.
pub fn friendly_url(url: &str) -> String {
    url.replace(STORAGE_PREFIX, FRIENDLY_PREFIX)
}
