use super::BlobService;
use crate::models::LocalArtifact;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Route under which the HTTP server exposes [`LocalCacheStore`] files.
pub const LOCAL_IMAGE_ROUTE: &str = "/api/generated_images";

/// Keeps published images in a directory this process serves itself.
pub struct LocalCacheStore {
    dir: PathBuf,
}

impl LocalCacheStore {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        tracing::info!("Serving generated images from {}", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }
}

#[async_trait]
impl BlobService for LocalCacheStore {
    async fn upload(&self, artifact: &LocalArtifact, object_name: &str) -> Result<String> {
        let stem = Path::new(object_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| Error::Publish(format!("Invalid object name: {}", object_name)))?;

        // One file per request; the object name only contributes the stem.
        let filename = format!(
            "{}-{}.{}",
            stem,
            Uuid::new_v4().simple(),
            artifact.format.extension()
        );
        tokio::fs::copy(&artifact.path, self.dir.join(&filename)).await?;

        Ok(format!("{}/{}", LOCAL_IMAGE_ROUTE, filename))
    }
}
