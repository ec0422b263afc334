use super::ImageService;
use crate::models::{ArtifactFormat, LocalArtifact};
use crate::{Error, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use little_exif::metadata::Metadata;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Transcodes generated images on the blocking thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageProcessor;

impl ImageProcessor {
    pub fn new() -> Self {
        Self
    }

    fn transcode_sync(source: PathBuf, dest: PathBuf, target: ArtifactFormat) -> Result<()> {
        let data = std::fs::read(&source)?;
        let img = image::load_from_memory(&data)?;

        // Always carry an alpha channel so both encoders see the same layout.
        let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
        let format = match target {
            ArtifactFormat::WebP => ImageFormat::WebP,
            ArtifactFormat::Png => ImageFormat::Png,
        };
        rgba.save_with_format(&dest, format)?;
        Ok(())
    }

    async fn transcode(&self, source: &Path, dest: &Path, target: ArtifactFormat) -> Result<()> {
        tokio::task::spawn_blocking({
            let source = source.to_path_buf();
            let dest = dest.to_path_buf();
            move || Self::transcode_sync(source, dest, target)
        })
        .await
        .map_err(|e| Error::Staging(format!("Image processing task join error: {}", e)))?
    }
}

#[async_trait]
impl ImageService for ImageProcessor {
    async fn stage(
        &self,
        artifact: LocalArtifact,
        target: ArtifactFormat,
        workspace: &Path,
    ) -> Result<LocalArtifact> {
        if artifact.format == target {
            return Ok(artifact);
        }

        let dest = workspace.join(format!("staged-{}.{}", Uuid::new_v4(), target.extension()));
        tracing::debug!(
            "Transcoding {} to {}",
            artifact.path.display(),
            dest.display()
        );

        self.transcode(&artifact.path, &dest, target).await?;
        if let Err(e) = Metadata::file_clear_metadata(&dest) {
            tracing::warn!("Failed to strip metadata from staged image: {}", e);
        }

        Ok(LocalArtifact::new(dest, target))
    }
}
