//! Image staging and format conversion
//!
//! Prepares a generated image for upload: transcodes it when the storage
//! contract wants a different format, otherwise passes it through untouched.

pub mod mime;
pub mod mock;
pub mod processor;

pub use mime::detect_format;
pub use mock::MockImageProcessor;
pub use processor::ImageProcessor;

use crate::models::{ArtifactFormat, LocalArtifact};
use crate::Result;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait ImageService: Send + Sync {
    /// Produce an artifact in `target` format, writing any new file under
    /// `workspace`.
    async fn stage(
        &self,
        artifact: LocalArtifact,
        target: ArtifactFormat,
        workspace: &Path,
    ) -> Result<LocalArtifact>;
}
