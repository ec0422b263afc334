//! Remote text-to-image inference
//!
//! Provides the interface the pipeline uses to turn a prompt into an image
//! file on local disk, backed by a hosted Gradio application.

pub mod gradio;
pub mod mock;

pub use gradio::GradioClient;
pub use mock::{MockInferenceClient, MockOutcome};

use crate::models::{GenerationParameters, LocalArtifact};
use crate::Result;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Generate an image for `prompt` and place it inside `workspace`.
    ///
    /// Implementations must write only under `workspace` so the caller can
    /// reclaim every byte by removing that directory.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParameters,
        workspace: &Path,
    ) -> Result<LocalArtifact>;
}
