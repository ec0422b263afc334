use super::InferenceService;
use crate::models::{ArtifactFormat, GenerationParameters, LocalArtifact};
use crate::{Error, Result};
use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Scripted result of one mock inference call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Write a small image of the given format into the workspace.
    Image(ArtifactFormat),
    /// Report a path that does not exist.
    MissingFile,
    Timeout,
    Status(u16),
    Rejected(String),
}

#[derive(Clone)]
pub struct MockInferenceClient {
    outcomes: Arc<Mutex<Vec<MockOutcome>>>,
    call_count: Arc<Mutex<usize>>,
    prompts: Arc<Mutex<Vec<String>>>,
    artifacts: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockInferenceClient {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(Mutex::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
            artifacts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue an outcome. Outcomes are consumed in order; once exhausted every
    /// call succeeds with a WebP image.
    pub fn with_outcome(self, outcome: MockOutcome) -> Self {
        self.outcomes.lock().unwrap().push(outcome);
        self
    }

    pub fn get_call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn get_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Paths of every artifact this mock has written.
    pub fn get_artifacts(&self) -> Vec<PathBuf> {
        self.artifacts.lock().unwrap().clone()
    }

    fn next_outcome(&self) -> MockOutcome {
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            MockOutcome::Image(ArtifactFormat::WebP)
        } else {
            outcomes.remove(0)
        }
    }
}

impl Default for MockInferenceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceService for MockInferenceClient {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParameters,
        workspace: &Path,
    ) -> Result<LocalArtifact> {
        *self.call_count.lock().unwrap() += 1;
        self.prompts.lock().unwrap().push(prompt.to_string());

        match self.next_outcome() {
            MockOutcome::Image(format) => {
                let path =
                    workspace.join(format!("inference-{}.{}", Uuid::new_v4(), format.extension()));
                tokio::fs::write(&path, placeholder_image(format)?).await?;
                self.artifacts.lock().unwrap().push(path.clone());
                Ok(LocalArtifact::new(path, format))
            }
            MockOutcome::MissingFile => Ok(LocalArtifact::new(
                workspace.join("never-written.webp"),
                ArtifactFormat::WebP,
            )),
            MockOutcome::Timeout => Err(Error::Timeout("mock inference timed out".to_string())),
            MockOutcome::Status(status) => Err(Error::Upstream {
                status,
                body: format!("mock status {}", status),
            }),
            MockOutcome::Rejected(message) => Err(Error::Inference(message)),
        }
    }
}

/// Encode a tiny opaque image, used wherever a real generated file is needed.
pub fn placeholder_image(format: ArtifactFormat) -> Result<Vec<u8>> {
    let img = RgbaImage::from_pixel(8, 8, Rgba([200, 40, 20, 255]));
    let image_format = match format {
        ArtifactFormat::WebP => ImageFormat::WebP,
        ArtifactFormat::Png => ImageFormat::Png,
    };

    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image_format)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::detect_format;

    #[tokio::test]
    async fn test_mock_default_writes_webp() {
        let workspace = tempfile::tempdir().unwrap();
        let client = MockInferenceClient::new();

        let artifact = client
            .generate("a fox", &GenerationParameters::default(), workspace.path())
            .await
            .unwrap();

        let bytes = std::fs::read(&artifact.path).unwrap();
        assert_eq!(detect_format(&bytes), Some(ArtifactFormat::WebP));
        assert_eq!(client.get_call_count(), 1);
        assert_eq!(client.get_prompts(), vec!["a fox".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_consumes_outcomes_in_order() {
        let workspace = tempfile::tempdir().unwrap();
        let client = MockInferenceClient::new()
            .with_outcome(MockOutcome::Timeout)
            .with_outcome(MockOutcome::Status(404));
        let params = GenerationParameters::default();

        let first = client.generate("p", &params, workspace.path()).await;
        assert!(matches!(first, Err(Error::Timeout(_))));

        let second = client.generate("p", &params, workspace.path()).await;
        assert!(matches!(second, Err(Error::Upstream { status: 404, .. })));

        assert!(client.generate("p", &params, workspace.path()).await.is_ok());
        assert_eq!(client.get_call_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_missing_file_is_not_written() {
        let workspace = tempfile::tempdir().unwrap();
        let client = MockInferenceClient::new().with_outcome(MockOutcome::MissingFile);

        let artifact = client
            .generate("p", &GenerationParameters::default(), workspace.path())
            .await
            .unwrap();

        assert!(!artifact.path.exists());
        assert!(client.get_artifacts().is_empty());
    }
}
