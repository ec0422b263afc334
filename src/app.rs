//! Pipeline orchestration: prompt in, hosted image URL out.

use crate::blob::{friendly_url, BlobClient, BlobService, LocalCacheStore};
use crate::error::{PipelineError, Stage};
use crate::image::{ImageProcessor, ImageService};
use crate::inference::{GradioClient, InferenceService};
use crate::models::{
    ArtifactFormat, Config, GenerationParameters, GenerationRequest, LocalArtifact,
    PublishMode, PublishedImage,
};
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Knobs that shape a pipeline run; fixed after startup.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub params: GenerationParameters,
    pub output_format: ArtifactFormat,
    /// File name stem; the extension follows the staged format.
    pub object_name: String,
    pub rewrite_urls: bool,
    pub staging_dir: PathBuf,
    pub inference_retry: RetryPolicy,
    pub upload_retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            params: GenerationParameters::default(),
            output_format: config.output_format,
            object_name: config.object_name.clone(),
            rewrite_urls: config.rewrite_urls,
            staging_dir: config.staging_dir.clone(),
            inference_retry: RetryPolicy::new(
                config.inference_max_attempts,
                config.retry_base_delay,
            ),
            upload_retry: RetryPolicy::new(config.upload_max_attempts, config.retry_base_delay),
        }
    }
}

/// Coordinates inference, staging, and publishing for each request.
pub struct App {
    inference: Box<dyn InferenceService>,
    image: Box<dyn ImageService>,
    blob: Box<dyn BlobService>,
    settings: PipelineSettings,
}

/// Injectable service bundle used to construct [`App`] in tests/harnesses.
pub struct AppServices {
    pub inference: Box<dyn InferenceService>,
    pub image: Box<dyn ImageService>,
    pub blob: Box<dyn BlobService>,
}

/// Extract the prompt, rejecting absent or blank input.
pub fn validate_request(request: &GenerationRequest) -> Result<&str> {
    match request.text_part.as_deref() {
        Some(prompt) if !prompt.trim().is_empty() => Ok(prompt),
        _ => Err(Error::Validation("Prompt is required".to_string())),
    }
}

impl App {
    /// Build an app from concrete service dependencies.
    pub fn with_services(services: AppServices, settings: PipelineSettings) -> Self {
        Self {
            inference: services.inference,
            image: services.image,
            blob: services.blob,
            settings,
        }
    }

    /// Construct the production pipeline from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        info!(
            "Inference endpoint: {} (/{})",
            config.inference_base_url, config.inference_api_name
        );
        let inference = Box::new(GradioClient::from_config(config)?);

        let blob: Box<dyn BlobService> = match config.publish_mode {
            PublishMode::Blob => {
                info!("Publishing to blob storage at {}", config.blob_upload_url);
                Box::new(BlobClient::from_config(config)?)
            }
            PublishMode::Local => Box::new(LocalCacheStore::new(&config.local_image_dir)?),
        };

        Ok(Self::with_services(
            AppServices {
                inference,
                image: Box::new(ImageProcessor::new()),
                blob,
            },
            PipelineSettings::from_config(config),
        ))
    }

    /// Run the whole pipeline for one request.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<PublishedImage, PipelineError> {
        let prompt = validate_request(request).map_err(PipelineError::at(Stage::Validation))?;

        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("generate", %request_id);
        self.run(prompt, request_id)
            .instrument(span)
            .await
            .map_err(|e| {
                error!("Pipeline failed at {}: {}", e.stage, e.error);
                e
            })
    }

    async fn run(
        &self,
        prompt: &str,
        request_id: Uuid,
    ) -> std::result::Result<PublishedImage, PipelineError> {
        info!("Generating image for prompt ({} chars)", prompt.len());

        // Every local file of this run lives here; dropping it removes them.
        let workspace = self
            .open_workspace(request_id)
            .map_err(PipelineError::at(Stage::Staging))?;

        let artifact = self
            .invoke(prompt, workspace.path())
            .await
            .map_err(PipelineError::at(Stage::Inference))?;
        info!("Generated image at {}", artifact.path.display());

        let staged = self
            .image
            .stage(artifact, self.settings.output_format, workspace.path())
            .await
            .map_err(PipelineError::at(Stage::Staging))?;

        let object_name = format!(
            "{}.{}",
            self.settings.object_name,
            staged.format.extension()
        );
        let url = self
            .publish(&staged, &object_name)
            .await
            .map_err(PipelineError::at(Stage::Publishing))?;

        let url = if self.settings.rewrite_urls {
            friendly_url(&url)
        } else {
            url
        };

        if let Err(e) = workspace.close() {
            warn!("Failed to remove staging workspace: {}", e);
        }

        info!("Published image to {}", url);
        Ok(PublishedImage { url })
    }

    fn open_workspace(&self, request_id: Uuid) -> Result<TempDir> {
        std::fs::create_dir_all(&self.settings.staging_dir)?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("req-{}-", request_id))
            .tempdir_in(&self.settings.staging_dir)?;
        Ok(workspace)
    }

    async fn invoke(&self, prompt: &str, workspace: &Path) -> Result<LocalArtifact> {
        let inference = self.inference.as_ref();
        let params = &self.settings.params;

        self.settings
            .inference_retry
            .run("inference", move || async move {
                let artifact = inference.generate(prompt, params, workspace).await?;
                if !tokio::fs::try_exists(&artifact.path).await.unwrap_or(false) {
                    warn!("Generated image missing at {}", artifact.path.display());
                    return Err(Error::MissingArtifact(artifact.path));
                }
                Ok(artifact)
            })
            .await
    }

    async fn publish(&self, artifact: &LocalArtifact, object_name: &str) -> Result<String> {
        let blob = self.blob.as_ref();

        self.settings
            .upload_retry
            .run("upload", move || async move {
                blob.upload(artifact, object_name).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MockBlobClient;
    use crate::image::MockImageProcessor;
    use crate::inference::{MockInferenceClient, MockOutcome};
    use std::time::Duration;

    struct Harness {
        app: App,
        inference: MockInferenceClient,
        blob: MockBlobClient,
        staging: tempfile::TempDir,
    }

    fn settings(staging_dir: &Path) -> PipelineSettings {
        PipelineSettings {
            params: GenerationParameters::default(),
            output_format: ArtifactFormat::WebP,
            object_name: "generated_image".to_string(),
            rewrite_urls: true,
            staging_dir: staging_dir.to_path_buf(),
            inference_retry: RetryPolicy::new(3, Duration::from_millis(1)),
            upload_retry: RetryPolicy::new(2, Duration::from_millis(1)),
        }
    }

    fn harness_with(
        inference: MockInferenceClient,
        image: Box<dyn ImageService>,
        blob: MockBlobClient,
        configure: impl FnOnce(&mut PipelineSettings),
    ) -> Harness {
        let staging = tempfile::tempdir().unwrap();
        let mut settings = settings(&staging.path().join("staging"));
        configure(&mut settings);

        let app = App::with_services(
            AppServices {
                inference: Box::new(inference.clone()),
                image,
                blob: Box::new(blob.clone()),
            },
            settings,
        );

        Harness {
            app,
            inference,
            blob,
            staging,
        }
    }

    fn harness(inference: MockInferenceClient, blob: MockBlobClient) -> Harness {
        harness_with(inference, Box::new(ImageProcessor::new()), blob, |_| {})
    }

    fn leftover_files(harness: &Harness) -> usize {
        std::fs::read_dir(harness.staging.path().join("staging"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_validate_request() {
        assert_eq!(
            validate_request(&GenerationRequest::with_prompt("a red fox")).unwrap(),
            "a red fox"
        );
        assert!(matches!(
            validate_request(&GenerationRequest::default()),
            Err(Error::Validation(_))
        ));
        assert!(validate_request(&GenerationRequest::with_prompt("")).is_err());
        assert!(validate_request(&GenerationRequest::with_prompt("   ")).is_err());
    }

    #[tokio::test]
    async fn test_empty_prompt_makes_no_remote_calls() {
        let h = harness(MockInferenceClient::new(), MockBlobClient::new());

        let err = h
            .app
            .generate(&GenerationRequest::with_prompt(""))
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Validation);
        assert_eq!(err.error.to_string(), "Prompt is required");
        assert_eq!(h.inference.get_call_count(), 0);
        assert_eq!(h.blob.get_upload_count(), 0);
        assert!(!h.staging.path().join("staging").exists());
    }

    #[tokio::test]
    async fn test_success_rewrites_url_and_cleans_up() {
        let h = harness(
            MockInferenceClient::new(),
            MockBlobClient::new().with_base_url("https://blob.example".to_string()),
        );

        let image = h
            .app
            .generate(&GenerationRequest::with_prompt("a red fox in snow"))
            .await
            .unwrap();

        assert!(image
            .url
            .starts_with("https://blob.example/generated_image-"));
        assert!(image.url.ends_with("-generated_image.webp"));
        assert_eq!(h.inference.get_prompts(), vec!["a red fox in snow"]);
        assert_eq!(leftover_files(&h), 0);
    }

    #[tokio::test]
    async fn test_rewrite_can_be_disabled() {
        let h = harness_with(
            MockInferenceClient::new(),
            Box::new(ImageProcessor::new()),
            MockBlobClient::new(),
            |s| s.rewrite_urls = false,
        );

        let image = h
            .app
            .generate(&GenerationRequest::with_prompt("prompt"))
            .await
            .unwrap();

        assert!(image.url.contains("/upload-"));
    }

    #[tokio::test]
    async fn test_png_output_uses_png_object_name() {
        let h = harness_with(
            MockInferenceClient::new(),
            Box::new(ImageProcessor::new()),
            MockBlobClient::new(),
            |s| s.output_format = ArtifactFormat::Png,
        );

        let image = h
            .app
            .generate(&GenerationRequest::with_prompt("prompt"))
            .await
            .unwrap();

        assert!(image.url.ends_with("generated_image.png"));
        let files = h.blob.get_files();
        let bytes = files.values().next().unwrap();
        assert_eq!(crate::image::detect_format(bytes), Some(ArtifactFormat::Png));
        assert_eq!(leftover_files(&h), 0);
    }

    #[tokio::test]
    async fn test_inference_timeouts_are_retried() {
        let h = harness(
            MockInferenceClient::new()
                .with_outcome(MockOutcome::Timeout)
                .with_outcome(MockOutcome::Timeout),
            MockBlobClient::new(),
        );

        let image = h
            .app
            .generate(&GenerationRequest::with_prompt("prompt"))
            .await
            .unwrap();

        assert!(!image.url.is_empty());
        assert_eq!(h.inference.get_call_count(), 3);
    }

    #[tokio::test]
    async fn test_inference_retry_budget_is_bounded() {
        let h = harness(
            MockInferenceClient::new()
                .with_outcome(MockOutcome::Status(503))
                .with_outcome(MockOutcome::Timeout)
                .with_outcome(MockOutcome::Status(502)),
            MockBlobClient::new(),
        );

        let err = h
            .app
            .generate(&GenerationRequest::with_prompt("prompt"))
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Inference);
        assert_eq!(h.inference.get_call_count(), 3);
        assert_eq!(h.blob.get_upload_count(), 0);
        assert_eq!(leftover_files(&h), 0);
    }

    #[tokio::test]
    async fn test_terminal_inference_errors_are_not_retried() {
        let h = harness(
            MockInferenceClient::new().with_outcome(MockOutcome::Rejected(
                "prompt rejected".to_string(),
            )),
            MockBlobClient::new(),
        );

        let err = h
            .app
            .generate(&GenerationRequest::with_prompt("prompt"))
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Inference);
        assert_eq!(h.inference.get_call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_reported() {
        let h = harness(
            MockInferenceClient::new().with_outcome(MockOutcome::MissingFile),
            MockBlobClient::new(),
        );

        let err = h
            .app
            .generate(&GenerationRequest::with_prompt("prompt"))
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Inference);
        assert!(matches!(err.error, Error::MissingArtifact(_)));
        assert_eq!(h.inference.get_call_count(), 1);
        assert_eq!(h.blob.get_upload_count(), 0);
    }

    #[tokio::test]
    async fn test_staging_failure_cleans_up() {
        let h = harness_with(
            MockInferenceClient::new(),
            Box::new(MockImageProcessor::new().with_failure(true)),
            MockBlobClient::new(),
            |_| {},
        );

        let err = h
            .app
            .generate(&GenerationRequest::with_prompt("prompt"))
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Staging);
        assert_eq!(h.blob.get_upload_count(), 0);
        assert_eq!(leftover_files(&h), 0);
    }

    #[tokio::test]
    async fn test_upload_server_error_is_retried_once() {
        let h = harness(
            MockInferenceClient::new(),
            MockBlobClient::new().with_failure(503),
        );

        h.app
            .generate(&GenerationRequest::with_prompt("prompt"))
            .await
            .unwrap();
        assert_eq!(h.blob.get_upload_count(), 2);

        let h = harness(
            MockInferenceClient::new(),
            MockBlobClient::new().with_failure(500).with_failure(502),
        );
        let err = h
            .app
            .generate(&GenerationRequest::with_prompt("prompt"))
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Publishing);
        assert_eq!(h.blob.get_upload_count(), 2);
        assert_eq!(leftover_files(&h), 0);
    }

    #[tokio::test]
    async fn test_upload_timeout_is_retried_once_then_fails() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "url": "https://blob.example/upload-a.webp" }))
                    .set_delay(Duration::from_secs(2)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let staging = tempfile::tempdir().unwrap();
        let blob = BlobClient::new(
            server.uri(),
            "blob-token".to_string(),
            Duration::from_millis(100),
        )
        .unwrap();
        let app = App::with_services(
            AppServices {
                inference: Box::new(MockInferenceClient::new()),
                image: Box::new(ImageProcessor::new()),
                blob: Box::new(blob),
            },
            settings(&staging.path().join("staging")),
        );

        let err = app
            .generate(&GenerationRequest::with_prompt("prompt"))
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Publishing);
        assert!(err.error.is_transient());
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
        assert_eq!(
            std::fs::read_dir(staging.path().join("staging")).unwrap().count(),
            0
        );
    }

    #[tokio::test]
    async fn test_upload_rejection_is_terminal_and_cleans_up() {
        let h = harness(
            MockInferenceClient::new(),
            MockBlobClient::new().with_failure(403),
        );

        let err = h
            .app
            .generate(&GenerationRequest::with_prompt("prompt"))
            .await
            .unwrap_err();

        assert_eq!(err.stage, Stage::Publishing);
        assert!(matches!(
            err.error,
            Error::PublishRejected { status: 403, .. }
        ));
        assert_eq!(h.blob.get_upload_count(), 1);
        assert_eq!(leftover_files(&h), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_use_separate_workspaces() {
        let h = harness(MockInferenceClient::new(), MockBlobClient::new());
        let request = GenerationRequest::with_prompt("same prompt");

        let (first, second) = tokio::join!(h.app.generate(&request), h.app.generate(&request));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_ne!(first.url, second.url);

        let artifacts = h.inference.get_artifacts();
        assert_eq!(artifacts.len(), 2);
        assert_ne!(artifacts[0], artifacts[1]);
        assert_ne!(artifacts[0].parent(), artifacts[1].parent());
        assert_eq!(h.blob.get_files().len(), 2);
        assert_eq!(leftover_files(&h), 0);
    }
}
