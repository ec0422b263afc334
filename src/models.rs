//! Data models and structures
//!
//! Defines the request/response bodies of the HTTP surface, the artifacts
//! passed between pipeline stages, and the process-wide configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationRequest {
    #[serde(rename = "textPart")]
    pub text_part: Option<String>,
    /// Only meaningful to the term-extraction endpoint; accepted and ignored.
    #[serde(rename = "studyLevel", alias = "level")]
    pub study_level: Option<String>,
}

impl GenerationRequest {
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            text_part: Some(prompt.into()),
            study_level: None,
        }
    }
}

/// Fixed parameter set sent with every inference call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationParameters {
    pub seed: u64,
    pub randomize_seed: bool,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            seed: 0,
            randomize_seed: true,
            width: 1024,
            height: 1024,
            steps: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    WebP,
    Png,
}

impl ArtifactFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactFormat::WebP => "webp",
            ArtifactFormat::Png => "png",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArtifactFormat::WebP => "image/webp",
            ArtifactFormat::Png => "image/png",
        }
    }
}

impl FromStr for ArtifactFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webp" => Ok(ArtifactFormat::WebP),
            "png" => Ok(ArtifactFormat::Png),
            other => Err(Error::Config(format!(
                "Unsupported output format '{}'. Expected webp or png",
                other
            ))),
        }
    }
}

/// A generated or staged image on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    pub path: PathBuf,
    pub format: ArtifactFormat,
}

impl LocalArtifact {
    pub fn new(path: impl Into<PathBuf>, format: ArtifactFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedImage {
    #[serde(rename = "imageUrl")]
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Upload to remote blob storage.
    Blob,
    /// Keep images in a local directory served by this process.
    Local,
}

impl FromStr for PublishMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blob" => Ok(PublishMode::Blob),
            "local" => Ok(PublishMode::Local),
            other => Err(Error::Config(format!(
                "Unsupported publish mode '{}'. Expected blob or local",
                other
            ))),
        }
    }
}

pub const DEFAULT_INFERENCE_BASE_URL: &str = "https://black-forest-labs-flux-1-schnell.hf.space";
pub const DEFAULT_BLOB_UPLOAD_URL: &str = "https://blob.vercel-storage.com";

// Configuration
#[derive(Clone)]
pub struct Config {
    pub hf_token: Option<String>,
    pub blob_token: Option<String>,
    pub port: u16,
    pub inference_base_url: String,
    pub inference_api_name: String,
    pub inference_timeout: Duration,
    pub inference_max_attempts: usize,
    pub blob_upload_url: String,
    pub upload_timeout: Duration,
    pub upload_max_attempts: usize,
    pub retry_base_delay: Duration,
    pub output_format: ArtifactFormat,
    pub object_name: String,
    pub rewrite_urls: bool,
    pub publish_mode: PublishMode,
    pub local_image_dir: PathBuf,
    pub staging_dir: PathBuf,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("hf_token", &self.hf_token.as_ref().map(|_| "<redacted>"))
            .field("blob_token", &self.blob_token.as_ref().map(|_| "<redacted>"))
            .field("port", &self.port)
            .field("inference_base_url", &self.inference_base_url)
            .field("inference_api_name", &self.inference_api_name)
            .field("inference_timeout", &self.inference_timeout)
            .field("inference_max_attempts", &self.inference_max_attempts)
            .field("blob_upload_url", &self.blob_upload_url)
            .field("upload_timeout", &self.upload_timeout)
            .field("upload_max_attempts", &self.upload_max_attempts)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("output_format", &self.output_format)
            .field("object_name", &self.object_name)
            .field("rewrite_urls", &self.rewrite_urls)
            .field("publish_mode", &self.publish_mode)
            .field("local_image_dir", &self.local_image_dir)
            .field("staging_dir", &self.staging_dir)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hf_token: None,
            blob_token: None,
            port: 3000,
            inference_base_url: DEFAULT_INFERENCE_BASE_URL.to_string(),
            inference_api_name: "infer".to_string(),
            inference_timeout: Duration::from_secs(180),
            inference_max_attempts: 3,
            blob_upload_url: DEFAULT_BLOB_UPLOAD_URL.to_string(),
            upload_timeout: Duration::from_secs(60),
            upload_max_attempts: 2,
            retry_base_delay: Duration::from_millis(500),
            output_format: ArtifactFormat::WebP,
            object_name: "generated_image".to_string(),
            rewrite_urls: true,
            publish_mode: PublishMode::Blob,
            local_image_dir: PathBuf::from("generated_images"),
            staging_dir: std::env::temp_dir().join("imagegen-relay"),
        }
    }
}

impl Config {
    /// Load configuration from the process environment (and `.env`, if any).
    pub fn from_env() -> Result<Self> {
        check_env_file(dotenvy::dotenv())?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            hf_token: get("HF_TOKEN"),
            blob_token: get("BLOB_READ_WRITE_TOKEN"),
            port: parse_or(get("PORT"), "PORT", defaults.port)?,
            inference_base_url: get("INFERENCE_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.inference_base_url),
            inference_api_name: get("INFERENCE_API_NAME")
                .map(|name| name.trim_start_matches('/').to_string())
                .unwrap_or(defaults.inference_api_name),
            inference_timeout: Duration::from_secs(parse_or(
                get("INFERENCE_TIMEOUT_SECS"),
                "INFERENCE_TIMEOUT_SECS",
                defaults.inference_timeout.as_secs(),
            )?),
            inference_max_attempts: parse_or(
                get("INFERENCE_MAX_ATTEMPTS"),
                "INFERENCE_MAX_ATTEMPTS",
                defaults.inference_max_attempts,
            )?,
            blob_upload_url: get("BLOB_UPLOAD_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.blob_upload_url),
            upload_timeout: Duration::from_secs(parse_or(
                get("UPLOAD_TIMEOUT_SECS"),
                "UPLOAD_TIMEOUT_SECS",
                defaults.upload_timeout.as_secs(),
            )?),
            upload_max_attempts: parse_or(
                get("UPLOAD_MAX_ATTEMPTS"),
                "UPLOAD_MAX_ATTEMPTS",
                defaults.upload_max_attempts,
            )?,
            retry_base_delay: Duration::from_millis(parse_or(
                get("RETRY_BASE_DELAY_MS"),
                "RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            output_format: match get("OUTPUT_FORMAT") {
                Some(value) => value.parse()?,
                None => defaults.output_format,
            },
            object_name: get("OBJECT_NAME").unwrap_or(defaults.object_name),
            rewrite_urls: parse_or(get("REWRITE_URLS"), "REWRITE_URLS", defaults.rewrite_urls)?,
            publish_mode: match get("PUBLISH_MODE") {
                Some(value) => value.parse()?,
                None => defaults.publish_mode,
            },
            local_image_dir: get("LOCAL_IMAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_image_dir),
            staging_dir: get("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.publish_mode == PublishMode::Blob && self.blob_token.is_none() {
            return Err(Error::Config(
                "BLOB_READ_WRITE_TOKEN not set (required when PUBLISH_MODE=blob)".to_string(),
            ));
        }
        if self.inference_max_attempts == 0 || self.upload_max_attempts == 0 {
            return Err(Error::Config(
                "Retry attempt counts must be at least 1".to_string(),
            ));
        }
        if self.object_name.contains('/') {
            return Err(Error::Config(format!(
                "OBJECT_NAME must not contain '/': {}",
                self.object_name
            )));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("Invalid value for {}: '{}'", key, raw))),
        None => Ok(default),
    }
}

/// A missing `.env` is fine; an unreadable or malformed one is not.
fn check_env_file<T>(loaded: std::result::Result<T, dotenvy::Error>) -> Result<()> {
    match loaded {
        Err(e) if !e.not_found() => Err(e.into()),
        _ => Ok(()),
    }
}
