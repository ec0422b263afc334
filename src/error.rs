//! Error handling and custom error types
//!
//! Provides unified error handling across the pipeline using thiserror, plus
//! the stage-tagged [`PipelineError`] that the HTTP layer turns into a JSON
//! error response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid request body")]
    MalformedBody(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Inference service returned status {status}")]
    Upstream { status: u16, body: String },

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Generated image not found")]
    MissingArtifact(PathBuf),

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Failed to upload image to blob storage")]
    PublishRejected { status: u16, body: String },

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    EnvVar(#[from] dotenvy::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether retrying the failed remote call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| is_transient_status(s.as_u16()))
            }
            Error::Upstream { status, .. } | Error::PublishRejected { status, .. } => {
                is_transient_status(*status)
            }
            _ => false,
        }
    }

    /// Raw diagnostic text from a remote service, when there is one.
    pub fn details(&self) -> Option<String> {
        match self {
            Error::Upstream { body, .. } | Error::PublishRejected { body, .. } => {
                Some(body.clone())
            }
            Error::MalformedBody(reason) => Some(reason.clone()),
            _ => None,
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Pipeline stage at which a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Validation,
    Inference,
    Staging,
    Publishing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validation => "validation",
            Stage::Inference => "inference",
            Stage::Staging => "staging",
            Stage::Publishing => "publishing",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
#[error("{stage} failed: {error}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub error: Error,
}

impl PipelineError {
    pub fn new(stage: Stage, error: Error) -> Self {
        Self { stage, error }
    }

    /// Adapter for `map_err` that tags an error with its stage.
    pub fn at(stage: Stage) -> impl FnOnce(Error) -> Self {
        move |error| Self::new(stage, error)
    }

    pub fn status_code(&self) -> StatusCode {
        match self.stage {
            Stage::Validation => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let body = ErrorResponse {
            error: self.error.to_string(),
            details: self.error.details(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}
