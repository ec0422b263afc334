//! Prompt-to-hosted-image relay.
//!
//! Accepts a text prompt over HTTP, asks a remote text-to-image service for a
//! picture, stages it locally in a per-request workspace, and publishes it to
//! blob storage, answering with the public URL.

pub mod app;
pub mod blob;
pub mod error;
pub mod image;
pub mod inference;
pub mod models;
pub mod retry;
pub mod server;

pub use error::{Error, PipelineError, Result, Stage};
