use super::ImageService;
use crate::models::{ArtifactFormat, LocalArtifact};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Stager that copies bytes instead of transcoding, or fails on demand.
#[derive(Clone)]
pub struct MockImageProcessor {
    stage_count: Arc<Mutex<usize>>,
    should_fail: Arc<Mutex<bool>>,
}

impl MockImageProcessor {
    pub fn new() -> Self {
        Self {
            stage_count: Arc::new(Mutex::new(0)),
            should_fail: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_failure(self, should_fail: bool) -> Self {
        *self.should_fail.lock().unwrap() = should_fail;
        self
    }

    pub fn get_stage_count(&self) -> usize {
        *self.stage_count.lock().unwrap()
    }
}

impl Default for MockImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageService for MockImageProcessor {
    async fn stage(
        &self,
        artifact: LocalArtifact,
        target: ArtifactFormat,
        workspace: &Path,
    ) -> Result<LocalArtifact> {
        *self.stage_count.lock().unwrap() += 1;

        // Leave a partial file behind first so cleanup is observable.
        let dest = workspace.join(format!("staged-{}.{}", Uuid::new_v4(), target.extension()));
        tokio::fs::copy(&artifact.path, &dest).await?;

        if *self.should_fail.lock().unwrap() {
            return Err(Error::Staging("Mock failure".to_string()));
        }

        Ok(LocalArtifact::new(dest, target))
    }
}
