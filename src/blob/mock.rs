use super::BlobService;
use crate::models::LocalArtifact;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Clone)]
pub struct MockBlobClient {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    base_url: String,
    failures: Arc<Mutex<Vec<u16>>>,
    upload_count: Arc<Mutex<usize>>,
}

impl MockBlobClient {
    pub fn new() -> Self {
        Self {
            files: Arc::new(Mutex::new(HashMap::new())),
            base_url: "https://mock-blob.example.com".to_string(),
            failures: Arc::new(Mutex::new(Vec::new())),
            upload_count: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Reject the next upload with `status`; queued failures apply in order.
    pub fn with_failure(self, status: u16) -> Self {
        self.failures.lock().unwrap().push(status);
        self
    }

    pub fn get_upload_count(&self) -> usize {
        *self.upload_count.lock().unwrap()
    }

    pub fn get_files(&self) -> HashMap<String, Vec<u8>> {
        self.files.lock().unwrap().clone()
    }
}

impl Default for MockBlobClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobService for MockBlobClient {
    async fn upload(&self, artifact: &LocalArtifact, object_name: &str) -> Result<String> {
        *self.upload_count.lock().unwrap() += 1;

        let failure = {
            let mut failures = self.failures.lock().unwrap();
            (!failures.is_empty()).then(|| failures.remove(0))
        };
        if let Some(status) = failure {
            return Err(Error::PublishRejected {
                status,
                body: format!("mock rejection {}", status),
            });
        }

        let data = tokio::fs::read(&artifact.path).await?;
        // Mirror the storage service: every upload gets a distinct name.
        let key = format!("upload-{}-{}", Uuid::new_v4().simple(), object_name);
        self.files.lock().unwrap().insert(key.clone(), data);

        Ok(format!("{}/{}", self.base_url, key))
    }
}
