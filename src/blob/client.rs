use super::BlobService;
use crate::models::{Config, LocalArtifact};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: Option<String>,
}

/// Uploads to a blob store that accepts `PUT /upload?filename=...`.
pub struct BlobClient {
    client: Client,
    upload_url: String,
    token: String,
}

impl BlobClient {
    pub fn new(upload_url: String, token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::new_with_client(upload_url, token, client))
    }

    pub fn new_with_client(upload_url: String, token: String, client: Client) -> Self {
        Self {
            client,
            upload_url: upload_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config
            .blob_token
            .clone()
            .ok_or_else(|| Error::Config("BLOB_READ_WRITE_TOKEN not set".to_string()))?;
        Self::new(config.blob_upload_url.clone(), token, config.upload_timeout)
    }
}

#[async_trait]
impl BlobService for BlobClient {
    async fn upload(&self, artifact: &LocalArtifact, object_name: &str) -> Result<String> {
        let body = tokio::fs::read(&artifact.path).await?;
        tracing::debug!("Uploading {} ({} bytes)", object_name, body.len());

        let response = self
            .client
            .put(format!("{}/upload", self.upload_url))
            .query(&[("filename", object_name)])
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, artifact.format.content_type())
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send upload request: {}", e);
                e
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Blob storage error (status {}): {}", status, body);
            return Err(Error::PublishRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: UploadResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse upload response: {}\nBody: {}", e, body);
            Error::Publish(format!("Failed to parse upload response: {}", e))
        })?;

        let url = parsed
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::Publish("missing url".to_string()))?;

        Url::parse(&url).map_err(|e| {
            tracing::error!("Blob storage returned an unusable url {:?}: {}", url, e);
            Error::Publish(format!("malformed url: {}", e))
        })?;

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArtifactFormat;
    use wiremock::matchers::{body_bytes, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_client(server: &MockServer) -> BlobClient {
        BlobClient::new(
            server.uri(),
            "blob-token".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn write_artifact(dir: &tempfile::TempDir, format: ArtifactFormat) -> LocalArtifact {
        let path = dir.path().join(format!("staged.{}", format.extension()));
        std::fs::write(&path, b"image-bytes").unwrap();
        LocalArtifact::new(path, format)
    }

    #[tokio::test]
    async fn test_upload_sends_credential_and_content_type() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(query_param("filename", "generated_image.webp"))
            .and(header("authorization", "Bearer blob-token"))
            .and(header("content-type", "image/webp"))
            .and(body_bytes(b"image-bytes".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://blob.example/upload-abc.webp"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = make_client(&server)
            .upload(
                &write_artifact(&dir, ArtifactFormat::WebP),
                "generated_image.webp",
            )
            .await
            .unwrap();

        assert_eq!(url, "https://blob.example/upload-abc.webp");
    }

    #[tokio::test]
    async fn test_upload_png_content_type() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("PUT"))
            .and(header("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://blob.example/upload-abc.png"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = make_client(&server)
            .upload(
                &write_artifact(&dir, ArtifactFormat::Png),
                "generated_image.png",
            )
            .await
            .unwrap();

        assert!(url.ends_with(".png"));
    }

    #[tokio::test]
    async fn test_upload_rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Access denied"))
            .mount(&server)
            .await;

        let err = make_client(&server)
            .upload(&write_artifact(&dir, ArtifactFormat::WebP), "generated_image.webp")
            .await
            .unwrap_err();

        match &err {
            Error::PublishRejected { status, body } => {
                assert_eq!(*status, 403);
                assert_eq!(body, "Access denied");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_upload_missing_url() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "pathname": "x" })),
            )
            .mount(&server)
            .await;

        let err = make_client(&server)
            .upload(&write_artifact(&dir, ArtifactFormat::WebP), "generated_image.webp")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Publish(ref m) if m == "missing url"));
    }

    #[tokio::test]
    async fn test_upload_malformed_url() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "url": "not a url at all" })),
            )
            .mount(&server)
            .await;

        let err = make_client(&server)
            .upload(&write_artifact(&dir, ArtifactFormat::WebP), "generated_image.webp")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Publish(ref m) if m.starts_with("malformed url")));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_upload_timeout_is_transient() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();

        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "url": "https://blob.example/upload-a.webp" }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = BlobClient::new(
            server.uri(),
            "blob-token".to_string(),
            Duration::from_millis(100),
        )
        .unwrap();
        let err = client
            .upload(&write_artifact(&dir, ArtifactFormat::WebP), "generated_image.webp")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Http(ref e) if e.is_timeout()));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let dir = tempfile::tempdir().unwrap();

        let client =
            BlobClient::new(uri, "blob-token".to_string(), Duration::from_secs(1)).unwrap();
        let err = client
            .upload(&write_artifact(&dir, ArtifactFormat::WebP), "generated_image.webp")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Http(_)));
        assert!(err.is_transient());
    }
}
