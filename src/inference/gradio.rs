use super::InferenceService;
use crate::image::detect_format;
use crate::models::{Config, GenerationParameters, LocalArtifact};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    /// Positional inputs: prompt, seed, randomize_seed, width, height, steps.
    data: (&'a str, u64, bool, u32, u32, u32),
}

#[derive(Debug, Deserialize)]
struct CallResponse {
    event_id: String,
}

/// File reference returned by a Gradio endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileData {
    pub path: Option<String>,
    pub url: Option<String>,
}

/// Decoded `complete` event of an inference call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub file: FileData,
    pub seed: Option<u64>,
}

/// Client for a hosted Gradio text-to-image app (two-step call API).
pub struct GradioClient {
    client: Client,
    base_url: String,
    api_name: String,
    token: Option<String>,
    timeout: Duration,
}

impl GradioClient {
    pub fn new(
        base_url: String,
        api_name: String,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::new_with_client(base_url, api_name, token, timeout, client))
    }

    pub fn new_with_client(
        base_url: String,
        api_name: String,
        token: Option<String>,
        timeout: Duration,
        client: Client,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_name: api_name.trim_start_matches('/').to_string(),
            token,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.inference_base_url.clone(),
            config.inference_api_name.clone(),
            config.hf_token.clone(),
            config.inference_timeout,
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn call_url(&self) -> String {
        format!("{}/gradio_api/call/{}", self.base_url, self.api_name)
    }

    async fn submit(&self, prompt: &str, params: &GenerationParameters) -> Result<String> {
        let request = CallRequest {
            data: (
                prompt,
                params.seed,
                params.randomize_seed,
                params.width,
                params.height,
                params.steps,
            ),
        };

        let response = self
            .authorized(self.client.post(self.call_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send request to inference service: {}", e);
                e
            })?;

        let body = ensure_success(response).await?.text().await?;
        let call: CallResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse inference call response: {}\nBody: {}", e, body);
            Error::Inference(format!("Failed to parse call response: {}", e))
        })?;

        Ok(call.event_id)
    }

    async fn await_result(&self, event_id: &str) -> Result<Completion> {
        let url = format!("{}/{}", self.call_url(), event_id);
        let response = self.authorized(self.client.get(url)).send().await?;
        let body = ensure_success(response).await?.text().await?;
        parse_event_stream(&body)
    }

    fn is_same_origin(&self, url: &str) -> bool {
        match (Url::parse(&self.base_url), Url::parse(url)) {
            (Ok(base), Ok(target)) => base.origin() == target.origin(),
            _ => false,
        }
    }

    /// The credential only goes to the configured inference host.
    fn download_request(&self, file: &FileData) -> Result<RequestBuilder> {
        let file_route = file
            .path
            .as_ref()
            .map(|path| format!("{}/gradio_api/file={}", self.base_url, path));

        let request = match (&file.url, file_route) {
            (Some(url), _) if self.is_same_origin(url) => {
                tracing::debug!("Downloading generated image from {}", url);
                self.authorized(self.client.get(url))
            }
            (Some(url), Some(route)) => {
                tracing::debug!("File url {} is off-origin, downloading from {}", url, route);
                self.authorized(self.client.get(route))
            }
            (Some(url), None) => {
                tracing::debug!("Downloading generated image from {} without credentials", url);
                self.client.get(url)
            }
            (None, Some(route)) => {
                tracing::debug!("Downloading generated image from {}", route);
                self.authorized(self.client.get(route))
            }
            (None, None) => {
                return Err(Error::Inference(
                    "Result carries neither a file url nor a path".to_string(),
                ))
            }
        };

        Ok(request)
    }

    async fn download(&self, file: &FileData, workspace: &Path) -> Result<LocalArtifact> {
        let response = self.download_request(file)?.send().await?;
        let bytes = ensure_success(response).await?.bytes().await?;

        let format = detect_format(&bytes).ok_or_else(|| {
            Error::Inference("Generated file is not a WebP or PNG image".to_string())
        })?;

        let path = workspace.join(format!("inference-{}.{}", Uuid::new_v4(), format.extension()));
        tokio::fs::write(&path, &bytes).await?;

        Ok(LocalArtifact::new(path, format))
    }

    async fn generate_inner(
        &self,
        prompt: &str,
        params: &GenerationParameters,
        workspace: &Path,
    ) -> Result<LocalArtifact> {
        let event_id = self.submit(prompt, params).await?;
        tracing::debug!("Inference call queued with event id {}", event_id);

        let completion = self.await_result(&event_id).await?;
        if let Some(seed) = completion.seed {
            tracing::debug!("Inference completed with seed {}", seed);
        }

        self.download(&completion.file, workspace).await
    }
}

#[async_trait]
impl InferenceService for GradioClient {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParameters,
        workspace: &Path,
    ) -> Result<LocalArtifact> {
        tokio::time::timeout(self.timeout, self.generate_inner(prompt, params, workspace))
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "inference did not finish within {}s",
                    self.timeout.as_secs()
                ))
            })?
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::error!("Inference service error (status {}): {}", status, body);
    Err(Error::Upstream {
        status: status.as_u16(),
        body,
    })
}

/// Extract the result of a call from its server-sent-event stream.
pub fn parse_event_stream(body: &str) -> Result<Completion> {
    let mut event: Option<&str> = None;
    let mut data = String::new();

    // A trailing empty line flushes the last event when the stream lacks one.
    for line in body.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            match event.take() {
                Some("complete") => return parse_completion(&data),
                Some("error") => return Err(Error::Inference(error_message(&data))),
                Some(other) => tracing::debug!("Ignoring event '{}'", other),
                None => {}
            }
            data.clear();
        } else if let Some(name) = line.strip_prefix("event:") {
            event = Some(name.trim());
        } else if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.trim_start());
        }
    }

    Err(Error::Inference(
        "Event stream ended without a result".to_string(),
    ))
}

fn parse_completion(data: &str) -> Result<Completion> {
    let values: Vec<Value> = serde_json::from_str(data)
        .map_err(|e| Error::Inference(format!("Malformed completion payload: {}", e)))?;

    let file = match values.first() {
        Some(Value::String(path)) => FileData {
            path: Some(path.clone()),
            url: None,
        },
        Some(value @ Value::Object(_)) => serde_json::from_value(value.clone())
            .map_err(|e| Error::Inference(format!("Malformed file reference: {}", e)))?,
        _ => {
            return Err(Error::Inference(
                "Completion payload has no image".to_string(),
            ))
        }
    };

    Ok(Completion {
        file,
        seed: values.get(1).and_then(Value::as_u64),
    })
}

fn error_message(data: &str) -> String {
    const FALLBACK: &str = "Inference service reported an error";

    let data = data.trim();
    match serde_json::from_str::<Value>(data) {
        Ok(Value::String(message)) => message,
        Ok(Value::Null) => FALLBACK.to_string(),
        Ok(other) => other.to_string(),
        Err(_) if data.is_empty() => FALLBACK.to_string(),
        Err(_) => data.to_string(),
    }
}
