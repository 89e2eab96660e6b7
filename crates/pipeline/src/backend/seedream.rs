//! Doubao Seedream image generation (OpenAI-style `images/generations`).
//!
//! The service answers synchronously, so a submission either carries the
//! finished image references or fails.

use async_trait::async_trait;
use serde::Deserialize;

use reelforge_core::encoding;
use reelforge_core::types::JobHandle;

use super::{
    authorization_value, rejected, BackendInitError, GenerationBackend, PollOutcome,
    SubmitRequest, Submission,
};
use crate::artifact::ArtifactRef;
use crate::error::{PollError, SubmissionError};

#[derive(Debug, Clone, Deserialize)]
pub struct SeedreamConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(default)]
    pub watermark: bool,
}

fn default_api_url() -> String {
    "https://model-api.skyengine.com.cn/v1".to_string()
}

fn default_model() -> String {
    "doubao-seedream-4-5-251128".to_string()
}

fn default_size() -> String {
    "2560x1440".to_string()
}

impl SeedreamConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_url: default_api_url(),
            api_key: api_key.into(),
            model: default_model(),
            size: default_size(),
            watermark: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug)]
pub struct SeedreamBackend {
    http: reqwest::Client,
    config: SeedreamConfig,
    authorization: String,
}

impl SeedreamBackend {
    pub fn new(config: SeedreamConfig, http: reqwest::Client) -> Result<Self, BackendInitError> {
        if config.api_key.trim().is_empty() {
            return Err(BackendInitError::MissingApiKey("seedream"));
        }
        let authorization = authorization_value(&config.api_key);
        let config = SeedreamConfig {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            ..config
        };
        Ok(Self {
            http,
            config,
            authorization,
        })
    }

    fn request_body(
        &self,
        prompt: &str,
        images: &[String],
        size: Option<&str>,
        model: Option<&str>,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "prompt": prompt,
            "model": model.unwrap_or(&self.config.model),
            "size": size.unwrap_or(&self.config.size),
            "response_format": "url",
            "watermark": self.config.watermark,
        });
        if !images.is_empty() {
            body["image"] = serde_json::json!(images);
        }
        if images.len() > 1 {
            body["sequential_image_generation"] = "disabled".into();
        }
        body
    }
}

#[async_trait]
impl GenerationBackend for SeedreamBackend {
    fn name(&self) -> &'static str {
        "seedream"
    }

    fn completes_on_submit(&self) -> bool {
        true
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, SubmissionError> {
        let mut images = Vec::with_capacity(request.inputs.len());
        for path in &request.inputs {
            images.push(encoding::file_data_uri(path).await?);
        }
        let body = self.request_body(
            &request.prompt,
            &images,
            request.options.size.as_deref(),
            request.options.model.as_deref(),
        );

        let response = self
            .http
            .post(format!("{}/images/generations", self.config.api_url))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let text = response.text().await?;
        let artifacts = parse_images(&text)?;
        let handle = JobHandle::new(uuid::Uuid::new_v4().to_string());
        tracing::info!(
            job = %handle,
            images = artifacts.len(),
            references = images.len(),
            "Seedream generation completed",
        );
        Ok(Submission::Completed { handle, artifacts })
    }

    /// The job ended inside `submit`; there is nothing left to fetch.
    async fn poll(&self, _handle: &JobHandle) -> Result<PollOutcome, PollError> {
        Ok(PollOutcome::succeeded(Vec::new()))
    }
}

fn parse_images(body: &str) -> Result<Vec<ArtifactRef>, SubmissionError> {
    let missing = || SubmissionError::MissingOutput {
        body: body.to_string(),
    };
    let parsed: GenerationResponse = serde_json::from_str(body).map_err(|_| missing())?;
    let artifacts: Vec<ArtifactRef> = parsed
        .data
        .into_iter()
        .filter_map(|image| match (image.url, image.b64_json) {
            (Some(url), _) if !url.is_empty() => Some(ArtifactRef::Url(url)),
            (_, Some(data)) if !data.is_empty() => Some(ArtifactRef::Inline {
                mime: "image/png".to_string(),
                data,
            }),
            _ => None,
        })
        .collect();
    if artifacts.is_empty() {
        return Err(missing());
    }
    Ok(artifacts)
}
