//! Gemini image generation through `models/{model}:generateContent`.
//!
//! Reference images travel as `inlineData` parts after the text part;
//! generated images come back inline in the candidates.

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
pub struct GeminiConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_api_url() -> String {
    "https://aigc-backend.skyengine.com.cn/eliza/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash-image-preview".to_string()
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_url: default_api_url(),
            api_key: api_key.into(),
            model: default_model(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default = "default_mime")]
    mime_type: String,
    data: String,
}

fn default_mime() -> String {
    "image/png".to_string()
}

#[derive(Debug)]
pub struct GeminiBackend {
    http: reqwest::Client,
    config: GeminiConfig,
    authorization: String,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig, http: reqwest::Client) -> Result<Self, BackendInitError> {
        if config.api_key.trim().is_empty() {
            return Err(BackendInitError::MissingApiKey("gemini"));
        }
        let authorization = authorization_value(&config.api_key);
        let config = GeminiConfig {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            ..config
        };
        Ok(Self {
            http,
            config,
            authorization,
        })
    }

    fn endpoint(&self, model: Option<&str>) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_url,
            model.unwrap_or(&self.config.model)
        )
    }
}

/// `(mime, base64)` pairs become `inlineData` parts after the prompt.
fn request_body(prompt: &str, images: &[(&'static str, String)]) -> serde_json::Value {
    let mut parts = vec![serde_json::json!({ "text": prompt })];
    parts.extend(images.iter().map(|(mime, data)| {
        serde_json::json!({ "inlineData": { "mimeType": mime, "data": data } })
    }));
    serde_json::json!({
        "contents": [{ "role": "user", "parts": parts }]
    })
}

fn parse_images(body: &str) -> Result<Vec<ArtifactRef>, SubmissionError> {
    let missing = || SubmissionError::MissingOutput {
        body: body.to_string(),
    };
    let parsed: GenerateResponse = serde_json::from_str(body).map_err(|_| missing())?;
    let artifacts: Vec<ArtifactRef> = parsed
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter_map(|p| p.inline_data)
        .map(|d| ArtifactRef::Inline {
            mime: d.mime_type,
            data: d.data,
        })
        .collect();
    if artifacts.is_empty() {
        return Err(missing());
    }
    Ok(artifacts)
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn completes_on_submit(&self) -> bool {
        true
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, SubmissionError> {
        let mut images = Vec::with_capacity(request.inputs.len());
        for path in &request.inputs {
            let data = encoding::encode_file(path).await?;
            images.push((encoding::mime_for_path(path), data));
        }

        let response = self
            .http
            .post(self.endpoint(request.options.model.as_deref()))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .json(&request_body(&request.prompt, &images))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let text = response.text().await?;
        let artifacts = parse_images(&text)?;
        let handle = JobHandle::new(uuid::Uuid::new_v4().to_string());
        tracing::info!(job = %handle, images = artifacts.len(), "Gemini generation completed");
        Ok(Submission::Completed { handle, artifacts })
    }

    /// The job ended inside `submit`; there is nothing left to fetch.
    async fn poll(&self, _handle: &JobHandle) -> Result<PollOutcome, PollError> {
        Ok(PollOutcome::succeeded(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn endpoint_includes_model() {
        let b = GeminiBackend::new(GeminiConfig::new("k"), reqwest::Client::new()).unwrap();
        assert_eq!(
            b.endpoint(None),
            "https://aigc-backend.skyengine.com.cn/eliza/v1beta/models/gemini-2.5-flash-image-preview:generateContent"
        );
        assert!(b.endpoint(Some("other")).ends_with("/models/other:generateContent"));
    }

    #[test]
    fn body_puts_text_before_images() {
        let body = request_body("make it dusk", &[("image/jpeg", "QUJD".to_string())]);
        assert_eq!(
            body,
            serde_json::json!({
                "contents": [{
                    "role": "user",
                    "parts": [
                        {"text": "make it dusk"},
                        {"inlineData": {"mimeType": "image/jpeg", "data": "QUJD"}}
                    ]
                }]
            })
        );
    }

    #[test]
    fn inline_images_collected_across_candidates() {
        let body = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "here you go"}, {"inlineData": {"mimeType": "image/png", "data": "AAA"}}]}},
                {"content": {"parts": [{"inlineData": {"data": "BBB"}}]}}
            ]
        }"#;
        let artifacts = parse_images(body).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_matches!(&artifacts[1], ArtifactRef::Inline { mime, data } if mime == "image/png" && data == "BBB");
    }

    #[tokio::test]
    async fn poll_is_terminal_success() {
        let b = GeminiBackend::new(GeminiConfig::new("k"), reqwest::Client::new()).unwrap();
        let outcome = b.poll(&JobHandle::new("any")).await.unwrap();
        assert_eq!(outcome, PollOutcome::succeeded(Vec::new()));
    }

    #[test]
    fn text_only_answer_is_missing_output() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"I cannot do that"}]}}]}"#;
        assert_matches!(parse_images(body), Err(SubmissionError::MissingOutput { .. }));
    }
}
