//! Hosted Wan 2.2 image-to-video task service (302.ai DashScope proxy).
//!
//! Submission returns a task id immediately; the task endpoint reports
//! `output.task_status` until the video URL is available.

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

const SYNTHESIS_PATH: &str = "/aliyun/api/v1/services/aigc/video-generation/video-synthesis";
const TASKS_PATH: &str = "/aliyun/api/v1/tasks";

/// Settings of the Wan video backend.
#[derive(Debug, Clone, Deserialize)]
pub struct WanVideoConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_resolution")]
    pub resolution: String,
    /// Let the service rewrite prompts before generation.
    #[serde(default = "default_prompt_extend")]
    pub prompt_extend: bool,
}

fn default_api_url() -> String {
    "https://api.302.ai".to_string()
}

fn default_model() -> String {
    "wan2.2-i2v-flash".to_string()
}

fn default_resolution() -> String {
    "720P".to_string()
}

fn default_prompt_extend() -> bool {
    true
}

impl WanVideoConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_url: default_api_url(),
            api_key: api_key.into(),
            model: default_model(),
            resolution: default_resolution(),
            prompt_extend: default_prompt_extend(),
        }
    }
}

/// Body of both the submit and the task responses.
#[derive(Debug, Deserialize)]
struct TaskResponse {
    #[serde(default)]
    output: Option<TaskOutput>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    task_status: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug)]
pub struct WanVideoBackend {
    http: reqwest::Client,
    config: WanVideoConfig,
    authorization: String,
}

impl WanVideoBackend {
    pub fn new(config: WanVideoConfig, http: reqwest::Client) -> Result<Self, BackendInitError> {
        if config.api_key.trim().is_empty() {
            return Err(BackendInitError::MissingApiKey("wan"));
        }
        let authorization = authorization_value(&config.api_key);
        let config = WanVideoConfig {
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
        image_data_uri: &str,
        resolution: Option<&str>,
        model: Option<&str>,
    ) -> serde_json::Value {
        serde_json::json!({
            "model": model.unwrap_or(&self.config.model),
            "input": {
                "prompt": prompt,
                "img_url": image_data_uri,
            },
            "parameters": {
                "resolution": resolution.unwrap_or(&self.config.resolution),
                "prompt_extend": self.config.prompt_extend,
            },
        })
    }
}

#[async_trait]
impl GenerationBackend for WanVideoBackend {
    fn name(&self) -> &'static str {
        "wan"
    }

    fn completes_on_submit(&self) -> bool {
        false
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, SubmissionError> {
        let source = request.source()?;
        let image = encoding::file_data_uri(source).await?;
        let body = self.request_body(
            &request.prompt,
            &image,
            request.options.resolution.as_deref(),
            request.options.model.as_deref(),
        );

        let response = self
            .http
            .post(format!("{}{SYNTHESIS_PATH}", self.config.api_url))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let text = response.text().await?;
        let handle = parse_task_id(&text)?;
        tracing::info!(job = %handle, "Submitted video synthesis task");
        Ok(Submission::Queued(handle))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollOutcome, PollError> {
        let response = self
            .http
            .get(format!("{}{TASKS_PATH}/{}", self.config.api_url, handle))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(PollError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        parse_task_status(&text)
    }
}

// ---- private helpers ----

fn parse_task_id(body: &str) -> Result<JobHandle, SubmissionError> {
    let missing = || SubmissionError::MissingJobId {
        body: body.to_string(),
    };
    let parsed: TaskResponse = serde_json::from_str(body).map_err(|_| missing())?;
    if let Some(request_id) = &parsed.request_id {
        tracing::debug!(request_id = %request_id, "Synthesis request accepted");
    }
    parsed
        .output
        .and_then(|o| o.task_id)
        .filter(|id| !id.is_empty())
        .map(JobHandle::new)
        .ok_or_else(missing)
}

fn parse_task_status(body: &str) -> Result<PollOutcome, PollError> {
    let parsed: TaskResponse =
        serde_json::from_str(body).map_err(|e| PollError::Malformed(e.to_string()))?;
    let output = parsed
        .output
        .ok_or_else(|| PollError::Malformed(format!("no output in {body}")))?;
    let status = output
        .task_status
        .as_deref()
        .ok_or_else(|| PollError::Malformed(format!("no task_status in {body}")))?;

    match status.to_ascii_uppercase().as_str() {
        "PENDING" => Ok(PollOutcome::pending()),
        "RUNNING" => Ok(PollOutcome::running()),
        "SUCCESS" | "SUCCEEDED" => match output.video_url {
            Some(url) if !url.is_empty() => Ok(PollOutcome::succeeded(vec![ArtifactRef::Url(url)])),
            _ => Ok(PollOutcome::succeeded(Vec::new())),
        },
        "FAILED" | "CANCELED" | "UNKNOWN" => {
            let message = match (output.code, output.message) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (None, Some(message)) => message,
                (Some(code), None) => code,
                (None, None) => format!("task ended with status {status}"),
            };
            Ok(PollOutcome::failed(message))
        }
        other => Err(PollError::Malformed(format!("unrecognized task_status {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use reelforge_core::types::LifecycleState;

    fn backend() -> WanVideoBackend {
        WanVideoBackend::new(WanVideoConfig::new("sk-test"), reqwest::Client::new()).unwrap()
    }

    #[test]
    fn empty_key_is_rejected() {
        let result = WanVideoBackend::new(WanVideoConfig::new("  "), reqwest::Client::new());
        assert_matches!(result, Err(BackendInitError::MissingApiKey("wan")));
    }

    #[test]
    fn bare_key_gets_bearer_scheme() {
        assert_eq!(backend().authorization, "Bearer sk-test");
    }

    #[test]
    fn body_uses_configured_defaults() {
        let body = backend().request_body("camera pans", "data:image/png;base64,AAA", None, None);
        assert_eq!(
            body,
            serde_json::json!({
                "model": "wan2.2-i2v-flash",
                "input": {"prompt": "camera pans", "img_url": "data:image/png;base64,AAA"},
                "parameters": {"resolution": "720P", "prompt_extend": true}
            })
        );
    }

    #[test]
    fn body_honors_request_options() {
        let body = backend().request_body("p", "d", Some("1080P"), Some("wan2.2-i2v-plus"));
        assert_eq!(body["parameters"]["resolution"], "1080P");
        assert_eq!(body["model"], "wan2.2-i2v-plus");
    }

    #[test]
    fn task_id_extracted_from_output() {
        let handle = parse_task_id(
            r#"{"output":{"task_id":"t-123","task_status":"PENDING"},"request_id":"r-1"}"#,
        )
        .unwrap();
        assert_eq!(handle.as_str(), "t-123");
    }

    #[test]
    fn missing_task_id_keeps_body() {
        let body = r#"{"code":"InvalidApiKey","message":"bad key"}"#;
        assert_matches!(
            parse_task_id(body),
            Err(SubmissionError::MissingJobId { body: b }) if b == body
        );
    }

    #[test]
    fn status_mapping() {
        let p = parse_task_status(r#"{"output":{"task_status":"PENDING"}}"#).unwrap();
        assert_eq!(p.state, LifecycleState::Pending);

        let r = parse_task_status(r#"{"output":{"task_status":"RUNNING"}}"#).unwrap();
        assert_eq!(r.state, LifecycleState::Running);

        let s = parse_task_status(
            r#"{"output":{"task_status":"SUCCEEDED","video_url":"https://cdn/x.mp4"}}"#,
        )
        .unwrap();
        assert_eq!(s.state, LifecycleState::Success);
        assert_eq!(s.artifacts, vec![ArtifactRef::Url("https://cdn/x.mp4".to_string())]);

        let f = parse_task_status(
            r#"{"output":{"task_status":"FAILED","code":"DataInspectionFailed","message":"unsafe input"}}"#,
        )
        .unwrap();
        assert_eq!(f.state, LifecycleState::Failed);
        assert_eq!(f.error.as_deref(), Some("DataInspectionFailed: unsafe input"));

        let c = parse_task_status(r#"{"output":{"task_status":"CANCELED"}}"#).unwrap();
        assert_eq!(c.error.as_deref(), Some("task ended with status CANCELED"));
    }

    #[test]
    fn unexpected_status_is_malformed() {
        assert_matches!(
            parse_task_status(r#"{"output":{"task_status":"WEIRD"}}"#),
            Err(PollError::Malformed(_))
        );
        assert_matches!(parse_task_status("not json"), Err(PollError::Malformed(_)));
    }
}
