//! Generation backends.
//!
//! Every service is described by a [`BackendConfig`] variant and turned
//! into the matching [`Backend`] variant once per run. The orchestrator
//! only sees the [`GenerationBackend`] trait, so the poll strategy (queue
//! views for ComfyUI, a task-status endpoint for the video service, none
//! for synchronous image services) is chosen by the variant.

pub mod comfyui;
pub mod gemini;
pub mod seedream;
pub mod wan;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use reelforge_comfyui::workflow::WorkflowError;
use reelforge_core::types::{JobHandle, LifecycleState, TaskKey};

use crate::artifact::ArtifactRef;
use crate::error::{PollError, SubmissionError};
use crate::worklist::WorkItem;

pub use comfyui::{ComfyUiBackend, ComfyUiConfig};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use seedream::{SeedreamBackend, SeedreamConfig};
pub use wan::{WanVideoBackend, WanVideoConfig};

/// Everything a backend needs to start one job.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub task_key: Option<TaskKey>,
    pub prompt: String,
    /// Source image first, then any extra references.
    pub inputs: Vec<PathBuf>,
    pub options: SubmitOptions,
}

/// Per-request overrides of the backend's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Video resolution, e.g. `720P`.
    pub resolution: Option<String>,
    /// Image size, e.g. `2560x1440`.
    pub size: Option<String>,
    /// Model identifier.
    pub model: Option<String>,
}

impl SubmitRequest {
    pub fn from_item(item: &WorkItem) -> Self {
        let mut inputs = Vec::with_capacity(1 + item.reference_paths.len());
        inputs.extend(item.source_input_path.iter().cloned());
        inputs.extend(item.reference_paths.iter().cloned());
        Self {
            task_key: Some(item.task_key.clone()),
            prompt: item.prompt.clone(),
            inputs,
            options: SubmitOptions::default(),
        }
    }

    /// The primary input image, required by image-to-video backends.
    pub fn source(&self) -> Result<&PathBuf, SubmissionError> {
        self.inputs
            .first()
            .ok_or_else(|| SubmissionError::Input("no source image for this task".to_string()))
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The job is queued; poll the handle for completion.
    Queued(JobHandle),
    /// The backend finished during the request.
    Completed {
        handle: JobHandle,
        artifacts: Vec<ArtifactRef>,
    },
}

/// Normalized answer of one status check.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub state: LifecycleState,
    /// Produced files; only populated for [`LifecycleState::Success`].
    pub artifacts: Vec<ArtifactRef>,
    pub error: Option<String>,
}

impl PollOutcome {
    pub fn pending() -> Self {
        Self {
            state: LifecycleState::Pending,
            artifacts: Vec::new(),
            error: None,
        }
    }

    pub fn running() -> Self {
        Self {
            state: LifecycleState::Running,
            ..Self::pending()
        }
    }

    pub fn succeeded(artifacts: Vec<ArtifactRef>) -> Self {
        Self {
            state: LifecycleState::Success,
            artifacts,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: LifecycleState::Failed,
            artifacts: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// A remote generation service: submit jobs and check their status.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short service name recorded with each task.
    fn name(&self) -> &'static str;

    /// True when jobs finish inside [`submit`](Self::submit), so there is
    /// never anything to poll.
    fn completes_on_submit(&self) -> bool;

    /// Start a job. Must not wait for an asynchronous job to finish.
    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, SubmissionError>;

    /// Check a job's state. Read-only and safe to repeat. Backends that
    /// complete on submit always answer SUCCESS with no artifacts.
    ///
    /// One call is one paced operation even when the service needs several
    /// requests to answer it, and the same holds for [`submit`](Self::submit).
    async fn poll(&self, handle: &JobHandle) -> Result<PollOutcome, PollError>;
}

/// Service selection plus its settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    ComfyUi(ComfyUiConfig),
    WanVideo(WanVideoConfig),
    Seedream(SeedreamConfig),
    Gemini(GeminiConfig),
}

/// Errors while constructing a backend (configuration-level).
#[derive(Debug, thiserror::Error)]
pub enum BackendInitError {
    #[error("failed to load workflow template: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("missing API key for the {0} backend")]
    MissingApiKey(&'static str),
}

/// A constructed backend client, one variant per service.
pub enum Backend {
    ComfyUi(ComfyUiBackend),
    WanVideo(WanVideoBackend),
    Seedream(SeedreamBackend),
    Gemini(GeminiBackend),
}

impl Backend {
    /// Build the client for `config`, sharing `http` for connection
    /// pooling and timeouts.
    pub async fn from_config(
        config: BackendConfig,
        http: reqwest::Client,
    ) -> Result<Self, BackendInitError> {
        Ok(match config {
            BackendConfig::ComfyUi(c) => Self::ComfyUi(ComfyUiBackend::new(c, http).await?),
            BackendConfig::WanVideo(c) => Self::WanVideo(WanVideoBackend::new(c, http)?),
            BackendConfig::Seedream(c) => Self::Seedream(SeedreamBackend::new(c, http)?),
            BackendConfig::Gemini(c) => Self::Gemini(GeminiBackend::new(c, http)?),
        })
    }

    fn inner(&self) -> &dyn GenerationBackend {
        match self {
            Self::ComfyUi(b) => b,
            Self::WanVideo(b) => b,
            Self::Seedream(b) => b,
            Self::Gemini(b) => b,
        }
    }
}

#[async_trait]
impl GenerationBackend for Backend {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn completes_on_submit(&self) -> bool {
        self.inner().completes_on_submit()
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, SubmissionError> {
        self.inner().submit(request).await
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollOutcome, PollError> {
        self.inner().poll(handle).await
    }
}

/// Read a non-2xx response into [`SubmissionError::Rejected`].
pub(crate) async fn rejected(response: reqwest::Response) -> SubmissionError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    SubmissionError::Rejected { status, body }
}

/// `Authorization` header value: keys already carrying a scheme are used
/// verbatim, bare keys get `Bearer `.
pub(crate) fn authorization_value(api_key: &str) -> String {
    let key = api_key.trim();
    if key.starts_with("Bearer ") || key.starts_with("Basic ") {
        key.to_string()
    } else {
        format!("Bearer {key}")
    }
}
