//! Error taxonomy of the job lifecycle.
//!
//! Submission, poll and download failures are per-task: the orchestrator
//! records them and moves on. Only [`RegistryError::Persist`] and
//! worklist/configuration errors abort a run.

use std::path::PathBuf;

use reelforge_comfyui::api::ComfyUIApiError;
use reelforge_core::error::CoreError;
use reelforge_core::types::{LifecycleState, TaskKey};

/// The backend rejected a submission or could not be reached.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmissionError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-2xx status.
    #[error("backend rejected submission ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// A 2xx answer without a recognizable job identifier.
    #[error("response has no job id: {body}")]
    MissingJobId { body: String },

    /// A synchronous backend answered without any output.
    #[error("response has no output: {body}")]
    MissingOutput { body: String },

    /// The work item could not be turned into a request.
    #[error("invalid input: {0}")]
    Input(String),
}

/// A status check failed. Never advances lifecycle state.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PollError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("status endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed status response: {0}")]
    Malformed(String),
}

/// Retrieving an artifact after the backend reported success failed.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download request failed: {0}")]
    Transport(String),

    #[error("download of {url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid artifact payload: {0}")]
    Payload(String),

    #[error("backend reported success without artifacts")]
    NoArtifacts,
}

/// Task registry failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The backing file exists but cannot be read as a registry. Handled
    /// at load time by starting from an empty registry.
    #[error("registry file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Writing the registry file failed.
    #[error("failed to persist registry {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("task {key}: cannot move from {from} to {to}")]
    InvalidTransition {
        key: TaskKey,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("task {key} already holds job handle {existing}")]
    HandleAlreadySet { key: TaskKey, existing: String },

    #[error("task {key} is {status} and may not be resubmitted")]
    ResubmitRejected { key: TaskKey, status: LifecycleState },
}

impl From<ComfyUIApiError> for SubmissionError {
    fn from(e: ComfyUIApiError) -> Self {
        match e {
            ComfyUIApiError::Request(e) => Self::Transport(e.to_string()),
            ComfyUIApiError::ApiError { status, body } => Self::Rejected { status, body },
            ComfyUIApiError::UnexpectedResponse { body } => Self::MissingJobId { body },
            ComfyUIApiError::Io(e) => Self::Input(e.to_string()),
        }
    }
}

impl From<ComfyUIApiError> for PollError {
    fn from(e: ComfyUIApiError) -> Self {
        match e {
            ComfyUIApiError::Request(e) if e.is_decode() => Self::Malformed(e.to_string()),
            ComfyUIApiError::Request(e) => Self::Transport(e.to_string()),
            ComfyUIApiError::ApiError { status, body } => Self::Status { status, body },
            ComfyUIApiError::UnexpectedResponse { body } => Self::Malformed(body),
            ComfyUIApiError::Io(e) => Self::Transport(e.to_string()),
        }
    }
}

impl From<CoreError> for SubmissionError {
    fn from(e: CoreError) -> Self {
        Self::Input(e.to_string())
    }
}

impl From<reqwest::Error> for SubmissionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for PollError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
