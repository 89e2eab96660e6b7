//! ComfyUI REST response types and parsers.
//!
//! `GET /queue` returns `{"queue_running": [...], "queue_pending": [...]}`
//! where each entry is a JSON array `[number, prompt_id, prompt, extra,
//! outputs]`. `GET /history/{id}` returns an object keyed by prompt id
//! whose value carries the node outputs and the execution status.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Output keys under which ComfyUI nodes report produced files.
pub const OUTPUT_FILE_KEYS: &[&str] = &["images", "gifs", "video", "videos", "files"];

/// Response returned by `POST /prompt` after queuing a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
    /// Per-node validation errors; non-empty means the prompt was rejected.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Response returned by `POST /upload/image`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl UploadResponse {
    /// The value a `LoadImage` node expects: `subfolder/name` or `name`.
    pub fn image_reference(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}

/// Snapshot of the running and pending queues.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub queue_running: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    pub queue_pending: Vec<Vec<serde_json::Value>>,
}

impl QueueSnapshot {
    pub fn is_running(&self, prompt_id: &str) -> bool {
        contains_prompt(&self.queue_running, prompt_id)
    }

    pub fn is_pending(&self, prompt_id: &str) -> bool {
        contains_prompt(&self.queue_pending, prompt_id)
    }
}

fn contains_prompt(entries: &[Vec<serde_json::Value>], prompt_id: &str) -> bool {
    entries
        .iter()
        .any(|entry| entry.get(1).and_then(|v| v.as_str()) == Some(prompt_id))
}

/// A file produced by a node, addressable through `GET /view`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `output`, `temp` or `input`.
    #[serde(rename = "type", default = "default_output_kind")]
    pub kind: String,
}

fn default_output_kind() -> String {
    "output".to_string()
}

/// Execution status stored with a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    /// `[event_name, payload]` pairs recorded during execution.
    #[serde(default)]
    pub messages: Vec<(String, serde_json::Value)>,
}

/// One prompt's record in `GET /history/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

impl HistoryEntry {
    /// Whether the stored status marks the execution as failed.
    ///
    /// A missing status counts as success: older ComfyUI builds only
    /// write outputs.
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.status_str.as_deref())
            .is_some_and(|s| s == "error")
    }

    /// Best-effort error description from the recorded execution messages.
    pub fn error_message(&self) -> Option<String> {
        let status = self.status.as_ref()?;
        status
            .messages
            .iter()
            .find(|(name, _)| name == "execution_error")
            .map(|(_, payload)| {
                let node = payload
                    .get("node_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                let message = payload
                    .get("exception_message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error");
                format!("node {node}: {}", message.trim())
            })
    }

    /// Every file referenced by the node outputs, in node-id order.
    ///
    /// Entries without a filename are skipped.
    pub fn output_files(&self) -> Vec<OutputFile> {
        let mut files = Vec::new();
        for node_output in self.outputs.values() {
            for key in OUTPUT_FILE_KEYS {
                let Some(entries) = node_output.get(*key).and_then(|v| v.as_array()) else {
                    continue;
                };
                for entry in entries {
                    match serde_json::from_value::<OutputFile>(entry.clone()) {
                        Ok(file) if !file.filename.is_empty() => files.push(file),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(error = %e, "Skipping output entry without filename");
                        }
                    }
                }
            }
        }
        files
    }
}

/// Extract the entry for `prompt_id` from a history response body.
///
/// Returns `None` when the prompt has no history yet.
pub fn parse_history(
    body: &serde_json::Value,
    prompt_id: &str,
) -> Result<Option<HistoryEntry>, serde_json::Error> {
    match body.get(prompt_id) {
        Some(entry) => serde_json::from_value(entry.clone()).map(Some),
        None => Ok(None),
    }
}
