//! Workflow templates in ComfyUI's API format.
//!
//! A template is the JSON graph exported with "Save (API Format)": an
//! object keyed by node id whose values hold `class_type` and `inputs`.
//! Per-task values are injected through overrides addressed as
//! `"<node_id>.<input_name>"`, e.g. `"116:93.text"`.

use std::path::{Path, PathBuf};

/// Errors raised while loading a workflow template.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Failed to read workflow {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Workflow {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Workflow {0} is not a JSON object keyed by node id")]
    NotAnObject(PathBuf),
}

/// One parameter override applied to a template copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamOverride {
    pub node_id: String,
    pub input: String,
    pub value: serde_json::Value,
}

impl ParamOverride {
    pub fn new(node_id: impl Into<String>, input: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            node_id: node_id.into(),
            input: input.into(),
            value,
        }
    }

    /// Parse a `"<node_id>.<input_name>"` path. The split happens at the
    /// first dot so node ids containing `:` stay intact.
    pub fn parse(path: &str, value: serde_json::Value) -> Option<Self> {
        let (node_id, input) = path.split_once('.')?;
        if node_id.is_empty() || input.is_empty() {
            return None;
        }
        Some(Self::new(node_id, input, value))
    }
}

/// A loaded workflow graph. Loaded once per run and copied per task.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    path: PathBuf,
    graph: serde_json::Value,
}

impl WorkflowTemplate {
    /// Read and validate a template file.
    pub async fn load(path: &Path) -> Result<Self, WorkflowError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| WorkflowError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let graph: serde_json::Value =
            serde_json::from_str(&text).map_err(|source| WorkflowError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_value(path.to_path_buf(), graph)
    }

    /// Wrap an in-memory graph.
    pub fn from_value(path: PathBuf, graph: serde_json::Value) -> Result<Self, WorkflowError> {
        if !graph.is_object() {
            return Err(WorkflowError::NotAnObject(path));
        }
        tracing::debug!(path = %path.display(), "Loaded workflow template");
        Ok(Self { path, graph })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn graph(&self) -> &serde_json::Value {
        &self.graph
    }

    /// Return a copy of the graph with `overrides` applied.
    ///
    /// Overrides targeting a node that does not exist are skipped with a
    /// warning; a node without an `inputs` object gets one.
    pub fn render(&self, overrides: &[ParamOverride]) -> serde_json::Value {
        let mut graph = self.graph.clone();
        for o in overrides {
            let Some(node) = graph.get_mut(&o.node_id).and_then(|n| n.as_object_mut()) else {
                tracing::warn!(
                    workflow = %self.path.display(),
                    node_id = %o.node_id,
                    input = %o.input,
                    "Override targets a missing node, skipping",
                );
                continue;
            };
            let inputs = node
                .entry("inputs")
                .or_insert_with(|| serde_json::Value::Object(Default::default()));
            if !inputs.is_object() {
                *inputs = serde_json::Value::Object(Default::default());
            }
            if let Some(inputs) = inputs.as_object_mut() {
                inputs.insert(o.input.clone(), o.value.clone());
            }
        }
        graph
    }
}
