//! Persistent task registry.
//!
//! One JSON file per run directory maps each task key to its
//! [`TaskRecord`]. The file is read once at startup and rewritten in full
//! after every [`TaskRegistry::upsert`], so a crash loses at most the
//! mutation in flight. Records are never deleted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use reelforge_core::types::{truncate_prompt, JobHandle, LifecycleState, TaskKey, Timestamp};

use crate::error::RegistryError;

/// Registry file name inside a run directory.
pub const DEFAULT_REGISTRY_FILE: &str = "video_tasks.json";

/// Durable state of one task key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_key: TaskKey,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub job_handle: Option<JobHandle>,
    pub status: LifecycleState,
    /// Submission attempts made so far, including failed ones.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub episode: Option<u32>,
    #[serde(default)]
    pub shot_id: Option<String>,
    #[serde(default)]
    pub source_input_path: Option<PathBuf>,
    /// Prompt text, truncated for storage.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Where the primary artifact should be stored once the job succeeds.
    #[serde(default)]
    pub planned_output_path: Option<PathBuf>,
    #[serde(default)]
    pub planned_thumbnail_path: Option<PathBuf>,
    /// Remote location of the primary artifact, when it has one.
    #[serde(default)]
    pub artifact_url: Option<String>,
    /// Local path of the downloaded primary artifact.
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,
    #[serde(default)]
    pub extra_output_paths: Vec<PathBuf>,
    #[serde(default)]
    pub submitted_at: Option<Timestamp>,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl TaskRecord {
    fn new(task_key: TaskKey) -> Self {
        Self {
            task_key,
            backend: None,
            job_handle: None,
            status: LifecycleState::Pending,
            attempts: 0,
            episode: None,
            shot_id: None,
            source_input_path: None,
            prompt: None,
            planned_output_path: None,
            planned_thumbnail_path: None,
            artifact_url: None,
            output_path: None,
            thumbnail_path: None,
            extra_output_paths: Vec::new(),
            submitted_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    /// SUCCESS and the downloaded artifact is still on disk.
    pub fn is_complete_on_disk(&self) -> bool {
        self.status == LifecycleState::Success
            && self.output_path.as_deref().is_some_and(Path::exists)
    }

    /// Non-terminal and holding a job handle, i.e. something to poll.
    pub fn is_outstanding(&self) -> bool {
        !self.status.is_terminal() && self.job_handle.is_some()
    }

    /// Whether a fresh submission attempt may start for this record.
    ///
    /// Allowed for a record that never got a handle, a FAILED record, or a
    /// SUCCESS record whose artifact has since disappeared from disk.
    pub fn accepts_new_attempt(&self) -> bool {
        match self.status {
            LifecycleState::Failed => true,
            LifecycleState::Success => !self.is_complete_on_disk(),
            LifecycleState::Pending | LifecycleState::Running => self.job_handle.is_none(),
        }
    }

    /// Merge `update` into a copy of this record, checking the lifecycle
    /// invariants. The record itself is left untouched on error.
    fn merged(&self, update: TaskUpdate, now: Timestamp) -> Result<Self, RegistryError> {
        let mut next = self.clone();

        if update.new_attempt {
            if !self.accepts_new_attempt() {
                return Err(RegistryError::ResubmitRejected {
                    key: self.task_key.clone(),
                    status: self.status,
                });
            }
            next.attempts += 1;
            next.job_handle = None;
            next.status = LifecycleState::Pending;
            next.artifact_url = None;
            next.output_path = None;
            next.thumbnail_path = None;
            next.extra_output_paths.clear();
            next.completed_at = None;
            next.last_error = None;
            next.submitted_at = Some(now);
        }

        if let Some(handle) = update.job_handle {
            match &next.job_handle {
                Some(existing) if *existing != handle => {
                    return Err(RegistryError::HandleAlreadySet {
                        key: self.task_key.clone(),
                        existing: existing.to_string(),
                    });
                }
                _ => next.job_handle = Some(handle),
            }
        }

        if let Some(status) = update.status {
            if next.status.can_advance_to(status) {
                if status.is_terminal() && !next.status.is_terminal() {
                    next.completed_at = Some(now);
                }
                next.status = status;
            } else if !(next.status == LifecycleState::Running && status == LifecycleState::Pending)
            {
                return Err(RegistryError::InvalidTransition {
                    key: self.task_key.clone(),
                    from: next.status,
                    to: status,
                });
            }
        }

        if update.backend.is_some() {
            next.backend = update.backend;
        }
        if update.episode.is_some() {
            next.episode = update.episode;
        }
        if update.shot_id.is_some() {
            next.shot_id = update.shot_id;
        }
        if update.source_input_path.is_some() {
            next.source_input_path = update.source_input_path;
        }
        if let Some(prompt) = update.prompt {
            next.prompt = Some(truncate_prompt(&prompt));
        }
        if update.planned_output_path.is_some() {
            next.planned_output_path = update.planned_output_path;
        }
        if update.planned_thumbnail_path.is_some() {
            next.planned_thumbnail_path = update.planned_thumbnail_path;
        }
        if update.artifact_url.is_some() {
            next.artifact_url = update.artifact_url;
        }
        if update.output_path.is_some() {
            next.output_path = update.output_path;
        }
        if update.thumbnail_path.is_some() {
            next.thumbnail_path = update.thumbnail_path;
        }
        if let Some(extra) = update.extra_output_paths {
            next.extra_output_paths = extra;
        }
        if update.last_error.is_some() {
            next.last_error = update.last_error;
        }

        Ok(next)
    }
}

/// Fields to merge into a record. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    /// Start a new submission attempt before applying the other fields.
    pub new_attempt: bool,
    pub status: Option<LifecycleState>,
    pub job_handle: Option<JobHandle>,
    pub backend: Option<String>,
    pub episode: Option<u32>,
    pub shot_id: Option<String>,
    pub source_input_path: Option<PathBuf>,
    /// Full prompt text; truncated when stored.
    pub prompt: Option<String>,
    pub planned_output_path: Option<PathBuf>,
    pub planned_thumbnail_path: Option<PathBuf>,
    pub artifact_url: Option<String>,
    pub output_path: Option<PathBuf>,
    pub thumbnail_path: Option<PathBuf>,
    pub extra_output_paths: Option<Vec<PathBuf>>,
    pub last_error: Option<String>,
}

impl TaskUpdate {
    pub fn status(status: LifecycleState) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(LifecycleState::Failed),
            last_error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Per-state record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
}

/// File-backed map of task key to [`TaskRecord`].
#[derive(Debug)]
pub struct TaskRegistry {
    path: PathBuf,
    records: BTreeMap<TaskKey, TaskRecord>,
}

impl TaskRegistry {
    /// Registry at `<run_dir>/video_tasks.json`.
    pub async fn load_in(run_dir: &Path) -> Self {
        Self::load(run_dir.join(DEFAULT_REGISTRY_FILE)).await
    }

    /// Load the registry file, starting empty when it is missing or
    /// unreadable. Never fails: a corrupt file is logged and ignored (and
    /// replaced on the next save).
    pub async fn load(path: PathBuf) -> Self {
        let records = match Self::read_records(&path).await {
            Ok(records) => {
                tracing::info!(path = %path.display(), tasks = records.len(), "Loaded task registry");
                records
            }
            Err(e) => {
                tracing::warn!(error = %e, "Starting with an empty task registry");
                BTreeMap::new()
            }
        };
        Self { path, records }
    }

    /// Read and parse the backing file. A missing file is an empty map.
    pub async fn read_records(
        path: &Path,
    ) -> Result<BTreeMap<TaskKey, TaskRecord>, RegistryError> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(RegistryError::Corrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };
        serde_json::from_str(&text).map_err(|e| RegistryError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &TaskKey) -> Option<&TaskRecord> {
        self.records.get(key)
    }

    pub fn records(&self) -> &BTreeMap<TaskKey, TaskRecord> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Keys with a job in flight, in key order.
    pub fn outstanding(&self) -> Vec<TaskKey> {
        self.records
            .values()
            .filter(|r| r.is_outstanding())
            .map(|r| r.task_key.clone())
            .collect()
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for record in self.records.values() {
            match record.status {
                LifecycleState::Pending => counts.pending += 1,
                LifecycleState::Running => counts.running += 1,
                LifecycleState::Success => counts.success += 1,
                LifecycleState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Merge `update` into the record for `key` (creating it if absent)
    /// and persist the whole registry.
    ///
    /// Invariant violations leave both memory and disk unchanged.
    pub async fn upsert(
        &mut self,
        key: &TaskKey,
        update: TaskUpdate,
    ) -> Result<&TaskRecord, RegistryError> {
        let now = chrono::Utc::now();
        let current = self
            .records
            .get(key)
            .cloned()
            .unwrap_or_else(|| TaskRecord::new(key.clone()));
        let merged = current.merged(update, now)?;
        self.records.insert(key.clone(), merged);
        self.save().await?;
        self.records
            .get(key)
            .ok_or_else(|| RegistryError::Corrupt {
                path: self.path.clone(),
                reason: format!("record {key} vanished after insert"),
            })
    }

    /// Rewrite the backing file: serialize to a sibling temp file, then
    /// rename it over the registry.
    pub async fn save(&self) -> Result<(), RegistryError> {
        let persist_err = |source: std::io::Error| RegistryError::Persist {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(persist_err)?;
            }
        }

        let json = serde_json::to_string_pretty(&self.records)
            .map_err(|e| persist_err(std::io::Error::other(e)))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, json).await.map_err(persist_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(persist_err)?;
        Ok(())
    }
}
