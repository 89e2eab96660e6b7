//! Two-phase batch driver.
//!
//! Phase A walks the worklist and submits every item that is not already
//! done or in flight. Phase B polls the registry's outstanding tasks until
//! they finish, the timeout passes, or the run is cancelled, downloading
//! artifacts as tasks succeed. All state changes go through
//! [`TaskRegistry::upsert`], so an interrupted run resumes from the file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use reelforge_core::types::{JobHandle, LifecycleState, TaskKey};

use crate::artifact::ArtifactRef;
use crate::backend::{GenerationBackend, SubmitRequest, Submission};
use crate::error::RegistryError;
use crate::fetcher::{ArtifactFetcher, ArtifactTargets};
use crate::pacing::Pacer;
use crate::registry::{TaskRecord, TaskRegistry, TaskUpdate};
use crate::worklist::WorkItem;

/// Default wait between polling sweeps.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default overall bound on the completion sweep.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(7200);

/// `last_error` of a synchronous task whose run stopped between submission
/// and download. Such a task is submitted again.
pub const INTERRUPTED_BEFORE_DOWNLOAD: &str = "interrupted before download";

/// Which phases a run executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    #[default]
    Full,
    /// Phase A only; outstanding jobs are left for a later run.
    SubmitOnly,
    /// Phase B only; the worklist is ignored.
    PollOnly,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub mode: RunMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
            mode: RunMode::Full,
        }
    }
}

/// Outcome counts of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Submissions the backend accepted.
    pub submitted: usize,
    /// Items already SUCCESS with their artifact on disk.
    pub skipped: usize,
    /// Items already in flight from an earlier run, left to polling.
    pub resumed: usize,
    pub succeeded: usize,
    /// Tasks that ended FAILED during this run (submission, execution or
    /// download).
    pub failed: usize,
    /// Tasks still PENDING/RUNNING when polling stopped on the timeout or
    /// on cancellation.
    pub timed_out: Vec<TaskKey>,
    /// Status checks that failed transiently.
    pub poll_errors: usize,
    /// Completion sweeps performed.
    pub sweeps: usize,
    pub cancelled: bool,
}

/// Errors that abort a run. Per-task failures are recorded instead.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct Orchestrator {
    backend: Arc<dyn GenerationBackend>,
    fetcher: ArtifactFetcher,
    registry: TaskRegistry,
    pacer: Pacer,
    options: RunOptions,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        fetcher: ArtifactFetcher,
        registry: TaskRegistry,
        pacer: Pacer,
        options: RunOptions,
    ) -> Self {
        Self {
            backend,
            fetcher,
            registry,
            pacer,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop cooperatively when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> TaskRegistry {
        self.registry
    }

    /// Run the configured phases over `items`.
    ///
    /// Phase B is skipped for backends that finish on submission, and in
    /// [`RunMode::SubmitOnly`].
    pub async fn run(&mut self, items: &[WorkItem]) -> Result<RunSummary, OrchestratorError> {
        let mut summary = RunSummary::default();

        if self.options.mode != RunMode::PollOnly {
            self.submit_all(items, &mut summary).await?;
        }

        let poll = self.options.mode != RunMode::SubmitOnly && !self.backend.completes_on_submit();
        if summary.cancelled {
            summary.timed_out = self.registry.outstanding();
        } else if poll {
            self.await_all(&mut summary).await?;
        } else if self.backend.completes_on_submit() {
            summary.timed_out = self.registry.outstanding();
            if !summary.timed_out.is_empty() {
                tracing::warn!(
                    remaining = summary.timed_out.len(),
                    "Synchronous jobs left without artifacts; a full run submits them again",
                );
            }
        }

        tracing::info!(
            submitted = summary.submitted,
            skipped = summary.skipped,
            resumed = summary.resumed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out.len(),
            "Run finished",
        );
        Ok(summary)
    }

    /// Phase A: submit every item that needs a new attempt.
    pub async fn submit_all(
        &mut self,
        items: &[WorkItem],
        summary: &mut RunSummary,
    ) -> Result<(), OrchestratorError> {
        tracing::info!(items = items.len(), backend = self.backend.name(), "Submission sweep");

        for item in items {
            if self.cancel.is_cancelled() {
                tracing::warn!("Cancelled during submission sweep");
                summary.cancelled = true;
                break;
            }

            if let Some(record) = self.registry.get(&item.task_key) {
                if record.is_complete_on_disk() {
                    tracing::debug!(task_key = %item.task_key, "Already complete, skipping");
                    summary.skipped += 1;
                    continue;
                }
                if record.is_outstanding() {
                    if !self.backend.completes_on_submit() {
                        tracing::info!(
                            task_key = %item.task_key,
                            status = %record.status,
                            "Job already in flight, resuming",
                        );
                        summary.resumed += 1;
                        continue;
                    }
                    // Nothing to poll: the previous run stopped between
                    // submission and download.
                    tracing::warn!(
                        task_key = %item.task_key,
                        "Synchronous job interrupted before download, submitting again",
                    );
                    let update = TaskUpdate::failed(INTERRUPTED_BEFORE_DOWNLOAD);
                    if self.record(&item.task_key, update).await?.is_none() {
                        continue;
                    }
                }
            }

            self.submit_one(item, summary).await?;
        }
        Ok(())
    }

    /// Phase B: poll outstanding tasks until done, timeout or cancellation.
    pub async fn await_all(&mut self, summary: &mut RunSummary) -> Result<(), OrchestratorError> {
        let mut working = self.registry.outstanding();
        if working.is_empty() {
            tracing::info!("No outstanding jobs to poll");
            return Ok(());
        }
        tracing::info!(
            jobs = working.len(),
            interval_secs = self.options.poll_interval.as_secs_f64(),
            timeout_secs = self.options.timeout.as_secs_f64(),
            "Completion sweep",
        );

        let deadline = Instant::now() + self.options.timeout;
        while !working.is_empty() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            summary.sweeps += 1;

            let mut still_open = Vec::with_capacity(working.len());
            let mut keys = std::mem::take(&mut working).into_iter();
            for key in keys.by_ref() {
                if self.cancel.is_cancelled() || Instant::now() >= deadline {
                    still_open.push(key);
                    break;
                }
                if self.poll_one(&key, summary).await? {
                    still_open.push(key);
                }
            }
            still_open.extend(keys);
            working = still_open;

            if working.is_empty() {
                break;
            }
            let wake = (Instant::now() + self.options.poll_interval).min(deadline);
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }

        if self.cancel.is_cancelled() {
            summary.cancelled = true;
        }
        if !working.is_empty() {
            tracing::warn!(
                remaining = working.len(),
                cancelled = summary.cancelled,
                "Stopped polling with jobs outstanding",
            );
        }
        summary.timed_out.extend(working);
        Ok(())
    }

    // ---- private helpers ----

    async fn submit_one(
        &mut self,
        item: &WorkItem,
        summary: &mut RunSummary,
    ) -> Result<(), OrchestratorError> {
        let request = SubmitRequest::from_item(item);
        self.pacer.pace().await;
        let result = self.backend.submit(&request).await;

        let mut update = TaskUpdate {
            new_attempt: true,
            backend: Some(self.backend.name().to_string()),
            episode: item.episode,
            shot_id: item.shot_id.clone(),
            source_input_path: item.source_input_path.clone(),
            prompt: Some(item.prompt.clone()),
            planned_output_path: Some(item.output_path.clone()),
            planned_thumbnail_path: item.thumbnail_path.clone(),
            ..Default::default()
        };

        let (handle, completed) = match result {
            Ok(Submission::Queued(handle)) => (handle, None),
            Ok(Submission::Completed { handle, artifacts }) => (handle, Some(artifacts)),
            Err(e) => {
                tracing::warn!(task_key = %item.task_key, error = %e, "Submission failed");
                update.status = Some(LifecycleState::Failed);
                update.last_error = Some(e.to_string());
                if self.record(&item.task_key, update).await?.is_some() {
                    summary.failed += 1;
                }
                return Ok(());
            }
        };

        tracing::info!(task_key = %item.task_key, job = %handle, "Submitted");
        update.status = Some(LifecycleState::Pending);
        update.job_handle = Some(handle);
        if self.record(&item.task_key, update).await?.is_none() {
            return Ok(());
        }
        summary.submitted += 1;

        if let Some(artifacts) = completed {
            self.complete(&item.task_key, artifacts, summary).await?;
        }
        Ok(())
    }

    /// Poll one task. Returns whether it stays in the working set.
    async fn poll_one(
        &mut self,
        key: &TaskKey,
        summary: &mut RunSummary,
    ) -> Result<bool, OrchestratorError> {
        let Some((handle, current)) = self.registry.get(key).and_then(poll_target) else {
            return Ok(false);
        };

        self.pacer.pace().await;
        let outcome = match self.backend.poll(&handle).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(task_key = %key, job = %handle, error = %e, "Status check failed");
                summary.poll_errors += 1;
                return Ok(true);
            }
        };

        match outcome.state {
            LifecycleState::Pending => Ok(true),
            LifecycleState::Running => {
                if current != LifecycleState::Running {
                    tracing::info!(task_key = %key, job = %handle, "Job running");
                    let kept = self
                        .record(key, TaskUpdate::status(LifecycleState::Running))
                        .await?;
                    return Ok(kept.is_some());
                }
                Ok(true)
            }
            LifecycleState::Success => {
                self.complete(key, outcome.artifacts, summary).await?;
                Ok(false)
            }
            LifecycleState::Failed => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "backend reported failure".to_string());
                tracing::warn!(task_key = %key, job = %handle, error = %error, "Job failed");
                if self.record(key, TaskUpdate::failed(error)).await?.is_some() {
                    summary.failed += 1;
                }
                Ok(false)
            }
        }
    }

    /// Fetch a succeeded job's artifacts and record the final state.
    async fn complete(
        &mut self,
        key: &TaskKey,
        artifacts: Vec<ArtifactRef>,
        summary: &mut RunSummary,
    ) -> Result<(), OrchestratorError> {
        let targets = self.registry.get(key).and_then(|r| {
            Some(ArtifactTargets {
                output: r.planned_output_path.clone()?,
                thumbnail: r.planned_thumbnail_path.clone(),
            })
        });
        let Some(targets) = targets else {
            let update = TaskUpdate::failed("no output path recorded for this task");
            if self.record(key, update).await?.is_some() {
                summary.failed += 1;
            }
            return Ok(());
        };

        let update = match self.fetcher.fetch_all(&artifacts, &targets).await {
            Ok(fetched) => TaskUpdate {
                status: Some(LifecycleState::Success),
                output_path: Some(fetched.output_path),
                thumbnail_path: fetched.thumbnail_path,
                extra_output_paths: Some(fetched.extra_paths),
                artifact_url: fetched.artifact_url,
                ..Default::default()
            },
            Err(e) => {
                tracing::warn!(task_key = %key, error = %e, "Artifact download failed");
                TaskUpdate {
                    artifact_url: artifacts.first().and_then(ArtifactRef::remote_location),
                    ..TaskUpdate::failed(e.to_string())
                }
            }
        };

        let succeeded = update.status == Some(LifecycleState::Success);
        if let Some(record) = self.record(key, update).await? {
            if succeeded {
                tracing::info!(
                    task_key = %key,
                    path = %display_path(record.output_path.as_ref()),
                    "Task complete",
                );
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }
        Ok(())
    }

    /// Apply an update. Lifecycle violations are logged and the task is
    /// dropped for this run (`None`); failing to persist aborts.
    async fn record(
        &mut self,
        key: &TaskKey,
        update: TaskUpdate,
    ) -> Result<Option<TaskRecord>, OrchestratorError> {
        match self.registry.upsert(key, update).await {
            Ok(record) => Ok(Some(record.clone())),
            Err(e @ RegistryError::Persist { .. }) => Err(e.into()),
            Err(e) => {
                tracing::warn!(task_key = %key, error = %e, "Rejected registry update");
                Ok(None)
            }
        }
    }
}

fn poll_target(record: &TaskRecord) -> Option<(JobHandle, LifecycleState)> {
    if !record.is_outstanding() {
        return None;
    }
    Some((record.job_handle.clone()?, record.status))
}

fn display_path(path: Option<&PathBuf>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}
