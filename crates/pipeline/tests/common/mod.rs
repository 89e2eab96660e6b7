//! Shared fixtures: a scripted in-memory backend and work item builders.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;

use reelforge_core::ffmpeg::FrameExtractor;
use reelforge_core::types::{JobHandle, TaskKey};
use reelforge_pipeline::artifact::ArtifactRef;
use reelforge_pipeline::backend::{GenerationBackend, PollOutcome, SubmitRequest, Submission};
use reelforge_pipeline::error::{PollError, SubmissionError};
use reelforge_pipeline::fetcher::ArtifactFetcher;
use reelforge_pipeline::orchestrator::{Orchestrator, RunOptions};
use reelforge_pipeline::pacing::Pacer;
use reelforge_pipeline::registry::TaskRegistry;
use reelforge_pipeline::worklist::WorkItem;

/// Backend whose answers are scripted per task key.
///
/// Submissions succeed with handle `job-<task_key>` unless the key is in
/// `fail_submit`. Polls pop from the per-handle script; once a script runs
/// dry its last entry repeats, and an unscripted handle stays PENDING.
#[derive(Default)]
pub struct ScriptedBackend {
    pub synchronous: bool,
    pub fail_submit: HashSet<String>,
    polls: Mutex<HashMap<String, VecDeque<Result<PollOutcome, PollError>>>>,
    last_poll: Mutex<HashMap<String, Result<PollOutcome, PollError>>>,
    pub submitted: Mutex<Vec<TaskKey>>,
    pub poll_count: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn synchronous() -> Self {
        Self {
            synchronous: true,
            ..Self::default()
        }
    }

    pub fn failing_submit(mut self, key: &str) -> Self {
        self.fail_submit.insert(key.to_string());
        self
    }

    pub fn script(self, key: &str, outcomes: Vec<Result<PollOutcome, PollError>>) -> Self {
        self.polls
            .lock()
            .unwrap()
            .insert(handle_for(key), outcomes.into());
        self
    }

    pub fn submitted_keys(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|k| k.to_string())
            .collect()
    }

    pub fn polls(&self) -> usize {
        self.poll_count.load(Ordering::SeqCst)
    }
}

pub fn handle_for(key: &str) -> String {
    format!("job-{key}")
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn completes_on_submit(&self) -> bool {
        self.synchronous
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, SubmissionError> {
        let key = request.task_key.clone().expect("work items carry a task key");
        self.submitted.lock().unwrap().push(key.clone());

        if self.fail_submit.contains(key.as_str()) {
            return Err(SubmissionError::Transport("connection reset by peer".to_string()));
        }
        let handle = JobHandle::new(handle_for(key.as_str()));
        if self.synchronous {
            return Ok(Submission::Completed {
                handle,
                artifacts: vec![inline("image/png", "generated image")],
            });
        }
        Ok(Submission::Queued(handle))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollOutcome, PollError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        let next = self
            .polls
            .lock()
            .unwrap()
            .get_mut(handle.as_str())
            .and_then(|q| q.pop_front());
        let mut last = self.last_poll.lock().unwrap();
        match next {
            Some(outcome) => {
                last.insert(handle.to_string(), outcome.clone());
                outcome
            }
            None => last
                .get(handle.as_str())
                .cloned()
                .unwrap_or_else(|| Ok(PollOutcome::pending())),
        }
    }
}

pub fn inline(mime: &str, text: &str) -> ArtifactRef {
    ArtifactRef::Inline {
        mime: mime.to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(text),
    }
}

/// Video work item `Episode-01-<shot>` rooted in `run_dir`.
pub fn video_item(run_dir: &Path, shot: &str) -> WorkItem {
    let out_dir = run_dir.join("08_generated_videos/Episode-01");
    WorkItem {
        task_key: TaskKey::new(format!("Episode-01-{shot}")),
        episode: Some(1),
        shot_id: Some(shot.to_string()),
        source_input_path: Some(run_dir.join(format!(
            "05_generated_images/Episode-01/Episode-01-Shot-{shot}.png"
        ))),
        reference_paths: Vec::new(),
        prompt: format!("shot {shot} slow dolly"),
        output_path: out_dir.join(format!("Episode-01-Shot-{shot}.mp4")),
        thumbnail_path: Some(out_dir.join(format!("Episode-01-Shot-{shot}-thumbnail.png"))),
    }
}

/// Image work item (synchronous backends) `Episode-01-<shot>`.
pub fn image_item(run_dir: &Path, shot: &str) -> WorkItem {
    WorkItem {
        task_key: TaskKey::new(format!("Episode-01-{shot}")),
        episode: Some(1),
        shot_id: Some(shot.to_string()),
        source_input_path: None,
        reference_paths: Vec::new(),
        prompt: format!("shot {shot} keyframe"),
        output_path: run_dir.join(format!("05_generated_images/Episode-01/Episode-01-Shot-{shot}.png")),
        thumbnail_path: None,
    }
}

pub fn fetcher() -> ArtifactFetcher {
    ArtifactFetcher::new(reqwest::Client::new(), Pacer::unpaced())
        .with_frame_extractor(FrameExtractor::with_binary(PathBuf::from("/nonexistent/ffmpeg")))
}

pub async fn orchestrator(
    backend: Arc<ScriptedBackend>,
    run_dir: &Path,
    options: RunOptions,
) -> Orchestrator {
    let registry = TaskRegistry::load_in(run_dir).await;
    Orchestrator::new(backend, fetcher(), registry, Pacer::unpaced(), options)
}
