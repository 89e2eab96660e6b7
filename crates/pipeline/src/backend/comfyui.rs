//! Local ComfyUI engine backend.
//!
//! Jobs are workflow graphs queued through `POST /prompt`. The source
//! image is staged into the engine first, then the cached template is
//! rendered with the image, prompt and output prefix overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use reelforge_comfyui::api::ComfyUIApi;
use reelforge_comfyui::responses::{parse_history, QueueSnapshot};
use reelforge_comfyui::workflow::{ParamOverride, WorkflowTemplate};
use reelforge_core::types::JobHandle;

use super::{BackendInitError, GenerationBackend, PollOutcome, SubmitRequest, Submission};
use crate::artifact::ArtifactRef;
use crate::error::{PollError, SubmissionError};

/// Settings of the ComfyUI backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ComfyUiConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_workflow_path")]
    pub workflow_path: PathBuf,
    /// The engine's `input/` directory. When set, source images are
    /// copied there instead of uploaded over HTTP.
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
    #[serde(default = "default_load_image_node")]
    pub load_image_node: String,
    #[serde(default = "default_prompt_node")]
    pub prompt_node: String,
    #[serde(default = "default_save_node")]
    pub save_node: String,
    /// Root of the engine-side `filename_prefix` for saved outputs.
    #[serde(default = "default_prefix_root")]
    pub prefix_root: String,
    /// Additional `"<node_id>.<input>"` overrides applied to every job.
    #[serde(default)]
    pub extra_overrides: BTreeMap<String, serde_json::Value>,
}

fn default_api_url() -> String {
    "http://127.0.0.1:8188".to_string()
}

fn default_workflow_path() -> PathBuf {
    PathBuf::from("comfyui-workflows/wan2.2_generate_video.json")
}

fn default_load_image_node() -> String {
    "97".to_string()
}

fn default_prompt_node() -> String {
    "116:93".to_string()
}

fn default_save_node() -> String {
    "108".to_string()
}

fn default_prefix_root() -> String {
    "video_outputs".to_string()
}

impl Default for ComfyUiConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            workflow_path: default_workflow_path(),
            input_dir: None,
            load_image_node: default_load_image_node(),
            prompt_node: default_prompt_node(),
            save_node: default_save_node(),
            prefix_root: default_prefix_root(),
            extra_overrides: BTreeMap::new(),
        }
    }
}

/// ComfyUI client holding the template loaded once for the run.
#[derive(Debug)]
pub struct ComfyUiBackend {
    api: ComfyUIApi,
    template: WorkflowTemplate,
    config: ComfyUiConfig,
}

impl ComfyUiBackend {
    pub async fn new(config: ComfyUiConfig, http: reqwest::Client) -> Result<Self, BackendInitError> {
        let template = WorkflowTemplate::load(&config.workflow_path).await?;
        Ok(Self::with_template(config, template, http))
    }

    pub fn with_template(
        config: ComfyUiConfig,
        template: WorkflowTemplate,
        http: reqwest::Client,
    ) -> Self {
        let api = ComfyUIApi::with_client(http, config.api_url.clone());
        Self {
            api,
            template,
            config,
        }
    }

    /// Make the source image visible to the engine and return the value
    /// its `LoadImage` node expects.
    async fn stage_image(&self, source: &Path) -> Result<String, SubmissionError> {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(SubmissionError::Input(format!(
                "source image {} not found",
                source.display()
            )));
        }

        let Some(input_dir) = &self.config.input_dir else {
            let uploaded = self.api.upload_image(source).await?;
            tracing::debug!(image = %uploaded.image_reference(), "Uploaded source image");
            return Ok(uploaded.image_reference());
        };

        let name = staged_file_name(source);
        let copy_err = |e: std::io::Error| {
            SubmissionError::Input(format!(
                "failed to copy {} into {}: {e}",
                source.display(),
                input_dir.display()
            ))
        };
        tokio::fs::create_dir_all(input_dir).await.map_err(copy_err)?;
        tokio::fs::copy(source, input_dir.join(&name))
            .await
            .map_err(copy_err)?;
        tracing::debug!(image = %name, dir = %input_dir.display(), "Staged source image");
        Ok(name)
    }

    /// Overrides for one job: image, prompt, output prefix, then the
    /// configured extras.
    fn overrides(&self, image: &str, prompt: &str, prefix: &str) -> Vec<ParamOverride> {
        let c = &self.config;
        let mut overrides = vec![
            ParamOverride::new(&c.load_image_node, "image", image.into()),
            ParamOverride::new(&c.prompt_node, "text", prompt.into()),
            ParamOverride::new(&c.save_node, "filename_prefix", prefix.into()),
        ];
        for (path, value) in &c.extra_overrides {
            match ParamOverride::parse(path, value.clone()) {
                Some(o) => overrides.push(o),
                None => tracing::warn!(path = %path, "Ignoring malformed workflow override"),
            }
        }
        overrides
    }

    fn output_prefix(&self, label: &str) -> String {
        let tag = &uuid::Uuid::new_v4().simple().to_string()[..4];
        format!("{}/{label}_{tag}", self.config.prefix_root.trim_end_matches('/'))
    }
}

#[async_trait]
impl GenerationBackend for ComfyUiBackend {
    fn name(&self) -> &'static str {
        "comfyui"
    }

    fn completes_on_submit(&self) -> bool {
        false
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<Submission, SubmissionError> {
        let source = request.source()?;
        let image = self.stage_image(source).await?;

        let label = match &request.task_key {
            Some(key) => key.to_string(),
            None => source
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "task".to_string()),
        };
        let prefix = self.output_prefix(&label);
        let workflow = self
            .template
            .render(&self.overrides(&image, &request.prompt, &prefix));

        let client_id = uuid::Uuid::new_v4().to_string();
        let response = self.api.submit_workflow(&workflow, &client_id).await?;
        if has_node_errors(&response.node_errors) {
            return Err(SubmissionError::Rejected {
                status: 200,
                body: response.node_errors.to_string(),
            });
        }

        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_number = response.number,
            prefix = %prefix,
            "Queued ComfyUI workflow",
        );
        Ok(Submission::Queued(JobHandle::new(response.prompt_id)))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<PollOutcome, PollError> {
        let queue = self.api.get_queue().await?;
        if let Some(outcome) = queue_outcome(&queue, handle.as_str()) {
            return Ok(outcome);
        }
        let history = self.api.get_history(handle.as_str()).await?;
        history_outcome(&history, handle.as_str(), self.api.api_url())
    }
}

// ---- private helpers ----

/// `<stem>_<6 hex><.ext>`, unique per staging so reruns never collide.
fn staged_file_name(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "input".to_string());
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let tag = &uuid::Uuid::new_v4().simple().to_string()[..6];
    format!("{stem}_{tag}{ext}")
}

fn has_node_errors(node_errors: &serde_json::Value) -> bool {
    match node_errors {
        serde_json::Value::Object(map) => !map.is_empty(),
        serde_json::Value::Array(list) => !list.is_empty(),
        _ => false,
    }
}

/// Queue membership wins over history: running, then pending.
fn queue_outcome(queue: &QueueSnapshot, prompt_id: &str) -> Option<PollOutcome> {
    if queue.is_running(prompt_id) {
        Some(PollOutcome::running())
    } else if queue.is_pending(prompt_id) {
        Some(PollOutcome::pending())
    } else {
        None
    }
}

fn history_outcome(
    body: &serde_json::Value,
    prompt_id: &str,
    api_url: &str,
) -> Result<PollOutcome, PollError> {
    let entry = parse_history(body, prompt_id).map_err(|e| PollError::Malformed(e.to_string()))?;
    let Some(entry) = entry else {
        return Ok(PollOutcome::pending());
    };

    if entry.is_error() {
        let message = entry
            .error_message()
            .unwrap_or_else(|| "ComfyUI execution failed".to_string());
        return Ok(PollOutcome::failed(message));
    }

    let artifacts = entry
        .output_files()
        .into_iter()
        .map(|file| ArtifactRef::ComfyFile {
            api_url: api_url.to_string(),
            file,
        })
        .collect();
    Ok(PollOutcome::succeeded(artifacts))
}

#[cfg(test)]
mod tests {
    use super::*;

    use reelforge_core::types::LifecycleState;
    use serde_json::json;

    fn backend(config: ComfyUiConfig) -> ComfyUiBackend {
        let template = WorkflowTemplate::from_value(
            PathBuf::from("wf.json"),
            json!({
                "97": {"class_type": "LoadImage", "inputs": {"image": "placeholder.png"}},
                "116:93": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
                "108": {"class_type": "SaveVideo", "inputs": {"filename_prefix": "ComfyUI"}}
            }),
        )
        .unwrap();
        ComfyUiBackend::with_template(config, template, reqwest::Client::new())
    }

    #[test]
    fn overrides_target_configured_nodes() {
        let mut config = ComfyUiConfig::default();
        config
            .extra_overrides
            .insert("108.fps".to_string(), json!(16));
        config
            .extra_overrides
            .insert("broken".to_string(), json!(1));
        let b = backend(config);

        let overrides = b.overrides("shot_ab12cd.png", "slow pan", "video_outputs/Episode-01-001_ffff");
        assert_eq!(overrides.len(), 4);

        let graph = b.template.render(&overrides);
        assert_eq!(graph["97"]["inputs"]["image"], "shot_ab12cd.png");
        assert_eq!(graph["116:93"]["inputs"]["text"], "slow pan");
        assert_eq!(
            graph["108"]["inputs"]["filename_prefix"],
            "video_outputs/Episode-01-001_ffff"
        );
        assert_eq!(graph["108"]["inputs"]["fps"], 16);
    }

    #[test]
    fn output_prefix_has_short_tag() {
        let b = backend(ComfyUiConfig::default());
        let prefix = b.output_prefix("Episode-02-014");
        let (root, rest) = prefix.split_once('/').unwrap();
        assert_eq!(root, "video_outputs");
        let tag = rest.strip_prefix("Episode-02-014_").unwrap();
        assert_eq!(tag.len(), 4);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn staged_name_keeps_stem_and_extension() {
        let name = staged_file_name(Path::new("/run/Episode-01-Shot-003.png"));
        assert!(name.starts_with("Episode-01-Shot-003_"));
        assert!(name.ends_with(".png"));
        assert_eq!(name.len(), "Episode-01-Shot-003_".len() + 6 + ".png".len());
    }

    #[test]
    fn node_errors_detection() {
        assert!(!has_node_errors(&json!({})));
        assert!(!has_node_errors(&serde_json::Value::Null));
        assert!(has_node_errors(&json!({"97": {"errors": ["missing image"]}})));
    }

    #[test]
    fn queue_running_before_pending() {
        let queue: QueueSnapshot = serde_json::from_value(json!({
            "queue_running": [[0, "p1", {}, {}, []]],
            "queue_pending": [[1, "p2", {}, {}, []]]
        }))
        .unwrap();
        assert_eq!(queue_outcome(&queue, "p1"), Some(PollOutcome::running()));
        assert_eq!(queue_outcome(&queue, "p2"), Some(PollOutcome::pending()));
        assert_eq!(queue_outcome(&queue, "p3"), None);
    }

    #[test]
    fn absent_from_history_is_pending() {
        let outcome = history_outcome(&json!({}), "p1", "http://h").unwrap();
        assert_eq!(outcome.state, LifecycleState::Pending);
    }

    #[test]
    fn history_success_lists_all_files() {
        let body = json!({
            "p1": {
                "outputs": {
                    "108": {"videos": [{"filename": "a.mp4", "subfolder": "video_outputs", "type": "output"}]},
                    "110": {"images": [{"filename": "a.png", "subfolder": "", "type": "temp"}]}
                },
                "status": {"status_str": "success", "completed": true, "messages": []}
            }
        });
        let outcome = history_outcome(&body, "p1", "http://h").unwrap();
        assert_eq!(outcome.state, LifecycleState::Success);
        assert_eq!(outcome.artifacts.len(), 2);
        assert!(outcome.artifacts[0].is_video());
        assert_eq!(
            outcome.artifacts[1].remote_location().as_deref(),
            Some("http://h/view?filename=a.png&type=temp")
        );
    }

    #[test]
    fn history_error_is_failed_with_message() {
        let body = json!({
            "p1": {
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [["execution_error", {"node_id": "97", "exception_message": "bad image\n"}]]
                }
            }
        });
        let outcome = history_outcome(&body, "p1", "http://h").unwrap();
        assert_eq!(outcome.state, LifecycleState::Failed);
        assert_eq!(outcome.error.as_deref(), Some("node 97: bad image"));
    }
}
