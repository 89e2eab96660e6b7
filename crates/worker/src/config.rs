//! Environment-driven configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reelforge_pipeline::backend::{
    BackendConfig, ComfyUiConfig, GeminiConfig, SeedreamConfig, WanVideoConfig,
};

/// Invalid or incomplete configuration. Aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set for the selected backend")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown backend {0:?} (expected comfyui, wan, seedream or gemini)")]
    UnknownBackend(String),
}

/// Settings of one `reelforge` run.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub backend: BackendConfig,
    /// Per-request timeout of the shared HTTP client.
    pub http_timeout: Duration,
    /// Minimum gap between backend calls.
    pub request_gap: Duration,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                                              |
    /// |-----------------------------|------------------------------------------------------|
    /// | `REELFORGE_BACKEND`         | `wan` (`comfyui`, `wan`, `seedream`, `gemini`)       |
    /// | `COMFYUI_URL`               | `http://127.0.0.1:8188`                              |
    /// | `COMFYUI_WORKFLOW`          | `comfyui-workflows/wan2.2_generate_video.json`       |
    /// | `COMFYUI_INPUT_DIR`         | unset (upload over HTTP)                             |
    /// | `COMFYUI_LOAD_IMAGE_NODE`   | `97`                                                 |
    /// | `COMFYUI_PROMPT_NODE`       | `116:93`                                             |
    /// | `COMFYUI_SAVE_VIDEO_NODE`   | `108`                                                |
    /// | `COMFYUI_VIDEO_PREFIX_ROOT` | `video_outputs`                                      |
    /// | `VIDEO_API_URL`             | `https://api.302.ai`                                 |
    /// | `VIDEO_API_KEY`             | required for `wan`                                   |
    /// | `VIDEO_RESOLUTION`          | `720P`                                               |
    /// | `SEEDREAM_API_URL`          | `https://model-api.skyengine.com.cn/v1`              |
    /// | `SEEDREAM_API_KEY`          | required for `seedream`                              |
    /// | `SEEDREAM_MODEL`            | `doubao-seedream-4-5-251128`                         |
    /// | `SEEDREAM_SIZE`             | `2560x1440`                                          |
    /// | `GEMINI_API_URL`            | `https://aigc-backend.skyengine.com.cn/eliza/v1beta` |
    /// | `GEMINI_API_KEY`            | required for `gemini`                                |
    /// | `GEMINI_MODEL`              | `gemini-2.5-flash-image-preview`                     |
    /// | `HTTP_TIMEOUT_SECS`         | `30`                                                 |
    /// | `REQUEST_PACE_MS`           | `3000`                                               |
    /// | `POLL_INTERVAL_SECS`        | `10`                                                 |
    /// | `POLL_TIMEOUT_SECS`         | `7200`                                               |
    /// | `LOG_FORMAT`                | unset (`json` for JSON lines)                        |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable
    /// source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let backend = match env.text("REELFORGE_BACKEND", "wan").to_ascii_lowercase().as_str() {
            "comfyui" => BackendConfig::ComfyUi(comfyui_config(&env)),
            "wan" | "wan_video" => {
                let mut c = WanVideoConfig::new(env.required("VIDEO_API_KEY")?);
                c.api_url = env.text("VIDEO_API_URL", &c.api_url);
                c.resolution = env.text("VIDEO_RESOLUTION", &c.resolution);
                BackendConfig::WanVideo(c)
            }
            "seedream" => {
                let mut c = SeedreamConfig::new(env.required("SEEDREAM_API_KEY")?);
                c.api_url = env.text("SEEDREAM_API_URL", &c.api_url);
                c.model = env.text("SEEDREAM_MODEL", &c.model);
                c.size = env.text("SEEDREAM_SIZE", &c.size);
                BackendConfig::Seedream(c)
            }
            "gemini" => {
                let mut c = GeminiConfig::new(env.required("GEMINI_API_KEY")?);
                c.api_url = env.text("GEMINI_API_URL", &c.api_url);
                c.model = env.text("GEMINI_MODEL", &c.model);
                BackendConfig::Gemini(c)
            }
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        };

        Ok(Self {
            backend,
            http_timeout: Duration::from_secs(env.parsed("HTTP_TIMEOUT_SECS", 30)?),
            request_gap: Duration::from_millis(env.parsed("REQUEST_PACE_MS", 3000)?),
            poll_interval: Duration::from_secs(env.parsed("POLL_INTERVAL_SECS", 10)?),
            poll_timeout: Duration::from_secs(env.parsed("POLL_TIMEOUT_SECS", 7200)?),
            json_logs: env
                .get("LOG_FORMAT")
                .is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
        .and_then(Self::validated)
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "POLL_INTERVAL_SECS",
                value: "0".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }
        Ok(self)
    }
}

fn comfyui_config(env: &Env<'_>) -> ComfyUiConfig {
    let d = ComfyUiConfig::default();
    ComfyUiConfig {
        api_url: env.text("COMFYUI_URL", &d.api_url),
        workflow_path: env
            .get("COMFYUI_WORKFLOW")
            .map(PathBuf::from)
            .unwrap_or(d.workflow_path),
        input_dir: env.get("COMFYUI_INPUT_DIR").map(PathBuf::from),
        load_image_node: env.text("COMFYUI_LOAD_IMAGE_NODE", &d.load_image_node),
        prompt_node: env.text("COMFYUI_PROMPT_NODE", &d.prompt_node),
        save_node: env.text("COMFYUI_SAVE_VIDEO_NODE", &d.save_node),
        prefix_root: env.text("COMFYUI_VIDEO_PREFIX_ROOT", &d.prefix_root),
        extra_overrides: d.extra_overrides,
    }
}

/// Variable lookup where blank values count as unset.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn text(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var: name,
                reason: e.to_string(),
                value,
            }),
        }
    }
}
