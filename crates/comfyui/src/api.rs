//! Thin client over the ComfyUI engine's HTTP routes.
//!
//! Wraps workflow submission, queue and history inspection, image
//! upload and output file URLs using [`reqwest`].

use std::path::Path;

use reqwest::Url;

use crate::responses::{OutputFile, QueueSnapshot, SubmitResponse, UploadResponse};

/// Talks to one ComfyUI engine.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Failures talking to the engine.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The request never produced a response.
    #[error("ComfyUI request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx answer from the engine.
    #[error("ComfyUI answered {status}: {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Response body as received.
        body: String,
    },

    /// A 2xx response whose body did not have the expected shape.
    #[error("Unexpected ComfyUI response: {body}")]
    UnexpectedResponse { body: String },

    /// Reading a local file for upload failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComfyUIApi {
    /// Client with its own connection pool. `api_url` is the engine
    /// root such as `http://127.0.0.1:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Client sharing a caller-configured [`reqwest::Client`]
    /// (shares the connection pool and timeout settings).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Engine root without a trailing slash.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Queue a rendered workflow graph.
    ///
    /// Posts the graph to `/prompt` together with the
    /// client ID. Returns the server-assigned `prompt_id` and queue
    /// position. A 2xx body without a `prompt_id` is reported as
    /// [`ComfyUIApiError::UnexpectedResponse`] with the raw body.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let text = Self::ensure_success(response).await?.text().await?;
        serde_json::from_str::<SubmitResponse>(&text)
            .map_err(|_| ComfyUIApiError::UnexpectedResponse { body: text })
    }

    /// Fetch the running and pending queues.
    ///
    /// Sends a `GET /queue` request.
    pub async fn get_queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Execution record of one prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The returned JSON is
    /// keyed by prompt id and is empty while the prompt has not finished.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Upload a local image into the engine's input folder.
    ///
    /// Sends a multipart `POST /upload/image` with `overwrite=true`.
    pub async fn upload_image(&self, path: &Path) -> Result<UploadResponse, ComfyUIApiError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "input.png".to_string());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(reelforge_core::encoding::mime_for_path(path))?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Compose the `GET /view` URL for a produced file.
    ///
    /// The subfolder parameter is only sent when non-empty.
    pub fn view_url(&self, file: &OutputFile) -> Result<Url, ComfyUIApiError> {
        let mut params = vec![("filename", file.filename.as_str())];
        if !file.subfolder.is_empty() {
            params.push(("subfolder", file.subfolder.as_str()));
        }
        params.push(("type", file.kind.as_str()));

        Url::parse_with_params(&format!("{}/view", self.api_url), &params).map_err(|e| {
            ComfyUIApiError::UnexpectedResponse {
                body: format!("cannot build view URL from {}: {e}", self.api_url),
            }
        })
    }

    // ---- private helpers ----

    /// Pass 2xx responses through; turn anything else into
    /// [`ComfyUIApiError::ApiError`] carrying the body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Decode a 2xx JSON body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
