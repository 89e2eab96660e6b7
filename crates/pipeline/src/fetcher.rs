//! Artifact retrieval for finished jobs.
//!
//! Remote URLs and ComfyUI `/view` files are downloaded through the shared
//! HTTP client (paced like every other backend call); inline payloads are
//! decoded locally. Videos additionally get a first-frame thumbnail.

use std::path::{Path, PathBuf};

use reelforge_comfyui::api::ComfyUIApi;
use reelforge_core::encoding;
use reelforge_core::ffmpeg::FrameExtractor;

use crate::artifact::ArtifactRef;
use crate::error::DownloadError;
use crate::pacing::Pacer;

/// Where a task's artifacts should land.
#[derive(Debug, Clone)]
pub struct ArtifactTargets {
    /// Path of the primary artifact.
    pub output: PathBuf,
    /// Companion still for video outputs.
    pub thumbnail: Option<PathBuf>,
}

/// Local result of [`ArtifactFetcher::fetch_all`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedArtifacts {
    pub output_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub extra_paths: Vec<PathBuf>,
    /// Remote location of the primary artifact, when it had one.
    pub artifact_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    http: reqwest::Client,
    pacer: Pacer,
    frames: FrameExtractor,
}

impl ArtifactFetcher {
    pub fn new(http: reqwest::Client, pacer: Pacer) -> Self {
        Self {
            http,
            pacer,
            frames: FrameExtractor::default(),
        }
    }

    pub fn with_frame_extractor(mut self, frames: FrameExtractor) -> Self {
        self.frames = frames;
        self
    }

    /// Store one artifact at `dest`, creating parent directories and
    /// replacing any existing file.
    pub async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<PathBuf, DownloadError> {
        let bytes = match artifact {
            ArtifactRef::Url(url) => self.download(url).await?,
            ArtifactRef::ComfyFile { api_url, file } => {
                let url = ComfyUIApi::with_client(self.http.clone(), api_url.clone())
                    .view_url(file)
                    .map_err(|e| DownloadError::Payload(e.to_string()))?;
                self.download(url.as_str()).await?
            }
            ArtifactRef::Inline { data, .. } => encoding::decode_base64(data)
                .map_err(|e| DownloadError::Payload(e.to_string()))?,
        };

        let io_err = |source| DownloadError::Io {
            path: dest.to_path_buf(),
            source,
        };
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(dest, &bytes).await.map_err(io_err)?;

        tracing::info!(
            path = %dest.display(),
            size_bytes = bytes.len(),
            "Saved artifact",
        );
        Ok(dest.to_path_buf())
    }

    /// Store every artifact of a finished job.
    ///
    /// The first artifact whose media kind matches the output path (video
    /// or image) becomes the primary output; the others are saved beside
    /// it as `<stem>-<n>.<ext>`. A video primary gets its first frame
    /// extracted to the thumbnail target; failing that only logs.
    pub async fn fetch_all(
        &self,
        artifacts: &[ArtifactRef],
        targets: &ArtifactTargets,
    ) -> Result<FetchedArtifacts, DownloadError> {
        if artifacts.is_empty() {
            return Err(DownloadError::NoArtifacts);
        }

        let want_video = encoding::is_video_path(&targets.output);
        let primary_idx = artifacts
            .iter()
            .position(|a| a.is_video() == want_video)
            .unwrap_or(0);
        let primary = &artifacts[primary_idx];

        let output_path = self.fetch(primary, &targets.output).await?;

        let mut extra_paths = Vec::new();
        let extras = artifacts
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != primary_idx)
            .map(|(_, a)| a);
        for (n, artifact) in extras.enumerate() {
            let dest = extra_path(&targets.output, n + 1, artifact.extension().as_deref());
            extra_paths.push(self.fetch(artifact, &dest).await?);
        }

        let thumbnail_path = match &targets.thumbnail {
            Some(thumb) if want_video => self.extract_thumbnail(&output_path, thumb).await,
            _ => None,
        };

        Ok(FetchedArtifacts {
            output_path,
            thumbnail_path,
            extra_paths,
            artifact_url: primary.remote_location(),
        })
    }

    // ---- private helpers ----

    async fn download(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.pacer.pace().await;
        tracing::debug!(url = %url, "Downloading artifact");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn extract_thumbnail(&self, video: &Path, thumbnail: &Path) -> Option<PathBuf> {
        match self.frames.extract_first_frame(video, thumbnail).await {
            Ok(()) => {
                tracing::debug!(path = %thumbnail.display(), "Extracted thumbnail");
                Some(thumbnail.to_path_buf())
            }
            Err(e) if e.is_unavailable() => {
                tracing::warn!(
                    binary = %self.frames.binary().display(),
                    error = %e,
                    "ffmpeg unavailable, skipping thumbnail",
                );
                None
            }
            Err(e) => {
                tracing::warn!(video = %video.display(), error = %e, "Thumbnail extraction failed");
                None
            }
        }
    }
}

/// `<dir>/<stem>-<n>.<ext>`, keeping the output's extension when the
/// artifact does not name one.
fn extra_path(output: &Path, n: usize, ext: Option<&str>) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let ext = ext
        .map(str::to_string)
        .or_else(|| output.extension().map(|e| e.to_string_lossy().to_string()));
    let name = match ext {
        Some(ext) => format!("{stem}-{n}.{ext}"),
        None => format!("{stem}-{n}"),
    };
    output.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn fetcher() -> ArtifactFetcher {
        ArtifactFetcher::new(reqwest::Client::new(), Pacer::unpaced())
            .with_frame_extractor(FrameExtractor::with_binary("/nonexistent/ffmpeg-binary"))
    }

    fn inline(mime: &str, text: &str) -> ArtifactRef {
        use base64::Engine;
        ArtifactRef::Inline {
            mime: mime.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(text),
        }
    }

    /// Serve a single canned HTTP response on a local port.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/files/clip.mp4")
    }

    #[test]
    fn extra_paths_are_numbered() {
        let out = Path::new("/run/08/Episode-01-Shot-001.mp4");
        assert_eq!(
            extra_path(out, 1, Some("png")),
            PathBuf::from("/run/08/Episode-01-Shot-001-1.png")
        );
        assert_eq!(
            extra_path(out, 2, None),
            PathBuf::from("/run/08/Episode-01-Shot-001-2.mp4")
        );
    }

    #[tokio::test]
    async fn inline_payload_written_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a/b/out.png");

        let saved = fetcher().fetch(&inline("image/png", "pixels"), &dest).await.unwrap();
        assert_eq!(saved, dest);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"pixels");

        // Overwrites on a second fetch.
        fetcher().fetch(&inline("image/png", "newer"), &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"newer");
    }

    #[tokio::test]
    async fn invalid_inline_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bad = ArtifactRef::Inline {
            mime: "image/png".to_string(),
            data: "***".to_string(),
        };
        let err = fetcher().fetch(&bad, &dir.path().join("x.png")).await.unwrap_err();
        assert_matches!(err, DownloadError::Payload(_));
    }

    #[tokio::test]
    async fn fetch_all_prefers_matching_media_kind() {
        let dir = tempfile::tempdir().unwrap();
        let targets = ArtifactTargets {
            output: dir.path().join("Episode-01-Shot-001.mp4"),
            thumbnail: Some(dir.path().join("Episode-01-Shot-001-thumbnail.png")),
        };
        let artifacts = vec![inline("image/png", "preview"), inline("video/mp4", "movie")];

        let fetched = fetcher().fetch_all(&artifacts, &targets).await.unwrap();
        assert_eq!(fetched.output_path, targets.output);
        assert_eq!(tokio::fs::read(&targets.output).await.unwrap(), b"movie");
        assert_eq!(
            fetched.extra_paths,
            vec![dir.path().join("Episode-01-Shot-001-1.png")]
        );
        // No ffmpeg: thumbnail skipped, fetch still succeeds.
        assert_eq!(fetched.thumbnail_path, None);
        assert_eq!(fetched.artifact_url, None);
    }

    #[tokio::test]
    async fn fetch_all_without_artifacts_fails() {
        let targets = ArtifactTargets {
            output: PathBuf::from("out.png"),
            thumbnail: None,
        };
        let err = fetcher().fetch_all(&[], &targets).await.unwrap_err();
        assert_matches!(err, DownloadError::NoArtifacts);
    }

    #[tokio::test]
    async fn url_download_saves_body() {
        let url = serve_once("200 OK", "video-bytes").await;
        let dir = tempfile::tempdir().unwrap();
        let targets = ArtifactTargets {
            output: dir.path().join("clip.mp4"),
            thumbnail: None,
        };
        let fetched = fetcher()
            .fetch_all(&[ArtifactRef::Url(url.clone())], &targets)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&targets.output).await.unwrap(), b"video-bytes");
        assert_eq!(fetched.artifact_url, Some(url));
    }

    #[tokio::test]
    async fn non_success_status_is_download_error() {
        let url = serve_once("404 Not Found", "gone").await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("clip.mp4");
        let err = fetcher().fetch(&ArtifactRef::Url(url), &dest).await.unwrap_err();
        assert_matches!(err, DownloadError::Status { status: 404, .. });
        assert!(!dest.exists());
    }
}
