//! FFmpeg still-frame extraction for downloaded videos.
//!
//! Only the first decodable frame is needed (the shot's cover image), so
//! this wraps a single `ffmpeg -i <video> -frames:v 1 <out>` call.

use std::path::{Path, PathBuf};

/// Error type for FFmpeg operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("video file not found: {0}")]
    VideoNotFound(String),
}

impl FfmpegError {
    /// True when the failure means ffmpeg itself is unavailable rather
    /// than the input being bad.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Extracts representative still frames from video files.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    binary: PathBuf,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl FrameExtractor {
    /// Use a specific ffmpeg executable instead of the one on `PATH`.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Save the first decodable frame of `video_path` to `output_path`.
    ///
    /// The output format follows the output extension (PNG for the
    /// pipeline's `-thumbnail.png` companions). Parent directories are
    /// created and an existing file is overwritten.
    pub async fn extract_first_frame(
        &self,
        video_path: &Path,
        output_path: &Path,
    ) -> Result<(), FfmpegError> {
        if !video_path.exists() {
            return Err(FfmpegError::VideoNotFound(
                video_path.to_string_lossy().to_string(),
            ));
        }

        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let output = tokio::process::Command::new(&self.binary)
            .args(["-y", "-v", "error", "-i"])
            .arg(video_path)
            .args(["-frames:v", "1"])
            .arg(output_path)
            .output()
            .await
            .map_err(FfmpegError::NotFound)?;

        if !output.status.success() {
            return Err(FfmpegError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_video_reported_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FrameExtractor::default();
        let err = extractor
            .extract_first_frame(&dir.path().join("nope.mp4"), &dir.path().join("t.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, FfmpegError::VideoNotFound(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        tokio::fs::write(&video, b"not really a video").await.unwrap();

        let extractor = FrameExtractor::with_binary(dir.path().join("no-such-ffmpeg"));
        let err = extractor
            .extract_first_frame(&video, &dir.path().join("thumb.png"))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }
}
