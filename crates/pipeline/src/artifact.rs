//! References to generated output files.

use std::path::Path;

use reelforge_comfyui::responses::OutputFile;
use reelforge_core::encoding;

/// Where a finished job's output can be retrieved from.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactRef {
    /// A plain download URL (hosted video/image services).
    Url(String),
    /// A file held by a ComfyUI engine, retrieved through its `/view`
    /// endpoint.
    ComfyFile { api_url: String, file: OutputFile },
    /// Bytes returned inline in the response body, base64 encoded.
    Inline { mime: String, data: String },
}

impl ArtifactRef {
    /// File name hint used for extension and media type detection.
    pub fn name_hint(&self) -> Option<&str> {
        match self {
            Self::Url(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                path.rsplit('/').next().filter(|s| !s.is_empty())
            }
            Self::ComfyFile { file, .. } => Some(file.filename.as_str()),
            Self::Inline { .. } => None,
        }
    }

    /// File extension (lowercase, without dot) this artifact should be
    /// saved with, if one can be determined.
    pub fn extension(&self) -> Option<String> {
        match self {
            Self::Inline { mime, .. } => Some(encoding::extension_for_mime(mime).to_string()),
            _ => self
                .name_hint()
                .and_then(|n| Path::new(n).extension())
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase()),
        }
    }

    pub fn is_video(&self) -> bool {
        match self {
            Self::Inline { mime, .. } => mime.starts_with("video/"),
            _ => self.name_hint().is_some_and(|n| encoding::is_video_path(Path::new(n))),
        }
    }

    /// Remote location worth recording in the task registry. Inline
    /// payloads have none.
    pub fn remote_location(&self) -> Option<String> {
        match self {
            Self::Url(url) => Some(url.clone()),
            Self::ComfyFile { api_url, file } => Some(if file.subfolder.is_empty() {
                format!("{api_url}/view?filename={}&type={}", file.filename, file.kind)
            } else {
                format!(
                    "{api_url}/view?filename={}&subfolder={}&type={}",
                    file.filename, file.subfolder, file.kind
                )
            }),
            Self::Inline { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comfy(filename: &str) -> ArtifactRef {
        ArtifactRef::ComfyFile {
            api_url: "http://127.0.0.1:8188".to_string(),
            file: OutputFile {
                filename: filename.to_string(),
                subfolder: String::new(),
                kind: "output".to_string(),
            },
        }
    }

    #[test]
    fn url_name_hint_ignores_query() {
        let a = ArtifactRef::Url("https://cdn.example.com/v/abc.mp4?Expires=1&sig=x".to_string());
        assert_eq!(a.name_hint(), Some("abc.mp4"));
        assert_eq!(a.extension().as_deref(), Some("mp4"));
        assert!(a.is_video());
    }

    #[test]
    fn url_without_file_name() {
        let a = ArtifactRef::Url("https://cdn.example.com/".to_string());
        assert_eq!(a.name_hint(), None);
        assert!(!a.is_video());
    }

    #[test]
    fn comfy_file_detection() {
        assert!(comfy("clip_00001.MP4").is_video());
        assert!(!comfy("frame.png").is_video());
        assert_eq!(
            comfy("frame.png").remote_location().as_deref(),
            Some("http://127.0.0.1:8188/view?filename=frame.png&type=output")
        );
    }

    #[test]
    fn inline_uses_mime() {
        let a = ArtifactRef::Inline {
            mime: "image/jpeg".to_string(),
            data: "aGk=".to_string(),
        };
        assert_eq!(a.extension().as_deref(), Some("jpg"));
        assert!(!a.is_video());
        assert_eq!(a.remote_location(), None);
    }
}
