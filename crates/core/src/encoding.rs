//! Transportable payload helpers: base64 file encoding, data-URIs and
//! extension-based media type detection.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::CoreError;

/// Reference images above this size are still sent, with a warning.
pub const REFERENCE_SIZE_WARN_BYTES: u64 = 10 * 1024 * 1024;

/// Media type for an image or video path, judged by extension.
///
/// Unknown extensions fall back to `image/png`.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        _ => "image/png",
    }
}

/// File extension (without dot) to use when saving bytes of `mime`.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => "png",
    }
}

/// Whether a path names a video container.
pub fn is_video_path(path: &Path) -> bool {
    mime_for_path(path).starts_with("video/")
}

/// Read a file and return its standard base64 encoding.
pub async fn encode_file(path: &Path) -> Result<String, CoreError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CoreError::NotFound(format!("reference file {}", path.display()))
        } else {
            CoreError::Io(e)
        }
    })?;
    if bytes.len() as u64 > REFERENCE_SIZE_WARN_BYTES {
        tracing::warn!(
            path = %path.display(),
            size_bytes = bytes.len(),
            "Reference image exceeds 10MB",
        );
    }
    Ok(STANDARD.encode(bytes))
}

/// Build a `data:<mime>;base64,<payload>` URI.
pub fn data_uri(mime: &str, base64_payload: &str) -> String {
    format!("data:{mime};base64,{base64_payload}")
}

/// Read a file and return it as a data-URI with a media type taken from
/// its extension.
pub async fn file_data_uri(path: &Path) -> Result<String, CoreError> {
    let payload = encode_file(path).await?;
    Ok(data_uri(mime_for_path(path), &payload))
}

/// Decode standard base64 text into bytes.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CoreError> {
    STANDARD
        .decode(text.trim())
        .map_err(|e| CoreError::Validation(format!("invalid base64 payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_detection_by_extension() {
        assert_eq!(mime_for_path(Path::new("a/b.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("shot.webp")), "image/webp");
        assert_eq!(mime_for_path(Path::new("clip.mp4")), "video/mp4");
        assert_eq!(mime_for_path(Path::new("noext")), "image/png");
    }

    #[test]
    fn video_paths_detected() {
        assert!(is_video_path(Path::new("out/Episode-01-Shot-001.mp4")));
        assert!(!is_video_path(Path::new("out/Episode-01-Shot-001.png")));
    }

    #[test]
    fn data_uri_format() {
        assert_eq!(data_uri("image/png", "AAAA"), "data:image/png;base64,AAAA");
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_base64("not base64 !!").is_err());
        assert_eq!(decode_base64("aGk=").unwrap(), b"hi");
    }

    #[tokio::test]
    async fn file_data_uri_encodes_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.jpg");
        tokio::fs::write(&path, b"hi").await.unwrap();

        let uri = file_data_uri(&path).await.unwrap();
        assert_eq!(uri, "data:image/jpeg;base64,aGk=");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = encode_file(&dir.path().join("absent.png")).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
