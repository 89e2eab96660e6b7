//! Units of work derived from a run directory.
//!
//! Video runs pair every `05_generated_images/Episode-NN/Episode-NN-Shot-SSS.png`
//! with its line in `07_video_prompts/Episode-NN-Video-Prompts.txt` and
//! target `08_generated_videos/`. Image runs read a JSON manifest and
//! target `05_generated_images/`. Work items are rebuilt on every run and
//! never persisted.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use reelforge_core::naming;
use reelforge_core::types::TaskKey;

pub const IMAGES_DIR: &str = "05_generated_images";
pub const VIDEO_PROMPTS_DIR: &str = "07_video_prompts";
pub const VIDEOS_DIR: &str = "08_generated_videos";

/// One shot to generate.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub task_key: TaskKey,
    pub episode: Option<u32>,
    pub shot_id: Option<String>,
    /// Primary input image (image-to-video source).
    pub source_input_path: Option<PathBuf>,
    /// Extra reference images sent after the source.
    pub reference_paths: Vec<PathBuf>,
    pub prompt: String,
    /// Where the primary artifact is stored.
    pub output_path: PathBuf,
    /// Companion still for video outputs.
    pub thumbnail_path: Option<PathBuf>,
}

/// Problems with the run directory itself. These abort the run.
#[derive(Debug, thiserror::Error)]
pub enum WorklistError {
    #[error("images directory {0} does not exist")]
    ImagesDirMissing(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("manifest {path} is not valid JSON: {source}")]
    ManifestParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("manifest entry {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

/// Build the image-to-video worklist for `run_dir`, ordered by episode
/// then shot.
///
/// Episodes without a prompt file (or with an empty one) are skipped with
/// a warning; shots without a prompt line are skipped quietly.
pub async fn scan_video_worklist(run_dir: &Path) -> Result<Vec<WorkItem>, WorklistError> {
    let images_dir = run_dir.join(IMAGES_DIR);
    if !images_dir.is_dir() {
        return Err(WorklistError::ImagesDirMissing(images_dir));
    }
    let prompts_dir = run_dir.join(VIDEO_PROMPTS_DIR);
    let videos_dir = run_dir.join(VIDEOS_DIR);

    let mut episodes: Vec<(u32, PathBuf)> = list_dir(&images_dir)
        .await?
        .into_iter()
        .filter_map(|p| {
            let name = p.file_name()?.to_str()?;
            Some((naming::parse_episode_dir(name)?, p.clone()))
        })
        .filter(|(_, p)| p.is_dir())
        .collect();
    episodes.sort();

    let mut items = Vec::new();
    for (episode, episode_dir) in episodes {
        let prompt_file = prompts_dir.join(naming::video_prompts_file_name(episode));
        let prompts = match tokio::fs::read_to_string(&prompt_file).await {
            Ok(text) => naming::parse_prompt_file(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Default::default(),
            Err(source) => {
                return Err(WorklistError::Io {
                    path: prompt_file,
                    source,
                })
            }
        };
        if prompts.is_empty() {
            tracing::warn!(
                episode,
                prompt_file = %prompt_file.display(),
                "No video prompts for episode, skipping",
            );
            continue;
        }

        let mut shots: Vec<(String, PathBuf)> = list_dir(&episode_dir)
            .await?
            .into_iter()
            .filter(|p| has_extension(p, "png"))
            .filter_map(|p| {
                let stem = p.file_stem()?.to_str()?;
                let (_, shot_id) = naming::parse_shot_stem(stem)?;
                Some((shot_id, p.clone()))
            })
            .collect();
        shots.sort();

        let output_dir = videos_dir.join(naming::episode_dir_name(episode));
        let before = items.len();
        for (shot_id, image) in shots {
            let Some(prompt) = prompts.get(&shot_id) else {
                tracing::debug!(episode, shot_id = %shot_id, "No prompt line for shot");
                continue;
            };
            items.push(WorkItem {
                task_key: naming::shot_task_key(episode, &shot_id),
                episode: Some(episode),
                output_path: output_dir.join(format!("{}.mp4", naming::shot_stem(episode, &shot_id))),
                thumbnail_path: Some(
                    output_dir.join(format!("{}.png", naming::thumbnail_stem(episode, &shot_id))),
                ),
                shot_id: Some(shot_id),
                source_input_path: Some(image),
                reference_paths: Vec::new(),
                prompt: prompt.clone(),
            });
        }
        tracing::info!(episode, shots = items.len() - before, "Scanned episode");
    }
    Ok(items)
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    episode: u32,
    #[serde(deserialize_with = "shot_id_from_json")]
    shot: String,
    prompt: String,
    #[serde(default)]
    references: Vec<PathBuf>,
}

/// Shot ids may be written as `"003"` or `3`; numbers get the
/// three-digit padding used in file names.
fn shot_id_from_json<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s.trim().to_string(),
        Raw::Number(n) => format!("{n:03}"),
    })
}

/// Build the image worklist from a JSON manifest.
///
/// Relative reference paths are resolved against the manifest's
/// directory. Outputs land in `05_generated_images/Episode-NN/`.
pub async fn load_image_manifest(
    run_dir: &Path,
    manifest: &Path,
) -> Result<Vec<WorkItem>, WorklistError> {
    let text = tokio::fs::read_to_string(manifest)
        .await
        .map_err(|source| WorklistError::Io {
            path: manifest.to_path_buf(),
            source,
        })?;
    let entries: Vec<ManifestEntry> =
        serde_json::from_str(&text).map_err(|source| WorklistError::ManifestParse {
            path: manifest.to_path_buf(),
            source,
        })?;

    let base = manifest.parent().unwrap_or(Path::new(""));
    let images_dir = run_dir.join(IMAGES_DIR);
    let mut items = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        if entry.shot.is_empty() {
            return Err(WorklistError::InvalidEntry {
                index,
                reason: "empty shot id".to_string(),
            });
        }
        if entry.prompt.trim().is_empty() {
            return Err(WorklistError::InvalidEntry {
                index,
                reason: format!("shot {} has an empty prompt", entry.shot),
            });
        }
        let output_dir = images_dir.join(naming::episode_dir_name(entry.episode));
        items.push(WorkItem {
            task_key: naming::shot_task_key(entry.episode, &entry.shot),
            episode: Some(entry.episode),
            output_path: output_dir.join(format!(
                "{}.png",
                naming::shot_stem(entry.episode, &entry.shot)
            )),
            thumbnail_path: None,
            shot_id: Some(entry.shot),
            source_input_path: None,
            reference_paths: entry
                .references
                .into_iter()
                .map(|p| if p.is_absolute() { p } else { base.join(p) })
                .collect(),
            prompt: entry.prompt,
        });
    }
    tracing::info!(manifest = %manifest.display(), items = items.len(), "Loaded image manifest");
    Ok(items)
}

// ---- private helpers ----

async fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, WorklistError> {
    let io_err = |source| WorklistError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        paths.push(entry.path());
    }
    Ok(paths)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    async fn touch(path: &Path, contents: &str) {
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, contents).await.unwrap();
    }

    #[tokio::test]
    async fn video_worklist_pairs_images_with_prompts() {
        let run = tempfile::tempdir().unwrap();
        let root = run.path();
        touch(&root.join("05_generated_images/Episode-01/Episode-01-Shot-002.png"), "").await;
        touch(&root.join("05_generated_images/Episode-01/Episode-01-Shot-001.png"), "").await;
        touch(&root.join("05_generated_images/Episode-01/Episode-01-Shot-003.png"), "").await;
        touch(&root.join("05_generated_images/Episode-01/notes.txt"), "").await;
        touch(
            &root.join("07_video_prompts/Episode-01-Video-Prompts.txt"),
            "001｜slow push in\n002|wind in the hair\nheader line\n",
        )
        .await;

        let items = scan_video_worklist(root).await.unwrap();
        let keys: Vec<&str> = items.iter().map(|i| i.task_key.as_str()).collect();
        assert_eq!(keys, vec!["Episode-01-001", "Episode-01-002"]);

        let first = &items[0];
        assert_eq!(first.prompt, "slow push in");
        assert_eq!(
            first.source_input_path.as_deref(),
            Some(root.join("05_generated_images/Episode-01/Episode-01-Shot-001.png").as_path())
        );
        assert_eq!(
            first.output_path,
            root.join("08_generated_videos/Episode-01/Episode-01-Shot-001.mp4")
        );
        assert_eq!(
            first.thumbnail_path.as_deref(),
            Some(root.join("08_generated_videos/Episode-01/Episode-01-Shot-001-thumbnail.png").as_path())
        );
    }

    #[tokio::test]
    async fn episode_without_prompts_is_skipped() {
        let run = tempfile::tempdir().unwrap();
        let root = run.path();
        touch(&root.join("05_generated_images/Episode-01/Episode-01-Shot-001.png"), "").await;
        touch(&root.join("05_generated_images/Episode-02/Episode-02-Shot-001.png"), "").await;
        touch(&root.join("07_video_prompts/Episode-02-Video-Prompts.txt"), "001｜rain\n").await;

        let items = scan_video_worklist(root).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].task_key.as_str(), "Episode-02-001");
    }

    #[tokio::test]
    async fn missing_images_dir_aborts() {
        let run = tempfile::tempdir().unwrap();
        let err = scan_video_worklist(run.path()).await.unwrap_err();
        assert_matches!(err, WorklistError::ImagesDirMissing(_));
    }

    #[tokio::test]
    async fn manifest_resolves_references_and_pads_shots() {
        let run = tempfile::tempdir().unwrap();
        let manifest = run.path().join("plans/images.json");
        touch(
            &manifest,
            r#"[
                {"episode": 1, "shot": 7, "prompt": "hero on rooftop", "references": ["refs/hero.png", "/abs/bg.png"]},
                {"episode": 2, "shot": "010", "prompt": "empty street"}
            ]"#,
        )
        .await;

        let items = load_image_manifest(run.path(), &manifest).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].task_key.as_str(), "Episode-01-007");
        assert_eq!(
            items[0].reference_paths,
            vec![run.path().join("plans/refs/hero.png"), PathBuf::from("/abs/bg.png")]
        );
        assert_eq!(
            items[0].output_path,
            run.path().join("05_generated_images/Episode-01/Episode-01-Shot-007.png")
        );
        assert_eq!(items[0].source_input_path, None);
        assert_eq!(items[1].shot_id.as_deref(), Some("010"));
        assert!(items[1].reference_paths.is_empty());
    }

    #[tokio::test]
    async fn manifest_errors() {
        let run = tempfile::tempdir().unwrap();
        let missing = load_image_manifest(run.path(), &run.path().join("none.json")).await;
        assert_matches!(missing, Err(WorklistError::Io { .. }));

        let bad = run.path().join("bad.json");
        touch(&bad, "{not json").await;
        assert_matches!(
            load_image_manifest(run.path(), &bad).await,
            Err(WorklistError::ManifestParse { .. })
        );

        let empty_prompt = run.path().join("empty.json");
        touch(&empty_prompt, r#"[{"episode": 1, "shot": "001", "prompt": " "}]"#).await;
        assert_matches!(
            load_image_manifest(run.path(), &empty_prompt).await,
            Err(WorklistError::InvalidEntry { index: 0, .. })
        );
    }
}
