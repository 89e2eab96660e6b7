//! Episode/shot naming conventions shared by the worklist scanners.
//!
//! Source images are named `Episode-NN-Shot-SSS.png` inside an
//! `Episode-NN` directory, prompt files are `Episode-NN-Video-Prompts.txt`
//! with one `SSS｜<prompt>` line per shot, and generated outputs reuse the
//! image stem. Task keys are `Episode-NN-SSS`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::types::TaskKey;

/// Full-width separator used by the prompt files.
pub const PROMPT_SEPARATOR: char = '｜';

/// Suffix appended to a shot stem for the video's still frame.
pub const THUMBNAIL_SUFFIX: &str = "-thumbnail";

fn shot_stem_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^Episode-(\d+)-Shot-([0-9A-Za-z_]+)$").expect("shot stem pattern is valid")
    })
}

fn episode_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Episode-(\d+)$").expect("episode dir pattern is valid"))
}

/// Parse an episode directory name like `Episode-01` into its number.
pub fn parse_episode_dir(name: &str) -> Option<u32> {
    episode_dir_re()
        .captures(name)
        .and_then(|caps| caps[1].parse().ok())
}

/// Parse a shot file stem like `Episode-01-Shot-003` into
/// `(episode, shot_id)`. The shot id keeps its zero padding.
pub fn parse_shot_stem(stem: &str) -> Option<(u32, String)> {
    let caps = shot_stem_re().captures(stem)?;
    let episode = caps[1].parse().ok()?;
    Some((episode, caps[2].to_string()))
}

/// `Episode-01` for episode 1.
pub fn episode_dir_name(episode: u32) -> String {
    format!("Episode-{episode:02}")
}

/// `Episode-01-Shot-003` for episode 1, shot `003`.
pub fn shot_stem(episode: u32, shot_id: &str) -> String {
    format!("Episode-{episode:02}-Shot-{shot_id}")
}

/// `Episode-01-Shot-003-thumbnail` for episode 1, shot `003`.
pub fn thumbnail_stem(episode: u32, shot_id: &str) -> String {
    format!("{}{THUMBNAIL_SUFFIX}", shot_stem(episode, shot_id))
}

/// `Episode-01-Video-Prompts.txt` for episode 1.
pub fn video_prompts_file_name(episode: u32) -> String {
    format!("Episode-{episode:02}-Video-Prompts.txt")
}

/// Stable task key for a shot: `Episode-01-003`.
pub fn shot_task_key(episode: u32, shot_id: &str) -> TaskKey {
    TaskKey::new(format!("Episode-{episode:02}-{shot_id}"))
}

/// Split one prompt-file line into `(shot_id, prompt)`.
///
/// Accepts the full-width `｜` separator and, as a fallback, an ASCII `|`.
/// Lines without a separator or with an empty side yield `None`.
pub fn parse_prompt_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    let (shot, prompt) = line
        .split_once(PROMPT_SEPARATOR)
        .or_else(|| line.split_once('|'))?;
    let shot = shot.trim();
    let prompt = prompt.trim();
    if shot.is_empty() || prompt.is_empty() {
        return None;
    }
    Some((shot.to_string(), prompt.to_string()))
}

/// Parse a whole prompt file into `shot_id -> prompt`. Later lines for the
/// same shot replace earlier ones.
pub fn parse_prompt_file(contents: &str) -> BTreeMap<String, String> {
    contents.lines().filter_map(parse_prompt_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shot_stem() {
        assert_eq!(
            parse_shot_stem("Episode-01-Shot-003"),
            Some((1, "003".to_string()))
        );
        assert_eq!(
            parse_shot_stem("Episode-12-Shot-010b"),
            Some((12, "010b".to_string()))
        );
    }

    #[test]
    fn rejects_foreign_stems() {
        assert_eq!(parse_shot_stem("Episode-01-003"), None);
        assert_eq!(parse_shot_stem("cover"), None);
        assert_eq!(parse_shot_stem("Episode-01-Shot-003-thumbnail"), None);
    }

    #[test]
    fn parses_episode_dir() {
        assert_eq!(parse_episode_dir("Episode-07"), Some(7));
        assert_eq!(parse_episode_dir("Episode-"), None);
        assert_eq!(parse_episode_dir("extras"), None);
    }

    #[test]
    fn formats_names_with_padding() {
        assert_eq!(episode_dir_name(3), "Episode-03");
        assert_eq!(shot_stem(3, "012"), "Episode-03-Shot-012");
        assert_eq!(thumbnail_stem(3, "012"), "Episode-03-Shot-012-thumbnail");
        assert_eq!(video_prompts_file_name(3), "Episode-03-Video-Prompts.txt");
        assert_eq!(shot_task_key(3, "012").as_str(), "Episode-03-012");
    }

    #[test]
    fn prompt_line_full_width_separator() {
        assert_eq!(
            parse_prompt_line("001｜【基础画面】slow push in"),
            Some(("001".to_string(), "【基础画面】slow push in".to_string()))
        );
    }

    #[test]
    fn prompt_line_ascii_fallback_and_garbage() {
        assert_eq!(
            parse_prompt_line(" 002 | wind in the hair "),
            Some(("002".to_string(), "wind in the hair".to_string()))
        );
        assert_eq!(parse_prompt_line("# Episode 1 prompts"), None);
        assert_eq!(parse_prompt_line("003｜"), None);
    }

    #[test]
    fn prompt_file_skips_headers() {
        let text = "Episode 01 video prompts\n\n001｜first\n002｜second\n";
        let prompts = parse_prompt_file(text);
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts["002"], "second");
    }
}
