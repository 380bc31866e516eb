//! Shared fixtures: a `/bin/sh` stand-in for the inference program
//!
//! Every script starts with an argument parser that pulls `--output_dir`,
//! `--genre_txt`, `--lyrics_txt` and `--audio_prompt_path` out of the
//! composed arguments into `$out`, `$genre`, `$lyrics` and `$prompt`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use yue_api::params::GenerateRequest;
use yue_common::config::{InferenceConfig, TomlConfig};

const ARG_PARSER: &str = r#"
out=""; genre=""; lyrics=""; prompt=""; prev=""
for a in "$@"; do
  case "$prev" in
    --output_dir) out="$a" ;;
    --genre_txt) genre="$a" ;;
    --lyrics_txt) lyrics="$a" ;;
    --audio_prompt_path) prompt="$a" ;;
  esac
  prev="$a"
done
"#;

/// Two artifacts: song1.wav dated 2020, song2.mp3 written now
pub const TWO_SONGS: &str = r#"
printf 'RIFF-old' > "$out/song1.wav"
touch -t 202001010000 "$out/song1.wav"
printf 'ID3-new' > "$out/song2.mp3"
printf 'not audio' > "$out/stage1.log"
echo "generated 2 songs"
"#;

pub const CUDA_OOM: &str = r#"
echo "loading stage 1"
echo "CUDA OOM" >&2
exit 1
"#;

pub const NO_OUTPUT: &str = r#"
echo "finished without writing"
"#;

/// Records what the program received, then writes one artifact
pub const RECORD_INPUTS: &str = r#"
[ -n "$genre" ] && cat "$genre" > "$out/genre_seen.txt"
[ -n "$lyrics" ] && cat "$lyrics" > "$out/lyrics_seen.txt"
echo "$genre" > "$out/genre_path.txt"
printf '%s\n' "$@" > "$out/args.txt"
printf 'ID3' > "$out/out.mp3"
"#;

/// Copies the audio prompt it was given, then writes one artifact
pub const RECORD_PROMPT: &str = r#"
echo "$prompt" > "$out/prompt_path.txt"
cat "$prompt" > "$out/prompt_seen.txt"
printf 'ID3' > "$out/out.mp3"
"#;

pub const SLOW: &str = r#"
sleep 5
printf 'ID3' > "$out/late.mp3"
"#;

/// Scratch output and staging directories for one test
pub struct FakeInference {
    pub output: TempDir,
    pub staging: TempDir,
}

impl FakeInference {
    pub fn new() -> Self {
        Self {
            output: TempDir::new().unwrap(),
            staging: TempDir::new().unwrap(),
        }
    }

    pub fn config(&self, script: &str) -> InferenceConfig {
        InferenceConfig {
            program: PathBuf::from("/bin/sh"),
            program_args: vec![
                "-c".to_string(),
                format!("{}{}", ARG_PARSER, script),
                "sh".to_string(),
            ],
            working_dir: None,
            output_dir: self.output.path().to_path_buf(),
            staging_dir: Some(self.staging.path().to_path_buf()),
            ..InferenceConfig::default()
        }
    }

    pub fn toml_config(&self, script: &str) -> TomlConfig {
        TomlConfig {
            inference: self.config(script),
            ..TomlConfig::default()
        }
    }

    /// Files currently left in the staging directory
    pub fn staged_files(&self) -> Vec<PathBuf> {
        list(self.staging.path())
    }
}

pub fn list(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

pub fn song_request() -> GenerateRequest {
    GenerateRequest {
        genre_txt: Some("inspiring female uplifting pop".to_string()),
        lyrics_txt: Some("[verse]\nhello world\n\n[chorus]\nla la la".to_string()),
        ..GenerateRequest::default()
    }
}
