// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::format::AudioFormat;
use crate::config::Config;
use crate::error::MaterializeError;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// Number of trailing stderr lines kept in failure reports
const STDERR_TAIL_LINES: usize = 20;

/// External tool that turns a content id into a sponsor-free audio file
#[async_trait]
pub trait Materializer: Send + Sync {
    /// Produce `<work_dir>/<content_id>.<ext>` and return its path
    async fn materialize(
        &self,
        content_id: &str,
        format: AudioFormat,
        work_dir: &Path,
    ) -> Result<PathBuf, MaterializeError>;
}

/// yt-dlp invocation with sponsor segment removal
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    categories: Vec<String>,
    audio_quality: Option<String>,
    cookies_file: Option<PathBuf>,
    ffmpeg_location: Option<PathBuf>,
    extractor_args: Option<String>,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, categories: Vec<String>) -> Self {
        Self {
            program: program.into(),
            categories,
            audio_quality: None,
            cookies_file: None,
            ffmpeg_location: None,
            extractor_args: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.ytdlp_path.clone(),
            categories: config.categories(),
            audio_quality: config.audio_quality.clone(),
            cookies_file: config.cookies_file.clone(),
            ffmpeg_location: config.ffmpeg_location.clone(),
            extractor_args: config.ytdlp_extractor_args.clone(),
        }
    }

    fn sponsor_categories(&self) -> String {
        if self.categories.is_empty() {
            "sponsor".to_string()
        } else {
            self.categories.join(",")
        }
    }

    /// Command line arguments for one download
    pub fn args(&self, content_id: &str, format: AudioFormat, work_dir: &Path) -> Vec<OsString> {
        let quality = self
            .audio_quality
            .as_deref()
            .unwrap_or(format.default_quality());

        let mut args: Vec<OsString> = vec![
            "--no-progress".into(),
            "--format-sort".into(),
            format.format_sort().into(),
            "--sponsorblock-remove".into(),
            self.sponsor_categories().into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            format.name().into(),
            "--audio-quality".into(),
            quality.into(),
            "--no-playlist".into(),
            "--continue".into(),
            "--paths".into(),
            work_dir.as_os_str().to_owned(),
            "--output".into(),
            format!("{content_id}.%(ext)s").into(),
        ];

        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(ffmpeg.as_os_str().to_owned());
        }
        if let Some(cookies) = &self.cookies_file {
            args.push("--cookies".into());
            args.push(cookies.as_os_str().to_owned());
        }
        if let Some(extractor_args) = &self.extractor_args {
            args.push("--extractor-args".into());
            args.push(extractor_args.into());
        }

        args.push(format!("{WATCH_URL}{content_id}").into());
        args
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl Materializer for YtDlp {
    async fn materialize(
        &self,
        content_id: &str,
        format: AudioFormat,
        work_dir: &Path,
    ) -> Result<PathBuf, MaterializeError> {
        let args = self.args(content_id, format, work_dir);
        debug!(content_id, program = %self.program.display(), ?args, "Launching yt-dlp");

        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MaterializeError::SpawnFailed {
                program: self.program.display().to_string(),
                source: e,
            })?;

        let produced = work_dir.join(format!("{}.{}", content_id, format.extension()));
        let produced_exists = tokio::fs::try_exists(&produced).await.unwrap_or(false);

        if output.status.success() {
            return if produced_exists {
                Ok(produced)
            } else {
                Err(MaterializeError::MissingArtifact(produced))
            };
        }

        if produced_exists {
            warn!(
                content_id,
                exit_code = ?output.status.code(),
                "yt-dlp exited with an error but produced the file"
            );
            return Ok(produced);
        }

        Err(MaterializeError::ToolFailed {
            content_id: content_id.to_string(),
            exit_code: output.status.code(),
            stderr: stderr_tail(&output.stderr),
        })
    }
}
