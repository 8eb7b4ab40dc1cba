use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, MaterializeError};

/// Audio container an artifact is materialized into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    M4a,
    Mp3,
    Opus,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 3] = [AudioFormat::M4a, AudioFormat::Mp3, AudioFormat::Opus];

    pub fn name(self) -> &'static str {
        match self {
            AudioFormat::M4a => "m4a",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Opus => "opus",
        }
    }

    /// File extension without the leading dot
    pub fn extension(self) -> &'static str {
        self.name()
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Opus => "audio/opus",
        }
    }

    /// Bitrate passed to the extractor unless overridden by configuration
    pub fn default_quality(self) -> &'static str {
        match self {
            AudioFormat::M4a | AudioFormat::Mp3 => "192k",
            AudioFormat::Opus => "128k",
        }
    }

    /// yt-dlp `--format-sort` expression
    pub fn format_sort(self) -> &'static str {
        match self {
            // prefer the original audio track over dubbed ones
            AudioFormat::M4a => "ext::m4a[format_note*=original]",
            AudioFormat::Mp3 | AudioFormat::Opus => "ext",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AudioFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "m4a" => Ok(AudioFormat::M4a),
            "mp3" => Ok(AudioFormat::Mp3),
            "opus" => Ok(AudioFormat::Opus),
            _ => Err(ConfigError::UnknownAudioFormat(s.to_string())),
        }
    }
}

/// Check if a character may appear in a content id (whitelist approach)
fn is_valid_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_')
}

/// Normalize a requested content id
///
/// A trailing known audio extension (`abc.m4a`) is stripped. Anything else
/// outside `[A-Za-z0-9_-]` is rejected so ids can never escape the audio
/// directory.
pub fn sanitize_content_id(raw: &str) -> Result<String, MaterializeError> {
    let mut id = raw.trim();
    for format in AudioFormat::ALL {
        if let Some(stripped) = id
            .strip_suffix(format.extension())
            .and_then(|s| s.strip_suffix('.'))
        {
            id = stripped;
            break;
        }
    }

    if id.is_empty() || !id.chars().all(is_valid_id_char) {
        return Err(MaterializeError::InvalidContentId(raw.to_string()));
    }
    Ok(id.to_string())
}

/// Final location of the artifact for `content_id` in `format`
pub fn artifact_path(audio_dir: &Path, content_id: &str, format: AudioFormat) -> PathBuf {
    audio_dir.join(format!("{}.{}", content_id, format.extension()))
}
