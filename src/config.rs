// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache;
use crate::download::{AudioFormat, DEFAULT_MAX_CONCURRENT};
use crate::error::ConfigError;
use crate::http::DEFAULT_REQUEST_TIMEOUT;

const CONFIG_FILENAME: &str = "config.json";
const DEFAULT_CONFIG_DIR: &str = "/config";

/// Runtime configuration
///
/// Loaded from defaults, then an optional JSON file, then environment
/// variables. Empty path fields are derived from `config_dir` by
/// [`Config::resolve_paths`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API key for the YouTube Data API
    pub google_api_key: String,
    /// Base directory for persisted state
    pub config_dir: PathBuf,
    /// Directory holding materialized audio (default: `<config_dir>/audio`)
    pub audio_dir: PathBuf,
    /// Episode store file (default: `<config_dir>/catalog.db`)
    pub store_file: PathBuf,
    /// Minimum episode duration, e.g. "3m", "400s", "1h30m"
    pub episode_duration_minimum: String,
    /// Comma-separated sponsor segment categories
    pub sponsorblock_categories: String,
    pub audio_format: String,
    pub audio_quality: Option<String>,
    pub cookies_file: Option<PathBuf>,
    pub ytdlp_path: PathBuf,
    pub ffmpeg_location: Option<PathBuf>,
    pub ytdlp_extractor_args: Option<String>,
    /// Access token appended to media URLs
    pub token: Option<String>,
    pub request_timeout_secs: u64,
    pub feed_cache_ttl_secs: u64,
    pub cache_sweep_interval_secs: u64,
    pub max_concurrent_downloads: usize,
    pub page_size: u32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            google_api_key: String::new(),
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            audio_dir: PathBuf::new(),
            store_file: PathBuf::new(),
            episode_duration_minimum: "3m".to_string(),
            sponsorblock_categories: "sponsor".to_string(),
            audio_format: "m4a".to_string(),
            audio_quality: None,
            cookies_file: None,
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_location: None,
            ytdlp_extractor_args: None,
            token: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            feed_cache_ttl_secs: cache::DEFAULT_TTL.as_secs(),
            cache_sweep_interval_secs: cache::DEFAULT_SWEEP_INTERVAL.as_secs(),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT,
            page_size: 50,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit file or `<config_dir>/config.json`
    ///
    /// A missing default file is not an error; a missing explicit file is.
    pub fn load(explicit_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));

        let mut config = match explicit_file {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_file = config_dir.join(CONFIG_FILENAME);
                if default_file.exists() {
                    Self::from_file(&default_file)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.resolve_paths();
        Ok(config)
    }

    /// Read a JSON config file on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Override fields from environment-style variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("CONFIG_DIR") {
            self.config_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("AUDIO_DIR") {
            self.audio_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("GOOGLE_API_KEY") {
            self.google_api_key = v;
        }
        if let Some(v) = non_empty("MIN_DURATION") {
            self.episode_duration_minimum = v;
        }
        if let Some(v) = non_empty("SPONSORBLOCK_CATEGORIES") {
            self.sponsorblock_categories = v;
        }
        if let Some(v) = non_empty("COOKIES_FILE") {
            self.cookies_file = Some(PathBuf::from(v));
        }
        if let Some(v) = non_empty("TOKEN") {
            self.token = Some(v);
        }
        if let Some(v) = non_empty("YTDLP_EXTRACTOR_ARGS") {
            self.ytdlp_extractor_args = Some(v);
        }
        if let Some(v) = non_empty("AUDIO_FORMAT") {
            self.audio_format = v;
        }
        if let Some(v) = non_empty("AUDIO_QUALITY") {
            self.audio_quality = Some(v);
        }
    }

    /// Fill derived paths from `config_dir`
    pub fn resolve_paths(&mut self) {
        if self.audio_dir.as_os_str().is_empty() {
            self.audio_dir = self.config_dir.join("audio");
        }
        if self.store_file.as_os_str().is_empty() {
            self.store_file = self.config_dir.join("catalog.db");
        }
        if let Some(cookies) = &self.cookies_file
            && cookies.is_relative()
        {
            self.cookies_file = Some(self.config_dir.join(cookies));
        }
    }

    /// Parsed minimum episode duration
    pub fn min_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.episode_duration_minimum)
    }

    /// Configured sponsor segment categories, trimmed, empties removed
    pub fn categories(&self) -> Vec<String> {
        self.sponsorblock_categories
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn default_format(&self) -> Result<AudioFormat, ConfigError> {
        self.audio_format.parse()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn feed_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.feed_cache_ttl_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }
}

/// Parse a duration string such as "3m", "400s", "1h30m" or "1.5h"
///
/// Units: `ns`, `us`, `ms`, `s`, `m`, `h`. A bare `0` is accepted.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let input = value.trim();
    if input.is_empty() {
        return Err(invalid("empty value"));
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_secs = 0f64;
    let mut rest = input;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| invalid("missing unit"))?;
        if number_len == 0 {
            return Err(invalid("expected a number"));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let multiplier = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid("unknown unit")),
        };
        rest = &rest[unit_len..];

        total_secs += number * multiplier;
    }

    Duration::try_from_secs_f64(total_secs).map_err(|_| invalid("out of range"))
}
