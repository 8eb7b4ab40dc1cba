// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a collection (and therefore its episodes) was discovered
///
/// The same content id may exist once per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EpisodeKind {
    Channel,
    Playlist,
}

impl EpisodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeKind::Channel => "CHANNEL",
            EpisodeKind::Playlist => "PLAYLIST",
        }
    }

    /// Lowercase name used as the feed kind in cache fingerprints
    pub fn feed_kind(&self) -> &'static str {
        match self {
            EpisodeKind::Channel => "channel",
            EpisodeKind::Playlist => "playlist",
        }
    }
}

impl fmt::Display for EpisodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "channel" => Ok(EpisodeKind::Channel),
            "playlist" => Ok(EpisodeKind::Playlist),
            other => Err(format!("unknown collection kind '{other}'")),
        }
    }
}

/// A channel or playlist mirrored as a feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub kind: EpisodeKind,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub artist_name: String,
    pub last_build: DateTime<Utc>,
}

/// One discovered content item belonging to a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub content_id: String,
    pub collection_id: String,
    pub kind: EpisodeKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub duration_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,
}

impl Episode {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

/// Last computed sponsor skip time for a content id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipBaseline {
    pub content_id: String,
    pub total_skip_time: f64,
    pub last_accessed: DateTime<Utc>,
}
