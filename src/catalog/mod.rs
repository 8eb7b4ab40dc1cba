// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! External video catalog: range queries, playlist pages, detail lookups

mod duration;
mod youtube;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CatalogError;
use crate::model::EpisodeKind;

pub use duration::parse_iso8601_duration;
pub use youtube::{YOUTUBE_API_URL, YoutubeCatalog};

/// Kind markers that identify a real video in search results
pub const VIDEO_KIND_MARKERS: [&str; 2] = ["youtube#video", "youtube#searchResult"];

/// Publication window for a channel search; `None` leaves that side open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub published_after: Option<DateTime<Utc>>,
    pub published_before: Option<DateTime<Utc>>,
}

impl DateRange {
    /// The whole history of a collection
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn between(after: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        Self {
            published_after: Some(after),
            published_before: Some(before),
        }
    }

    pub fn before(before: DateTime<Utc>) -> Self {
        Self {
            published_after: None,
            published_before: Some(before),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.published_after.is_none_or(|after| at >= after)
            && self.published_before.is_none_or(|before| at <= before)
    }
}

/// One entry of a catalog listing page
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub content_id: String,
    /// Resource kind as reported by the catalog, e.g. `youtube#video`
    pub kind_marker: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Whether the catalog reports the item as private or deleted
    pub unavailable: bool,
}

impl CatalogItem {
    pub fn is_video(&self) -> bool {
        VIDEO_KIND_MARKERS.contains(&self.kind_marker.as_str())
    }
}

/// A page of catalog results plus the token for the next page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogPage {
    pub items: Vec<CatalogItem>,
    pub next_page_token: Option<String>,
}

/// Fully resolved metadata for one content item
#[derive(Debug, Clone, PartialEq)]
pub struct VideoDetails {
    pub content_id: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub duration: Duration,
    pub artwork_url: Option<String>,
}

/// Display metadata for a channel or playlist
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub artwork_url: Option<String>,
    pub artist_name: String,
}

/// External catalog abstraction for testability
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Resolve display metadata for a channel or playlist
    async fn lookup_collection(
        &self,
        id: &str,
        kind: EpisodeKind,
    ) -> Result<CollectionInfo, CatalogError>;

    /// One page of a channel's uploads inside `range`, newest first
    async fn search_channel(
        &self,
        channel_id: &str,
        range: &DateRange,
        page_token: Option<&str>,
    ) -> Result<CatalogPage, CatalogError>;

    /// One page of a playlist, newest first
    async fn playlist_items(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<CatalogPage, CatalogError>;

    /// Batch-resolve full metadata; unknown ids are simply absent
    async fn video_details(&self, ids: &[String]) -> Result<Vec<VideoDetails>, CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn kind_marker_identifies_videos() {
        let mut item = CatalogItem {
            content_id: "abc".to_string(),
            kind_marker: "youtube#video".to_string(),
            title: "A video".to_string(),
            published_at: None,
            unavailable: false,
        };
        assert!(item.is_video());

        item.kind_marker = "youtube#searchResult".to_string();
        assert!(item.is_video());

        item.kind_marker = "youtube#playlist".to_string();
        assert!(!item.is_video());
    }

    #[test]
    fn date_range_bounds_are_inclusive() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let range = DateRange::between(start, end);

        assert!(range.contains(start));
        assert!(range.contains(end));
        assert!(!range.contains(end + chrono::Duration::seconds(1)));
        assert!(DateRange::unbounded().contains(start));
        assert!(DateRange::before(start).contains(start - chrono::Duration::days(365)));
    }
}
