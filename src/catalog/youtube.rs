// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::error::CatalogError;
use crate::http::HttpClient;
use crate::model::EpisodeKind;

use super::{
    CatalogApi, CatalogItem, CatalogPage, CollectionInfo, DateRange, VideoDetails,
    parse_iso8601_duration,
};

/// Base URL of the YouTube Data API v3
pub const YOUTUBE_API_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Upper bound the API accepts for `maxResults` and for ids per videos call
const MAX_PAGE_SIZE: u32 = 50;

const UNAVAILABLE_TITLES: [&str; 2] = ["Private video", "Deleted video"];
const UNAVAILABLE_PRIVACY: [&str; 2] = ["private", "privacyStatusUnspecified"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
    standard: Option<Thumbnail>,
    maxres: Option<Thumbnail>,
}

impl Thumbnails {
    /// Largest available thumbnail: maxres, standard, high, medium, default
    fn best(&self) -> Option<String> {
        [
            &self.maxres,
            &self.standard,
            &self.high,
            &self.medium,
            &self.default,
        ]
        .into_iter()
        .flatten()
        .map(|t| t.url.clone())
        .find(|url| !url.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    kind: String,
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    id: ResourceId,
    snippet: Option<SearchSnippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    #[serde(default)]
    title: String,
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    snippet: PlaylistItemSnippet,
    status: Option<PlaylistItemStatus>,
    content_details: Option<PlaylistItemDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    #[serde(default)]
    title: String,
    published_at: Option<DateTime<Utc>>,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemStatus {
    privacy_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemDetails {
    video_published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Video {
    id: String,
    snippet: VideoSnippet,
    content_details: VideoContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
struct VideoContentDetails {
    duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Channel {
    id: String,
    snippet: ChannelSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSnippet {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Playlist {
    id: String,
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    channel_title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Catalog client for the YouTube Data API v3
pub struct YoutubeCatalog<C: HttpClient> {
    client: C,
    api_key: String,
    base_url: String,
    page_size: u32,
}

impl<C: HttpClient> YoutubeCatalog<C> {
    pub fn new(client: C, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: YOUTUBE_API_URL.to_string(),
            page_size: MAX_PAGE_SIZE,
        }
    }

    /// Point the client at a different API root (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    fn endpoint(&self, resource: &str, params: &[(&str, &str)]) -> Result<Url, CatalogError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, resource))?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    /// GET and decode; the API key is appended here so it never shows up in errors
    async fn fetch<T: DeserializeOwned>(&self, url: Url) -> Result<T, CatalogError> {
        let display_url = url.to_string();
        let mut request_url = url;
        request_url
            .query_pairs_mut()
            .append_pair("key", &self.api_key);

        debug!(url = %display_url, "Calling catalog API");

        let response = self
            .client
            .get(request_url.as_str())
            .await
            .map_err(|e| CatalogError::HttpFailed {
                url: display_url.clone(),
                source: e.without_url(),
            })?;

        if !response.is_success() {
            return Err(CatalogError::HttpStatus {
                url: display_url,
                status: response.status,
            });
        }

        serde_json::from_slice(&response.body).map_err(|e| CatalogError::DecodeFailed {
            url: display_url,
            source: e,
        })
    }
}

#[async_trait]
impl<C: HttpClient> CatalogApi for YoutubeCatalog<C> {
    async fn lookup_collection(
        &self,
        id: &str,
        kind: EpisodeKind,
    ) -> Result<CollectionInfo, CatalogError> {
        let not_found = || CatalogError::NotFound {
            kind: kind.feed_kind().to_string(),
            id: id.to_string(),
        };

        match kind {
            EpisodeKind::Channel => {
                let url = self.endpoint("channels", &[("part", "snippet"), ("id", id)])?;
                let response: ListResponse<Channel> = self.fetch(url).await?;
                let channel = response.items.into_iter().next().ok_or_else(not_found)?;

                Ok(CollectionInfo {
                    id: channel.id,
                    artist_name: channel.snippet.title.clone(),
                    name: channel.snippet.title,
                    description: channel.snippet.description,
                    artwork_url: channel.snippet.thumbnails.best(),
                })
            }
            EpisodeKind::Playlist => {
                let url = self.endpoint("playlists", &[("part", "snippet"), ("id", id)])?;
                let response: ListResponse<Playlist> = self.fetch(url).await?;
                let playlist = response.items.into_iter().next().ok_or_else(not_found)?;

                let artist_name = if playlist.snippet.channel_title.is_empty() {
                    playlist.snippet.title.clone()
                } else {
                    playlist.snippet.channel_title
                };

                Ok(CollectionInfo {
                    id: playlist.id,
                    name: playlist.snippet.title,
                    description: playlist.snippet.description,
                    artwork_url: playlist.snippet.thumbnails.best(),
                    artist_name,
                })
            }
        }
    }

    async fn search_channel(
        &self,
        channel_id: &str,
        range: &DateRange,
        page_token: Option<&str>,
    ) -> Result<CatalogPage, CatalogError> {
        let page_size = self.page_size.to_string();
        let after = range.published_after.map(rfc3339);
        let before = range.published_before.map(rfc3339);

        let mut params = vec![
            ("part", "id,snippet"),
            ("channelId", channel_id),
            ("type", "video"),
            ("order", "date"),
            ("maxResults", page_size.as_str()),
        ];
        if let Some(after) = &after {
            params.push(("publishedAfter", after.as_str()));
        }
        if let Some(before) = &before {
            params.push(("publishedBefore", before.as_str()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let url = self.endpoint("search", &params)?;
        let response: ListResponse<SearchResult> = self.fetch(url).await?;

        let items = response
            .items
            .into_iter()
            .filter_map(|result| {
                let content_id = result.id.video_id?;
                let (title, published_at) = result
                    .snippet
                    .map(|s| (s.title, s.published_at))
                    .unwrap_or_default();
                Some(CatalogItem {
                    content_id,
                    kind_marker: result.id.kind,
                    title,
                    published_at,
                    unavailable: false,
                })
            })
            .collect();

        Ok(CatalogPage {
            items,
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn playlist_items(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<CatalogPage, CatalogError> {
        let page_size = self.page_size.to_string();
        let mut params = vec![
            ("part", "snippet,status,contentDetails"),
            ("playlistId", playlist_id),
            ("maxResults", page_size.as_str()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let url = self.endpoint("playlistItems", &params)?;
        let response: ListResponse<PlaylistItem> = self.fetch(url).await?;

        let items = response
            .items
            .into_iter()
            .filter_map(|item| {
                let content_id = item.snippet.resource_id.video_id?;
                let private = item
                    .status
                    .and_then(|s| s.privacy_status)
                    .is_some_and(|p| UNAVAILABLE_PRIVACY.contains(&p.as_str()));
                let unavailable =
                    private || UNAVAILABLE_TITLES.contains(&item.snippet.title.as_str());
                let published_at = item
                    .content_details
                    .and_then(|d| d.video_published_at)
                    .or(item.snippet.published_at);

                Some(CatalogItem {
                    content_id,
                    kind_marker: item.snippet.resource_id.kind,
                    title: item.snippet.title,
                    published_at,
                    unavailable,
                })
            })
            .collect();

        Ok(CatalogPage {
            items,
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn video_details(&self, ids: &[String]) -> Result<Vec<VideoDetails>, CatalogError> {
        let mut details = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_PAGE_SIZE as usize) {
            let joined = chunk.join(",");
            let max_results = chunk.len().to_string();
            let url = self.endpoint(
                "videos",
                &[
                    ("part", "id,snippet,contentDetails"),
                    ("id", joined.as_str()),
                    ("maxResults", max_results.as_str()),
                ],
            )?;
            let response: ListResponse<Video> = self.fetch(url).await?;

            for video in response.items {
                let duration = match parse_iso8601_duration(&video.content_details.duration) {
                    Ok(duration) => duration,
                    Err(e) => {
                        warn!(content_id = %video.id, error = %e, "Skipping video with unreadable duration");
                        continue;
                    }
                };

                details.push(VideoDetails {
                    content_id: video.id,
                    artwork_url: video.snippet.thumbnails.best(),
                    title: video.snippet.title,
                    description: video.snippet.description,
                    published_at: video.snippet.published_at,
                    duration,
                });
            }
        }

        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use bytes::Bytes;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves canned bodies by matching the request path
    struct MockHttpClient {
        routes: Vec<(&'static str, u16, &'static str)>,
        requested: Mutex<Vec<String>>,
    }

    impl MockHttpClient {
        fn new(routes: Vec<(&'static str, u16, &'static str)>) -> Self {
            Self {
                routes,
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
            self.requested.lock().unwrap().push(url.to_string());
            let path = Url::parse(url).unwrap().path().to_string();
            let (_, status, body) = self
                .routes
                .iter()
                .find(|(suffix, _, _)| path.ends_with(suffix))
                .copied()
                .unwrap_or(("", 404, "{}"));
            Ok(HttpResponse {
                status,
                body: Bytes::from_static(body.as_bytes()),
            })
        }
    }

    const SEARCH_PAGE: &str = r#"{
      "nextPageToken": "PAGE2",
      "items": [
        {"id": {"kind": "youtube#video", "videoId": "vid1"},
         "snippet": {"title": "First", "publishedAt": "2024-03-01T10:00:00Z"}},
        {"id": {"kind": "youtube#channel", "channelId": "UC123"},
         "snippet": {"title": "The channel itself"}},
        {"id": {"kind": "youtube#playlist", "videoId": "pl1"}}
      ]
    }"#;

    const VIDEOS: &str = r#"{
      "items": [
        {"id": "vid1",
         "snippet": {"title": "First", "description": "Desc", "publishedAt": "2024-03-01T10:00:00Z",
                     "thumbnails": {"default": {"url": "https://i.ytimg.com/vi/vid1/default.jpg"},
                                    "high": {"url": "https://i.ytimg.com/vi/vid1/hqdefault.jpg"}}},
         "contentDetails": {"duration": "PT12M30S"}},
        {"id": "live",
         "snippet": {"title": "Broken", "publishedAt": "2024-03-02T10:00:00Z"},
         "contentDetails": {"duration": "garbage"}},
        {"id": "huge",
         "snippet": {"title": "Overflowing", "publishedAt": "2024-03-03T10:00:00Z"},
         "contentDetails": {"duration": "PT99999999999999999999H"}}
      ]
    }"#;

    const PLAYLIST_ITEMS: &str = r#"{
      "items": [
        {"snippet": {"title": "Newest", "publishedAt": "2024-04-01T00:00:00Z",
                     "resourceId": {"kind": "youtube#video", "videoId": "p1"}},
         "status": {"privacyStatus": "public"},
         "contentDetails": {"videoPublishedAt": "2024-03-30T00:00:00Z"}},
        {"snippet": {"title": "Private video",
                     "resourceId": {"kind": "youtube#video", "videoId": "p2"}},
         "status": {"privacyStatus": "private"}}
      ]
    }"#;

    const CHANNELS: &str = r#"{
      "items": [{"id": "UC123", "snippet": {"title": "Channel Name", "description": "About",
                 "thumbnails": {"maxres": {"url": "https://yt3.ggpht.com/art.jpg"}}}}]
    }"#;

    const PLAYLISTS: &str = r#"{
      "items": [{"id": "PL9", "snippet": {"title": "Best Of", "channelTitle": "Channel Name"}}]
    }"#;

    fn catalog(client: MockHttpClient) -> YoutubeCatalog<MockHttpClient> {
        YoutubeCatalog::new(client, "secret-key").with_base_url("https://api.test/youtube/v3/")
    }

    #[tokio::test]
    async fn search_channel_sends_range_and_filters_items() {
        let catalog = catalog(MockHttpClient::new(vec![("/search", 200, SEARCH_PAGE)]));
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let page = catalog
            .search_channel("UC123", &DateRange::between(after, before), Some("PAGE1"))
            .await
            .unwrap();

        assert_eq!(page.next_page_token.as_deref(), Some("PAGE2"));
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].content_id, "vid1");
        assert!(page.items[0].is_video());
        assert!(!page.items[1].is_video());

        let url = Url::parse(&catalog.client.requested()[0]).unwrap();
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("publishedAfter".into(), "2024-01-01T00:00:00Z".into())));
        assert!(query.contains(&("publishedBefore".into(), "2024-06-01T00:00:00Z".into())));
        assert!(query.contains(&("pageToken".into(), "PAGE1".into())));
        assert!(query.contains(&("key".into(), "secret-key".into())));
    }

    #[tokio::test]
    async fn video_details_parse_duration_and_thumbnail() {
        let catalog = catalog(MockHttpClient::new(vec![("/videos", 200, VIDEOS)]));

        let details = catalog
            .video_details(&["vid1".to_string(), "live".to_string(), "huge".to_string()])
            .await
            .unwrap();

        assert_eq!(details.len(), 1);
        assert_eq!(details[0].duration, Duration::from_secs(750));
        assert_eq!(
            details[0].artwork_url.as_deref(),
            Some("https://i.ytimg.com/vi/vid1/hqdefault.jpg")
        );
    }

    #[tokio::test]
    async fn playlist_items_mark_private_entries() {
        let catalog = catalog(MockHttpClient::new(vec![("/playlistItems", 200, PLAYLIST_ITEMS)]));

        let page = catalog.playlist_items("PL9", None).await.unwrap();

        assert!(page.next_page_token.is_none());
        assert_eq!(page.items.len(), 2);
        assert!(!page.items[0].unavailable);
        assert_eq!(
            page.items[0].published_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 30, 0, 0, 0).unwrap())
        );
        assert!(page.items[1].unavailable);
    }

    #[tokio::test]
    async fn lookup_collection_handles_both_kinds() {
        let catalog = catalog(MockHttpClient::new(vec![
            ("/channels", 200, CHANNELS),
            ("/playlists", 200, PLAYLISTS),
        ]));

        let channel = catalog
            .lookup_collection("UC123", EpisodeKind::Channel)
            .await
            .unwrap();
        let playlist = catalog
            .lookup_collection("PL9", EpisodeKind::Playlist)
            .await
            .unwrap();

        assert_eq!(channel.name, "Channel Name");
        assert_eq!(channel.artist_name, "Channel Name");
        assert_eq!(
            channel.artwork_url.as_deref(),
            Some("https://yt3.ggpht.com/art.jpg")
        );
        assert_eq!(playlist.name, "Best Of");
        assert_eq!(playlist.artist_name, "Channel Name");
        assert!(playlist.artwork_url.is_none());
    }

    #[tokio::test]
    async fn lookup_collection_reports_missing_items() {
        let catalog = catalog(MockHttpClient::new(vec![("/channels", 200, r#"{"items": []}"#)]));

        let result = catalog.lookup_collection("UCnope", EpisodeKind::Channel).await;

        assert!(matches!(result, Err(CatalogError::NotFound { .. })));
    }

    #[tokio::test]
    async fn http_errors_do_not_leak_api_key() {
        let catalog = catalog(MockHttpClient::new(vec![("/search", 403, "{}")]));

        let err = catalog
            .search_channel("UC123", &DateRange::unbounded(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, CatalogError::HttpStatus { status: 403, .. }));
        assert!(!err.to_string().contains("secret-key"));
    }
}
