// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request pipelines tying the components together
//!
//! Both services are constructed once per process and shared by reference.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cache::FeedCache;
use crate::catalog::CatalogApi;
use crate::download::{AudioFormat, DownloadCoordinator, sanitize_content_id};
use crate::error::{FeedError, MaterializeError};
use crate::feed::{FeedOptions, assemble};
use crate::freshness::FreshnessDecider;
use crate::model::{Collection, EpisodeKind};
use crate::store::EpisodeStore;
use crate::sync::CatalogSynchronizer;

/// A feed request as received from the outer HTTP layer or the CLI
#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub kind: EpisodeKind,
    pub id: String,
    /// Only fetch channel uploads published after this instant
    pub date_filter: Option<DateTime<Utc>>,
    /// Public base URL used in enclosure links
    pub host: String,
    /// Requested audio format; the configured default when `None`
    pub format: Option<AudioFormat>,
}

#[derive(Serialize)]
struct CacheParams<'a> {
    options: &'a FeedOptions,
    date_filter: Option<DateTime<Utc>>,
}

/// Builds feeds: cache, collection lookup, sync, render
pub struct FeedService {
    catalog: Arc<dyn CatalogApi>,
    store: Arc<dyn EpisodeStore>,
    synchronizer: CatalogSynchronizer,
    cache: Arc<FeedCache>,
    default_format: AudioFormat,
    token: Option<String>,
}

impl FeedService {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        store: Arc<dyn EpisodeStore>,
        synchronizer: CatalogSynchronizer,
        cache: Arc<FeedCache>,
        default_format: AudioFormat,
    ) -> Self {
        Self {
            catalog,
            store,
            synchronizer,
            cache,
            default_format,
            token: None,
        }
    }

    /// Token appended to every enclosure URL
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn cache(&self) -> &Arc<FeedCache> {
        &self.cache
    }

    /// Stored collection, looked up in the catalog on first use
    pub async fn ensure_collection(
        &self,
        kind: EpisodeKind,
        id: &str,
    ) -> Result<Collection, FeedError> {
        match self.store.collection(id).await {
            Ok(Some(collection)) if collection.kind == kind => return Ok(collection),
            Ok(_) => {}
            Err(e) => error!(collection_id = id, error = %e, "Failed to read stored collection"),
        }

        let info = self
            .catalog
            .lookup_collection(id, kind)
            .await
            .map_err(|e| FeedError::CollectionUnavailable {
                id: id.to_string(),
                source: e,
            })?;

        let collection = Collection {
            id: info.id,
            kind,
            name: info.name,
            description: info.description,
            artwork_url: info.artwork_url,
            artist_name: info.artist_name,
            last_build: Utc::now(),
        };

        info!(collection_id = id, %kind, name = %collection.name, "Registered new collection");
        if let Err(e) = self.store.save_collection(collection.clone()).await {
            warn!(collection_id = id, error = %e, "Failed to persist collection");
        }
        Ok(collection)
    }

    /// Render the feed for `request`, serving from cache when possible
    ///
    /// Synchronization problems never fail the request; the feed then
    /// contains whatever the store already holds.
    pub async fn feed(&self, request: &FeedRequest) -> Result<Bytes, FeedError> {
        let options = FeedOptions {
            host: request.host.clone(),
            format: request.format.unwrap_or(self.default_format),
            default_format: self.default_format,
            token: self.token.clone(),
        };
        let params = CacheParams {
            options: &options,
            date_filter: request.date_filter,
        };

        if let Some(cached) = self.cache.get(request.kind, &request.id, &params).await {
            info!(collection_id = %request.id, kind = %request.kind, "Serving cached feed");
            return Ok(cached);
        }

        let collection = self.ensure_collection(request.kind, &request.id).await?;

        let report = self
            .synchronizer
            .sync(&collection.id, request.kind, request.date_filter)
            .await;
        if report.saved > 0 {
            self.cache.invalidate_feed(request.kind, &collection.id).await;
        }

        let episodes = self.store.episodes(&collection.id, request.kind).await?;
        let feed = assemble(&collection, &episodes, &options)?;

        self.cache
            .set(request.kind, &request.id, &params, feed.clone())
            .await;
        Ok(feed)
    }
}

/// A materialized audio file ready to be served
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub content_id: String,
    pub path: PathBuf,
    pub format: AudioFormat,
}

impl MediaFile {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Serves media: freshness check, then single-flight materialization
pub struct MediaService {
    freshness: FreshnessDecider,
    coordinator: Arc<DownloadCoordinator>,
    default_format: AudioFormat,
}

impl MediaService {
    pub fn new(
        freshness: FreshnessDecider,
        coordinator: Arc<DownloadCoordinator>,
        default_format: AudioFormat,
    ) -> Self {
        Self {
            freshness,
            coordinator,
            default_format,
        }
    }

    /// Resolve a media request to a complete file on disk
    pub async fn media(
        &self,
        content_id: &str,
        format: Option<AudioFormat>,
    ) -> Result<MediaFile, MaterializeError> {
        let format = format.unwrap_or(self.default_format);
        let content_id = sanitize_content_id(content_id)?;
        let freshness = self.freshness.should_regenerate(&content_id, format).await;
        if freshness.regenerate {
            info!(content_id = %content_id, skip_time = freshness.skip_time, "Artifact needs (re)generation");
        }

        let (content_id, completion) = self.coordinator.materialize(&content_id, format).await?;
        let path = completion.wait().await?;

        Ok(MediaFile {
            content_id,
            path,
            format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogItem, CatalogPage, CollectionInfo, DateRange, VideoDetails};
    use crate::download::Materializer;
    use crate::error::CatalogError;
    use crate::segments::SkipTimeSource;
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    struct FakeCatalog {
        known: bool,
        search_fails: bool,
        lookups: AtomicUsize,
        searches: AtomicUsize,
    }

    impl FakeCatalog {
        fn new() -> Self {
            Self {
                known: true,
                search_fails: false,
                lookups: AtomicUsize::new(0),
                searches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CatalogApi for FakeCatalog {
        async fn lookup_collection(
            &self,
            id: &str,
            kind: EpisodeKind,
        ) -> Result<CollectionInfo, CatalogError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if !self.known {
                return Err(CatalogError::NotFound {
                    kind: kind.feed_kind().to_string(),
                    id: id.to_string(),
                });
            }
            Ok(CollectionInfo {
                id: id.to_string(),
                name: "Example".to_string(),
                description: "An example channel".to_string(),
                artwork_url: None,
                artist_name: "Example".to_string(),
            })
        }

        async fn search_channel(
            &self,
            _channel_id: &str,
            _range: &DateRange,
            _page_token: Option<&str>,
        ) -> Result<CatalogPage, CatalogError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            if self.search_fails {
                return Err(CatalogError::HttpStatus {
                    url: "https://api.test/search".to_string(),
                    status: 503,
                });
            }
            Ok(CatalogPage {
                items: vec![CatalogItem {
                    content_id: "vid1".to_string(),
                    kind_marker: "youtube#video".to_string(),
                    title: "Episode one".to_string(),
                    published_at: None,
                    unavailable: false,
                }],
                next_page_token: None,
            })
        }

        async fn playlist_items(
            &self,
            _playlist_id: &str,
            _page_token: Option<&str>,
        ) -> Result<CatalogPage, CatalogError> {
            Ok(CatalogPage::default())
        }

        async fn video_details(&self, ids: &[String]) -> Result<Vec<VideoDetails>, CatalogError> {
            Ok(ids
                .iter()
                .map(|id| VideoDetails {
                    content_id: id.clone(),
                    title: "Episode one".to_string(),
                    description: "First episode".to_string(),
                    published_at: Utc::now(),
                    duration: Duration::from_secs(1800),
                    artwork_url: None,
                })
                .collect())
        }
    }

    fn feed_service(catalog: Arc<FakeCatalog>, store: Arc<SqliteStore>) -> FeedService {
        let synchronizer = CatalogSynchronizer::new(catalog.clone(), store.clone(), "3m");
        FeedService::new(
            catalog,
            store,
            synchronizer,
            Arc::new(FeedCache::default()),
            AudioFormat::M4a,
        )
    }

    fn request() -> FeedRequest {
        FeedRequest {
            kind: EpisodeKind::Channel,
            id: "UC1".to_string(),
            date_filter: None,
            host: "http://pod.local".to_string(),
            format: None,
        }
    }

    fn item_count(feed: &Bytes) -> usize {
        rss::Channel::read_from(&feed[..]).unwrap().items().len()
    }

    #[tokio::test]
    async fn first_request_syncs_and_second_hits_cache() {
        let catalog = Arc::new(FakeCatalog::new());
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let service = feed_service(catalog.clone(), store.clone());

        let first = service.feed(&request()).await.unwrap();
        assert_eq!(item_count(&first), 1);
        assert!(store.collection("UC1").await.unwrap().is_some());

        let searches = catalog.searches.load(Ordering::SeqCst);
        let second = service.feed(&request()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(catalog.searches.load(Ordering::SeqCst), searches);
        assert_eq!(catalog.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn format_variants_are_cached_separately() {
        let catalog = Arc::new(FakeCatalog::new());
        let service = feed_service(catalog, Arc::new(SqliteStore::in_memory().await.unwrap()));

        service.feed(&request()).await.unwrap();
        let mp3 = FeedRequest {
            format: Some(AudioFormat::Mp3),
            ..request()
        };
        let feed = service.feed(&mp3).await.unwrap();

        assert!(String::from_utf8_lossy(&feed).contains("vid1.mp3?format=mp3"));
        assert_eq!(service.cache().len().await, 2);
    }

    #[tokio::test]
    async fn unknown_collection_is_an_error() {
        let catalog = Arc::new(FakeCatalog {
            known: false,
            ..FakeCatalog::new()
        });
        let service = feed_service(catalog, Arc::new(SqliteStore::in_memory().await.unwrap()));

        assert!(matches!(
            service.feed(&request()).await,
            Err(FeedError::CollectionUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn sync_failure_still_serves_stored_episodes() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        feed_service(Arc::new(FakeCatalog::new()), store.clone())
            .feed(&request())
            .await
            .unwrap();

        let failing = Arc::new(FakeCatalog {
            search_fails: true,
            ..FakeCatalog::new()
        });
        let feed = feed_service(failing, store)
            .feed(&request())
            .await
            .unwrap();
        assert_eq!(item_count(&feed), 1);
    }

    struct FixedSkipTime(Mutex<f64>);

    #[async_trait]
    impl SkipTimeSource for FixedSkipTime {
        async fn total_skip_time(&self, _content_id: &str) -> f64 {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct WritingTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Materializer for WritingTool {
        async fn materialize(
            &self,
            content_id: &str,
            format: AudioFormat,
            work_dir: &Path,
        ) -> Result<PathBuf, MaterializeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = work_dir.join(format!("{content_id}.{}", format.extension()));
            tokio::fs::write(&path, b"audio").await.unwrap();
            Ok(path)
        }
    }

    #[tokio::test]
    async fn media_is_regenerated_when_segments_change() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let skip = Arc::new(FixedSkipTime(Mutex::new(10.0)));
        let tool = Arc::new(WritingTool::default());
        let coordinator = Arc::new(DownloadCoordinator::new(dir.path(), tool.clone()));
        let service = MediaService::new(
            FreshnessDecider::new(store, skip.clone(), coordinator.clone()),
            coordinator,
            AudioFormat::M4a,
        );

        let file = service.media("abc.m4a", None).await.unwrap();
        assert_eq!(file.content_id, "abc");
        assert_eq!(file.path, dir.path().join("abc.m4a"));
        assert_eq!(file.mime_type(), "audio/mp4");

        // unchanged segments reuse the artifact
        service.media("abc", None).await.unwrap();
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);

        *skip.0.lock().unwrap() = 25.0;
        service.media("abc", None).await.unwrap();
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn media_rejects_invalid_ids() {
        let dir = tempdir().unwrap();
        let coordinator = Arc::new(DownloadCoordinator::new(
            dir.path(),
            Arc::new(WritingTool::default()),
        ));
        let service = MediaService::new(
            FreshnessDecider::new(
                Arc::new(SqliteStore::in_memory().await.unwrap()),
                Arc::new(FixedSkipTime(Mutex::new(0.0))),
                coordinator.clone(),
            ),
            coordinator,
            AudioFormat::M4a,
        );

        assert!(matches!(
            service.media("../../etc/passwd", None).await,
            Err(MaterializeError::InvalidContentId(_))
        ));
    }
}
