// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogApi, CatalogItem, DateRange, VideoDetails};
use crate::config::parse_duration;
use crate::error::SyncError;
use crate::model::{Episode, EpisodeKind};
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};
use crate::store::EpisodeStore;

/// Result of a synchronizer run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Number of episodes newly persisted
    pub saved: usize,
    /// Number of ranges (or playlist scans) attempted
    pub ranges: usize,
    /// Number of ranges aborted by an error
    pub failed_ranges: usize,
}

/// Decide which channel date ranges need fetching
///
/// `oldest`/`newest` are the publication dates of the locally known
/// boundary episodes. Without a date filter the gap on both sides of the
/// known span is fetched, or the whole history when nothing is known. With
/// a filter, the backlog between the filter and the oldest known episode is
/// fetched together with anything newer than the newest known one; when the
/// oldest known episode already predates the filter, everything from the
/// filter onwards is re-scanned so items around the boundary are not missed.
pub fn plan_channel_ranges(
    oldest: Option<DateTime<Utc>>,
    newest: Option<DateTime<Utc>>,
    date_filter: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Vec<DateRange> {
    match (date_filter, oldest, newest) {
        (None, Some(oldest), Some(newest)) => vec![
            DateRange::between(newest, now),
            DateRange::before(oldest),
        ],
        (None, _, _) => vec![DateRange::unbounded()],
        (Some(filter), Some(oldest), Some(newest)) if oldest > filter => vec![
            DateRange::between(filter, oldest),
            DateRange::between(newest, now),
        ],
        (Some(filter), _, _) => vec![DateRange::between(filter, now)],
    }
}

fn to_episode(collection_id: &str, kind: EpisodeKind, details: VideoDetails) -> Episode {
    Episode {
        content_id: details.content_id,
        collection_id: collection_id.to_string(),
        kind,
        title: details.title,
        description: details.description,
        published_at: details.published_at,
        duration_secs: details.duration.as_secs(),
        artwork_url: details.artwork_url,
    }
}

/// Incrementally mirrors an external catalog into the episode store
///
/// Errors never escape [`CatalogSynchronizer::sync`]: a failing range is
/// logged and abandoned, pages persisted before the failure are kept.
pub struct CatalogSynchronizer {
    catalog: Arc<dyn CatalogApi>,
    store: Arc<dyn EpisodeStore>,
    min_duration: String,
    reporter: SharedProgressReporter,
}

impl CatalogSynchronizer {
    /// `min_duration` is the raw configured setting, parsed on every run
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        store: Arc<dyn EpisodeStore>,
        min_duration: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            store,
            min_duration: min_duration.into(),
            reporter: NoopReporter::shared(),
        }
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Fill gaps between the local store and the external catalog
    pub async fn sync(
        &self,
        collection_id: &str,
        kind: EpisodeKind,
        date_filter: Option<DateTime<Utc>>,
    ) -> SyncReport {
        let min_duration = match parse_duration(&self.min_duration) {
            Ok(min_duration) => min_duration,
            Err(e) => {
                error!(collection_id, error = %e, "Invalid minimum episode duration, skipping sync");
                return SyncReport::default();
            }
        };

        self.reporter.report(ProgressEvent::SyncStarted {
            collection_id: collection_id.to_string(),
            kind,
        });

        let report = match kind {
            EpisodeKind::Channel => {
                self.sync_channel(collection_id, date_filter, min_duration)
                    .await
            }
            EpisodeKind::Playlist => self.sync_playlist(collection_id).await,
        };

        info!(
            collection_id,
            %kind,
            saved = report.saved,
            failed_ranges = report.failed_ranges,
            "Catalog sync finished"
        );

        self.reporter.report(ProgressEvent::SyncCompleted {
            collection_id: collection_id.to_string(),
            saved_count: report.saved,
            failed_ranges: report.failed_ranges,
        });

        report
    }

    async fn sync_channel(
        &self,
        channel_id: &str,
        date_filter: Option<DateTime<Utc>>,
        min_duration: Duration,
    ) -> SyncReport {
        let mut report = SyncReport::default();

        let boundaries = async {
            let oldest = self
                .store
                .oldest_episode(channel_id, EpisodeKind::Channel)
                .await?;
            let newest = self
                .store
                .newest_episode(channel_id, EpisodeKind::Channel)
                .await?;
            Ok::<_, SyncError>((
                oldest.map(|e| e.published_at),
                newest.map(|e| e.published_at),
            ))
        };

        let (oldest, newest) = match boundaries.await {
            Ok(boundaries) => boundaries,
            Err(e) => {
                error!(channel_id, error = %e, "Failed to read known episode range");
                report.failed_ranges += 1;
                return report;
            }
        };

        let ranges = plan_channel_ranges(oldest, newest, date_filter, Utc::now());
        debug!(channel_id, ?ranges, "Planned channel ranges");

        for range in ranges {
            report.ranges += 1;
            match self
                .fetch_channel_range(channel_id, &range, min_duration)
                .await
            {
                Ok(saved) => report.saved += saved,
                Err(e) => {
                    error!(channel_id, ?range, error = %e, "Channel range fetch aborted");
                    report.failed_ranges += 1;
                    self.reporter.report(ProgressEvent::RangeFailed {
                        collection_id: channel_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Page through one date range, persisting each page as one batch
    async fn fetch_channel_range(
        &self,
        channel_id: &str,
        range: &DateRange,
        min_duration: Duration,
    ) -> Result<usize, SyncError> {
        self.reporter.report(ProgressEvent::RangeStarted {
            collection_id: channel_id.to_string(),
            range: *range,
        });

        let mut known = self
            .store
            .episode_ids(channel_id, EpisodeKind::Channel)
            .await?;
        let mut page_token: Option<String> = None;
        let mut page_number = 0;
        let mut saved = 0;

        loop {
            let page = self
                .catalog
                .search_channel(channel_id, range, page_token.as_deref())
                .await?;
            page_number += 1;

            let fresh = unseen_video_ids(&page.items, &known);
            let discovered = fresh.len();
            let mut page_saved = 0;

            if !fresh.is_empty() {
                let episodes: Vec<Episode> = self
                    .catalog
                    .video_details(&fresh)
                    .await?
                    .into_iter()
                    .filter(|details| {
                        let long_enough = details.duration >= min_duration;
                        if !long_enough {
                            debug!(
                                content_id = %details.content_id,
                                duration_secs = details.duration.as_secs(),
                                "Dropping episode below minimum duration"
                            );
                        }
                        long_enough
                    })
                    .map(|details| to_episode(channel_id, EpisodeKind::Channel, details))
                    .collect();

                page_saved = self.store.insert_episodes(episodes).await?;
                known.extend(fresh);
            }

            saved += page_saved;
            self.reporter.report(ProgressEvent::PageProcessed {
                collection_id: channel_id.to_string(),
                page: page_number,
                discovered,
                saved: page_saved,
            });

            match page.next_page_token {
                Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                    warn!(channel_id, token = %next, "Catalog repeated a page token, stopping");
                    break;
                }
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(saved)
    }

    async fn sync_playlist(&self, playlist_id: &str) -> SyncReport {
        let mut report = SyncReport {
            ranges: 1,
            ..Default::default()
        };

        match self.scan_playlist(playlist_id).await {
            Ok(saved) => report.saved = saved,
            Err(e) => {
                error!(playlist_id, error = %e, "Playlist scan aborted");
                report.failed_ranges = 1;
                self.reporter.report(ProgressEvent::RangeFailed {
                    collection_id: playlist_id.to_string(),
                    error: e.to_string(),
                });
            }
        }

        report
    }

    /// Scan a playlist newest-first, stopping at the first known item
    ///
    /// Assumes the playlist only ever grows at the front. Items inserted
    /// further down after a previous scan are not discovered.
    ///
    /// Known items are scoped to this playlist, but the store keeps one
    /// episode per `(content_id, PLAYLIST)`. A video already stored for
    /// another playlist is skipped on insert and stays absent from this
    /// playlist's feed.
    async fn scan_playlist(&self, playlist_id: &str) -> Result<usize, SyncError> {
        let known = self
            .store
            .episode_ids(playlist_id, EpisodeKind::Playlist)
            .await?;
        let mut page_token: Option<String> = None;
        let mut page_number = 0;
        let mut saved = 0;

        loop {
            let page = self
                .catalog
                .playlist_items(playlist_id, page_token.as_deref())
                .await?;
            page_number += 1;

            let mut fresh = Vec::new();
            let mut reached_known = false;
            for item in &page.items {
                if known.contains(&item.content_id) {
                    debug!(playlist_id, content_id = %item.content_id, "Reached known playlist item");
                    reached_known = true;
                    break;
                }
                if item.unavailable || !item.is_video() || fresh.contains(&item.content_id) {
                    continue;
                }
                fresh.push(item.content_id.clone());
            }

            let discovered = fresh.len();
            let mut page_saved = 0;
            if !fresh.is_empty() {
                let episodes: Vec<Episode> = self
                    .catalog
                    .video_details(&fresh)
                    .await?
                    .into_iter()
                    .map(|details| to_episode(playlist_id, EpisodeKind::Playlist, details))
                    .collect();
                let resolved = episodes.len();
                page_saved = self.store.insert_episodes(episodes).await?;
                if page_saved < resolved {
                    debug!(
                        playlist_id,
                        skipped = resolved - page_saved,
                        "Playlist items already stored under another playlist"
                    );
                }
            }

            saved += page_saved;
            self.reporter.report(ProgressEvent::PageProcessed {
                collection_id: playlist_id.to_string(),
                page: page_number,
                discovered,
                saved: page_saved,
            });

            if reached_known {
                break;
            }
            match page.next_page_token {
                Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                    warn!(playlist_id, token = %next, "Catalog repeated a page token, stopping");
                    break;
                }
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(saved)
    }
}

/// Video ids on a page that are neither known nor repeated on the page
fn unseen_video_ids(items: &[CatalogItem], known: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| item.is_video() && !known.contains(&item.content_id))
        .filter(|item| seen.insert(item.content_id.clone()))
        .map(|item| item.content_id.clone())
        .collect()
}
