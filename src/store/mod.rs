// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persisted catalog of collections, episodes and skip baselines

mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{Collection, Episode, EpisodeKind, SkipBaseline};

pub use sqlite::SqliteStore;

/// Persistence seam shared by the synchronizer, the feed service and the
/// freshness decider
///
/// Implementations must serialize conflicting writes. Episodes are unique by
/// `(content_id, kind)`; inserting an existing pair is a no-op.
#[async_trait]
pub trait EpisodeStore: Send + Sync {
    async fn collection(&self, id: &str) -> Result<Option<Collection>, StoreError>;

    async fn save_collection(&self, collection: Collection) -> Result<(), StoreError>;

    async fn episode_exists(&self, content_id: &str, kind: EpisodeKind) -> Result<bool, StoreError>;

    /// Content ids of every known episode of a collection
    async fn episode_ids(
        &self,
        collection_id: &str,
        kind: EpisodeKind,
    ) -> Result<HashSet<String>, StoreError>;

    async fn oldest_episode(
        &self,
        collection_id: &str,
        kind: EpisodeKind,
    ) -> Result<Option<Episode>, StoreError>;

    async fn newest_episode(
        &self,
        collection_id: &str,
        kind: EpisodeKind,
    ) -> Result<Option<Episode>, StoreError>;

    /// All episodes of a collection, newest first
    async fn episodes(
        &self,
        collection_id: &str,
        kind: EpisodeKind,
    ) -> Result<Vec<Episode>, StoreError>;

    /// Insert a batch atomically, skipping pairs that already exist
    ///
    /// Returns the number of episodes actually inserted.
    async fn insert_episodes(&self, episodes: Vec<Episode>) -> Result<usize, StoreError>;

    async fn skip_baseline(&self, content_id: &str) -> Result<Option<SkipBaseline>, StoreError>;

    /// Create or update the baseline and stamp its access time
    async fn record_skip_time(&self, content_id: &str, total_skip_time: f64)
    -> Result<(), StoreError>;
}
