// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory cache of rendered feeds

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::model::EpisodeKind;

/// Lifetime of a cached feed unless stated otherwise
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Interval of the background expiry sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    kind: EpisodeKind,
    id: String,
    data: Bytes,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache key for a feed request
///
/// SHA-256 over `kind:id:params` where `params` is serialized to canonical
/// JSON (object keys sorted), so field order never changes the key.
pub fn fingerprint<P: Serialize + ?Sized>(kind: EpisodeKind, id: &str, params: &P) -> String {
    let canonical = match serde_json::to_value(params) {
        Ok(value) => value.to_string(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize cache parameters");
            "{}".to_string()
        }
    };

    let key = format!("{}:{}:{}", kind.feed_kind(), id, canonical);
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// Concurrent feed cache with absolute expiry per entry
pub struct FeedCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl Default for FeedCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl FeedCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Cached bytes, evicting the entry if it has expired
    pub async fn get<P: Serialize + ?Sized>(
        &self,
        kind: EpisodeKind,
        id: &str,
        params: &P,
    ) -> Option<Bytes> {
        let key = fingerprint(kind, id, params);
        let now = Instant::now();

        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.data.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        // Another writer may have refreshed it meanwhile
        if entries.get(&key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(&key);
            debug!(kind = %kind, id, "Evicted expired feed");
            return None;
        }
        entries.get(&key).map(|entry| entry.data.clone())
    }

    pub async fn set<P: Serialize + ?Sized>(
        &self,
        kind: EpisodeKind,
        id: &str,
        params: &P,
        data: Bytes,
    ) {
        self.set_with_ttl(kind, id, params, data, self.default_ttl)
            .await;
    }

    pub async fn set_with_ttl<P: Serialize + ?Sized>(
        &self,
        kind: EpisodeKind,
        id: &str,
        params: &P,
        data: Bytes,
        ttl: Duration,
    ) {
        let key = fingerprint(kind, id, params);
        let entry = CacheEntry {
            kind,
            id: id.to_string(),
            data,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Remove one entry; returns whether it existed
    pub async fn delete<P: Serialize + ?Sized>(
        &self,
        kind: EpisodeKind,
        id: &str,
        params: &P,
    ) -> bool {
        let key = fingerprint(kind, id, params);
        self.entries.write().await.remove(&key).is_some()
    }

    /// Remove every cached variant of one feed
    pub async fn invalidate_feed(&self, kind: EpisodeKind, id: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !(entry.kind == kind && entry.id == id));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(kind = %kind, id, removed, "Invalidated cached feed");
        }
        removed
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Drop all expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Periodically purge expired entries until the handle is aborted
    pub fn spawn_sweeper(cache: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired().await;
                if removed > 0 {
                    debug!(removed, "Swept expired feeds");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(text: &'static str) -> Bytes {
        Bytes::from_static(text.as_bytes())
    }

    #[test]
    fn fingerprint_ignores_parameter_order() {
        let a = fingerprint(EpisodeKind::Channel, "UC1", &json!({"a": 1, "b": 2}));
        let b = fingerprint(EpisodeKind::Channel, "UC1", &json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_separates_kind_id_and_params() {
        let params = json!({"format": "mp3"});
        let base = fingerprint(EpisodeKind::Channel, "X", &params);
        assert_ne!(base, fingerprint(EpisodeKind::Playlist, "X", &params));
        assert_ne!(base, fingerprint(EpisodeKind::Channel, "Y", &params));
        assert_ne!(
            base,
            fingerprint(EpisodeKind::Channel, "X", &json!({"format": "m4a"}))
        );
    }

    #[tokio::test]
    async fn get_after_set_with_reordered_params() {
        let cache = FeedCache::default();
        cache
            .set(EpisodeKind::Channel, "UC1", &json!({"b": 2, "a": 1}), data("feed"))
            .await;

        assert_eq!(
            cache
                .get(EpisodeKind::Channel, "UC1", &json!({"a": 1, "b": 2}))
                .await,
            Some(data("feed"))
        );
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = FeedCache::default();
        let params = json!({});
        cache
            .set_with_ttl(
                EpisodeKind::Playlist,
                "PL1",
                &params,
                data("feed"),
                Duration::from_millis(50),
            )
            .await;

        assert!(cache.get(EpisodeKind::Playlist, "PL1", &params).await.is_some());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get(EpisodeKind::Playlist, "PL1", &params).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn invalidate_feed_drops_all_variants() {
        let cache = FeedCache::default();
        cache
            .set(EpisodeKind::Channel, "UC1", &json!({"format": "mp3"}), data("a"))
            .await;
        cache
            .set(EpisodeKind::Channel, "UC1", &json!({"format": "m4a"}), data("b"))
            .await;
        cache
            .set(EpisodeKind::Channel, "UC2", &json!({}), data("c"))
            .await;
        cache
            .set(EpisodeKind::Playlist, "UC1", &json!({}), data("d"))
            .await;

        assert_eq!(cache.invalidate_feed(EpisodeKind::Channel, "UC1").await, 2);
        assert_eq!(cache.len().await, 2);
        assert!(cache.get(EpisodeKind::Channel, "UC2", &json!({})).await.is_some());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let cache = FeedCache::default();
        let params = json!({"host": "http://localhost"});
        cache
            .set(EpisodeKind::Channel, "UC1", &params, data("a"))
            .await;
        cache
            .set(EpisodeKind::Channel, "UC2", &params, data("b"))
            .await;

        assert!(cache.delete(EpisodeKind::Channel, "UC1", &params).await);
        assert!(!cache.delete(EpisodeKind::Channel, "UC1", &params).await);
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn purge_only_removes_expired_entries() {
        let cache = FeedCache::default();
        let params = json!({});
        cache
            .set_with_ttl(
                EpisodeKind::Channel,
                "old",
                &params,
                data("a"),
                Duration::ZERO,
            )
            .await;
        cache
            .set(EpisodeKind::Channel, "fresh", &params, data("b"))
            .await;

        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn sweeper_purges_in_background() {
        let cache = Arc::new(FeedCache::default());
        cache
            .set_with_ttl(
                EpisodeKind::Channel,
                "UC1",
                &json!({}),
                data("a"),
                Duration::from_millis(10),
            )
            .await;

        let handle = FeedCache::spawn_sweeper(Arc::clone(&cache), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(cache.is_empty().await);
    }
}
