// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, SqliteConnection};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{Collection, Episode, EpisodeKind, SkipBaseline};

use super::EpisodeStore;

/// Episode store backed by SQLite
///
/// Episodes carry a `UNIQUE (content_id, kind)` constraint, so batch inserts
/// use `INSERT OR IGNORE` inside one transaction. Collections and skip
/// baselines are upserted row by row.
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct CollectionRow {
    id: String,
    kind: String,
    name: String,
    description: String,
    artwork_url: Option<String>,
    artist_name: String,
    last_build: i64,
}

#[derive(FromRow)]
struct EpisodeRow {
    content_id: String,
    collection_id: String,
    kind: String,
    title: String,
    description: String,
    published_at: i64,
    duration_secs: i64,
    artwork_url: Option<String>,
}

#[derive(FromRow)]
struct BaselineRow {
    content_id: String,
    total_skip_time: f64,
    last_accessed: i64,
}

fn parse_kind(value: &str) -> Result<EpisodeKind, StoreError> {
    value.parse().map_err(StoreError::CorruptRow)
}

fn from_micros(value: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| StoreError::CorruptRow(format!("timestamp {value} out of range")))
}

impl TryFrom<CollectionRow> for Collection {
    type Error = StoreError;

    fn try_from(row: CollectionRow) -> Result<Self, Self::Error> {
        Ok(Collection {
            kind: parse_kind(&row.kind)?,
            last_build: from_micros(row.last_build)?,
            id: row.id,
            name: row.name,
            description: row.description,
            artwork_url: row.artwork_url,
            artist_name: row.artist_name,
        })
    }
}

impl TryFrom<EpisodeRow> for Episode {
    type Error = StoreError;

    fn try_from(row: EpisodeRow) -> Result<Self, Self::Error> {
        Ok(Episode {
            kind: parse_kind(&row.kind)?,
            published_at: from_micros(row.published_at)?,
            duration_secs: u64::try_from(row.duration_secs).map_err(|_| {
                StoreError::CorruptRow(format!("negative duration {}", row.duration_secs))
            })?,
            content_id: row.content_id,
            collection_id: row.collection_id,
            title: row.title,
            description: row.description,
            artwork_url: row.artwork_url,
        })
    }
}

impl TryFrom<BaselineRow> for SkipBaseline {
    type Error = StoreError;

    fn try_from(row: BaselineRow) -> Result<Self, Self::Error> {
        Ok(SkipBaseline {
            last_accessed: from_micros(row.last_accessed)?,
            content_id: row.content_id,
            total_skip_time: row.total_skip_time,
        })
    }
}

fn query_failed(operation: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |source| StoreError::QueryFailed { operation, source }
}

const EPISODE_COLUMNS: &str = "content_id, collection_id, kind, title, description, \
                               published_at, duration_secs, artwork_url";

impl SqliteStore {
    /// Open (or create) the store database at `path` and bring its schema up to date
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        let store = Self { pool };
        store.run_migrations().await?;
        debug!(path = %path.display(), "Opened episode store");
        Ok(store)
    }

    /// A private database that lives as long as the store
    pub async fn in_memory() -> Result<Self, StoreError> {
        let connect_failed = |e: sqlx::Error| StoreError::ConnectFailed {
            path: ":memory:".into(),
            source: e,
        };
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(connect_failed)?;

        // every connection to :memory: is its own database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(connect_failed)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(query_failed("acquire a connection"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::MigrationFailed {
            version: 0,
            source: e,
        })?;

        let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&mut *conn)
            .await
            .map_err(query_failed("read the schema version"))?;

        if current.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        Ok(())
    }

    /// Initial schema
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<(), StoreError> {
        info!("Applying store migration v1");
        let failed = |e: sqlx::Error| StoreError::MigrationFailed {
            version: 1,
            source: e,
        };

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                artwork_url TEXT,
                artist_name TEXT NOT NULL DEFAULT '',
                last_build INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                content_id TEXT NOT NULL,
                collection_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                published_at INTEGER NOT NULL,
                duration_secs INTEGER NOT NULL,
                artwork_url TEXT,
                UNIQUE (content_id, kind)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_episodes_collection
                ON episodes (collection_id, kind, published_at)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS skip_baselines (
                content_id TEXT PRIMARY KEY,
                total_skip_time REAL NOT NULL,
                last_accessed INTEGER NOT NULL
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .map_err(failed)?;
        }

        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (1, ?)")
            .bind(Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(failed)?;

        Ok(())
    }

    /// One boundary episode of a collection, ordered by publication date
    async fn boundary_episode(
        &self,
        collection_id: &str,
        kind: EpisodeKind,
        newest: bool,
    ) -> Result<Option<Episode>, StoreError> {
        let order = if newest { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes \
             WHERE collection_id = ? AND kind = ? \
             ORDER BY published_at {order} LIMIT 1"
        );

        sqlx::query_as::<_, EpisodeRow>(&sql)
            .bind(collection_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("load a boundary episode"))?
            .map(Episode::try_from)
            .transpose()
    }
}

#[async_trait]
impl EpisodeStore for SqliteStore {
    async fn collection(&self, id: &str) -> Result<Option<Collection>, StoreError> {
        sqlx::query_as::<_, CollectionRow>(
            r#"
            SELECT id, kind, name, description, artwork_url, artist_name, last_build
            FROM collections WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed("load a collection"))?
        .map(Collection::try_from)
        .transpose()
    }

    async fn save_collection(&self, collection: Collection) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO collections (id, kind, name, description, artwork_url, artist_name, last_build)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                description = excluded.description,
                artwork_url = excluded.artwork_url,
                artist_name = excluded.artist_name,
                last_build = excluded.last_build
            "#,
        )
        .bind(&collection.id)
        .bind(collection.kind.as_str())
        .bind(&collection.name)
        .bind(&collection.description)
        .bind(&collection.artwork_url)
        .bind(&collection.artist_name)
        .bind(collection.last_build.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(query_failed("save a collection"))?;

        Ok(())
    }

    async fn episode_exists(&self, content_id: &str, kind: EpisodeKind) -> Result<bool, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM episodes WHERE content_id = ? AND kind = ?")
                .bind(content_id)
                .bind(kind.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(query_failed("check for an episode"))?;

        Ok(count > 0)
    }

    async fn episode_ids(
        &self,
        collection_id: &str,
        kind: EpisodeKind,
    ) -> Result<HashSet<String>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT content_id FROM episodes WHERE collection_id = ? AND kind = ?",
        )
        .bind(collection_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("list episode ids"))?;

        Ok(ids.into_iter().collect())
    }

    async fn oldest_episode(
        &self,
        collection_id: &str,
        kind: EpisodeKind,
    ) -> Result<Option<Episode>, StoreError> {
        self.boundary_episode(collection_id, kind, false).await
    }

    async fn newest_episode(
        &self,
        collection_id: &str,
        kind: EpisodeKind,
    ) -> Result<Option<Episode>, StoreError> {
        self.boundary_episode(collection_id, kind, true).await
    }

    async fn episodes(
        &self,
        collection_id: &str,
        kind: EpisodeKind,
    ) -> Result<Vec<Episode>, StoreError> {
        let sql = format!(
            "SELECT {EPISODE_COLUMNS} FROM episodes \
             WHERE collection_id = ? AND kind = ? \
             ORDER BY published_at DESC"
        );

        sqlx::query_as::<_, EpisodeRow>(&sql)
            .bind(collection_id)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(query_failed("list episodes"))?
            .into_iter()
            .map(Episode::try_from)
            .collect()
    }

    async fn insert_episodes(&self, episodes: Vec<Episode>) -> Result<usize, StoreError> {
        if episodes.is_empty() {
            return Ok(0);
        }

        // Dropping the transaction without commit rolls the whole batch back
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_failed("begin an episode batch"))?;
        let mut inserted = 0u64;

        for episode in &episodes {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO episodes (
                    content_id, collection_id, kind, title, description,
                    published_at, duration_secs, artwork_url
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&episode.content_id)
            .bind(&episode.collection_id)
            .bind(episode.kind.as_str())
            .bind(&episode.title)
            .bind(&episode.description)
            .bind(episode.published_at.timestamp_micros())
            .bind(i64::try_from(episode.duration_secs).unwrap_or(i64::MAX))
            .bind(&episode.artwork_url)
            .execute(&mut *tx)
            .await
            .map_err(query_failed("insert an episode"))?;

            if result.rows_affected() == 0 {
                debug!(
                    content_id = %episode.content_id,
                    kind = %episode.kind,
                    collection_id = %episode.collection_id,
                    "Episode already stored, skipping"
                );
            }
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(query_failed("commit an episode batch"))?;

        Ok(inserted as usize)
    }

    async fn skip_baseline(&self, content_id: &str) -> Result<Option<SkipBaseline>, StoreError> {
        sqlx::query_as::<_, BaselineRow>(
            "SELECT content_id, total_skip_time, last_accessed FROM skip_baselines WHERE content_id = ?",
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed("load a skip baseline"))?
        .map(SkipBaseline::try_from)
        .transpose()
    }

    async fn record_skip_time(
        &self,
        content_id: &str,
        total_skip_time: f64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO skip_baselines (content_id, total_skip_time, last_accessed)
            VALUES (?, ?, ?)
            ON CONFLICT(content_id) DO UPDATE SET
                total_skip_time = excluded.total_skip_time,
                last_accessed = excluded.last_accessed
            "#,
        )
        .bind(content_id)
        .bind(total_skip_time)
        .bind(Utc::now().timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(query_failed("record a skip time"))?;

        Ok(())
    }
}
