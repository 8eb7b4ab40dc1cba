// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid duration '{value}': {reason}. Use formats like '5m', '1h', '400s'")]
    InvalidDuration { value: String, reason: String },

    #[error("Unknown audio format '{0}'")]
    UnknownAudioFormat(String),
}

/// Errors that can occur when reading or writing the episode store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create store directory {path}: {source}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open store database {path}: {source}")]
    ConnectFailed {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("Store migration v{version} failed: {source}")]
    MigrationFailed {
        version: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error("Store query failed while trying to {operation}: {source}")]
    QueryFailed {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("Corrupt store row: {0}")]
    CorruptRow(String),
}

/// Errors returned by the external video catalog
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Catalog returned HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to decode catalog response from {url}: {source}")]
    DecodeFailed {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid catalog URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("{kind} '{id}' not found in catalog")]
    NotFound { kind: String, id: String },

    #[error("Invalid ISO-8601 duration '{0}'")]
    InvalidDuration(String),
}

/// Errors returned by the sponsor segment API
#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("Segment request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Segment API returned HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to parse segment list from {url}: {source}")]
    ParseFailed {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid segment API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors that can occur while materializing an audio artifact
#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Invalid content id '{0}'")]
    InvalidContentId(String),

    #[error("Failed to launch {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Download of {content_id} failed with exit code {exit_code:?}: {stderr}")]
    ToolFailed {
        content_id: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Download finished but no artifact exists at {0}")]
    MissingArtifact(PathBuf),

    #[error("Download of {0} was aborted before completion")]
    Aborted(String),
}

/// Errors that can occur while building a feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Collection '{id}' is unknown and could not be looked up: {source}")]
    CollectionUnavailable {
        id: String,
        #[source]
        source: CatalogError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to render feed: {0}")]
    RenderFailed(#[from] rss::Error),
}

/// Errors that abort a single synchronizer range fetch
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
