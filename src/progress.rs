// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::DateRange;
use crate::model::EpisodeKind;

/// Events emitted during catalog synchronization and media downloads
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A synchronizer run is starting for a collection
    SyncStarted {
        collection_id: String,
        kind: EpisodeKind,
    },

    /// A channel date range is about to be paged through
    RangeStarted {
        collection_id: String,
        range: DateRange,
    },

    /// One catalog page has been processed
    PageProcessed {
        collection_id: String,
        /// 1-based page number within the current range
        page: usize,
        /// Items on the page not yet known locally
        discovered: usize,
        /// Episodes persisted from this page
        saved: usize,
    },

    /// A range fetch was aborted; earlier pages stay persisted
    RangeFailed {
        collection_id: String,
        error: String,
    },

    /// Synchronizer run finished
    SyncCompleted {
        collection_id: String,
        saved_count: usize,
        failed_ranges: usize,
    },

    /// The external tool is being launched for a content id
    DownloadStarting { content_id: String },

    /// An artifact was materialized
    DownloadCompleted { content_id: String, path: PathBuf },

    /// Materialization failed
    DownloadFailed { content_id: String, error: String },

    /// Leftovers from interrupted downloads were removed
    PartialFilesCleanedUp { count: usize },
}

/// Trait for reporting progress events.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}
