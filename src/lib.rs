pub mod cache;
pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod feed;
pub mod freshness;
pub mod http;
pub mod model;
pub mod progress;
pub mod segments;
pub mod service;
pub mod store;
pub mod sync;

// Re-export main types for convenience
pub use cache::{FeedCache, fingerprint};
pub use catalog::{CatalogApi, DateRange, YoutubeCatalog};
pub use config::{Config, parse_duration};
pub use download::{AudioFormat, Completion, DownloadCoordinator, Materializer, YtDlp};
pub use error::{
    CatalogError, ConfigError, FeedError, MaterializeError, SegmentError, StoreError, SyncError,
};
pub use feed::{FeedOptions, assemble};
pub use freshness::{Freshness, FreshnessDecider, StaleArtifacts};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use model::{Collection, Episode, EpisodeKind, SkipBaseline};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use segments::{SegmentAnalyzer, SkipTimeSource, merged_skip_time};
pub use service::{FeedRequest, FeedService, MediaFile, MediaService};
pub use store::{EpisodeStore, SqliteStore};
pub use sync::{CatalogSynchronizer, SyncReport, plan_channel_ranges};
