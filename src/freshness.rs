// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::download::{AudioFormat, DownloadCoordinator};
use crate::error::MaterializeError;
use crate::segments::SkipTimeSource;
use crate::store::EpisodeStore;

/// Skip-time change in seconds above which an artifact is stale
pub const REGENERATION_THRESHOLD_SECS: f64 = 2.0;

/// Outcome of a freshness check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Freshness {
    pub regenerate: bool,
    pub skip_time: f64,
}

/// Removes materialized artifacts that no longer match their sponsor segments
#[async_trait]
pub trait StaleArtifacts: Send + Sync {
    /// Delete the artifact, returning whether one existed
    async fn discard(&self, content_id: &str, format: AudioFormat) -> Result<bool, MaterializeError>;
}

#[async_trait]
impl StaleArtifacts for DownloadCoordinator {
    async fn discard(&self, content_id: &str, format: AudioFormat) -> Result<bool, MaterializeError> {
        self.invalidate(content_id, format).await
    }
}

/// Decides whether a materialized artifact must be rebuilt because its
/// sponsor segments changed since it was produced
pub struct FreshnessDecider {
    store: Arc<dyn EpisodeStore>,
    segments: Arc<dyn SkipTimeSource>,
    artifacts: Arc<dyn StaleArtifacts>,
}

impl FreshnessDecider {
    pub fn new(
        store: Arc<dyn EpisodeStore>,
        segments: Arc<dyn SkipTimeSource>,
        artifacts: Arc<dyn StaleArtifacts>,
    ) -> Self {
        Self {
            store,
            segments,
            artifacts,
        }
    }

    /// Compare the current skip time against the stored baseline
    ///
    /// The baseline is overwritten on every call. When the change exceeds
    /// [`REGENERATION_THRESHOLD_SECS`] the artifact is discarded.
    pub async fn should_regenerate(&self, content_id: &str, format: AudioFormat) -> Freshness {
        let baseline = match self.store.skip_baseline(content_id).await {
            Ok(baseline) => baseline,
            Err(e) => {
                error!(content_id, error = %e, "Failed to read skip baseline");
                None
            }
        };

        let skip_time = self.segments.total_skip_time(content_id).await;

        if let Err(e) = self.store.record_skip_time(content_id, skip_time).await {
            error!(content_id, error = %e, "Failed to record skip baseline");
        }

        let Some(baseline) = baseline else {
            return Freshness {
                regenerate: true,
                skip_time,
            };
        };

        let delta = (baseline.total_skip_time - skip_time).abs();
        if delta <= REGENERATION_THRESHOLD_SECS {
            return Freshness {
                regenerate: false,
                skip_time,
            };
        }

        info!(
            content_id,
            previous = baseline.total_skip_time,
            current = skip_time,
            "Sponsor segments changed, discarding artifact"
        );
        if let Err(e) = self.artifacts.discard(content_id, format).await {
            warn!(content_id, error = %e, "Failed to delete stale artifact");
        }

        Freshness {
            regenerate: true,
            skip_time,
        }
    }
}
