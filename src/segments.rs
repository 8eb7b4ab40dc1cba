// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sponsor segment lookup and skip-time computation

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::SegmentError;
use crate::http::HttpClient;

/// Public SponsorBlock API endpoint
pub const SPONSORBLOCK_API_URL: &str = "https://sponsor.ajay.app/api/skipSegments";

/// A `[start, stop]` interval in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub stop: f64,
}

#[derive(Debug, Deserialize)]
struct SegmentResponse {
    segment: [f64; 2],
    #[serde(default)]
    category: String,
}

/// Source of the total skip time for a content id
#[async_trait]
pub trait SkipTimeSource: Send + Sync {
    /// Seconds removed from the content; `0.0` when unknown
    async fn total_skip_time(&self, content_id: &str) -> f64;
}

/// Length of the union of `segments`
///
/// Segments are sorted by start before the sweep, so callers may pass them
/// in any order. Inverted segments (`stop < start`) are ignored.
pub fn merged_skip_time(segments: &[Segment]) -> f64 {
    let mut sorted: Vec<Segment> = segments
        .iter()
        .copied()
        .filter(|s| s.stop >= s.start)
        .collect();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut total = 0.0;
    let mut prev_stop = 0.0_f64;
    for segment in sorted {
        if segment.start > prev_stop {
            total += segment.stop - segment.start;
        } else if segment.stop > prev_stop {
            total += segment.stop - prev_stop;
        }
        prev_stop = prev_stop.max(segment.stop);
    }
    total
}

/// Queries the sponsor segment API
pub struct SegmentAnalyzer<C: HttpClient> {
    client: C,
    base_url: String,
    categories: Vec<String>,
}

impl<C: HttpClient> SegmentAnalyzer<C> {
    pub fn new(client: C, categories: Vec<String>) -> Self {
        Self {
            client,
            base_url: SPONSORBLOCK_API_URL.to_string(),
            categories,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn segments_url(&self, content_id: &str) -> Result<Url, SegmentError> {
        let mut url = Url::parse(&self.base_url)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("videoID", content_id);
            for category in &self.categories {
                query.append_pair("category", category);
            }
        }
        Ok(url)
    }

    /// Fetch the raw segment list; an unknown content id yields no segments
    pub async fn fetch_segments(&self, content_id: &str) -> Result<Vec<Segment>, SegmentError> {
        let url = self.segments_url(content_id)?;
        let response = self
            .client
            .get(url.as_str())
            .await
            .map_err(|e| SegmentError::HttpFailed {
                url: url.to_string(),
                source: e,
            })?;

        if response.status == 404 {
            return Ok(Vec::new());
        }
        if !response.is_success() {
            return Err(SegmentError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        let parsed: Vec<SegmentResponse> =
            serde_json::from_slice(&response.body).map_err(|e| SegmentError::ParseFailed {
                url: url.to_string(),
                source: e,
            })?;

        Ok(parsed
            .into_iter()
            .map(|s| {
                debug!(content_id, category = %s.category, start = s.segment[0], stop = s.segment[1], "Sponsor segment");
                Segment {
                    start: s.segment[0],
                    stop: s.segment[1],
                }
            })
            .collect())
    }
}

#[async_trait]
impl<C: HttpClient> SkipTimeSource for SegmentAnalyzer<C> {
    async fn total_skip_time(&self, content_id: &str) -> f64 {
        match self.fetch_segments(content_id).await {
            Ok(segments) => merged_skip_time(&segments),
            Err(e) => {
                warn!(content_id, error = %e, "Sponsor segment lookup failed, assuming none");
                0.0
            }
        }
    }
}
