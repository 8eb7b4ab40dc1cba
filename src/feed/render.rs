// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bytes::Bytes;
use rss::extension::itunes::{ITunesChannelExtensionBuilder, ITunesItemExtensionBuilder};
use rss::{ChannelBuilder, EnclosureBuilder, GuidBuilder, ImageBuilder, Item, ItemBuilder};
use serde::Serialize;
use tracing::debug;

use super::links::{artwork_url, collection_link, media_url};
use crate::download::AudioFormat;
use crate::error::FeedError;
use crate::model::{Collection, Episode, EpisodeKind};

/// Channel uploads shorter than this are treated as shorts and left out
pub const MIN_CHANNEL_EPISODE_SECS: u64 = 120;

const DOCS_URL: &str = "http://www.rssboard.org/rss-specification";
const GENERATOR: &str = concat!("sponsorcast ", env!("CARGO_PKG_VERSION"));

const UNAVAILABLE_TITLES: [&str; 2] = ["Private video", "Deleted video"];
const PRIVATE_DESCRIPTION: &str = "This video is private.";

/// Request-dependent rendering settings
///
/// Also serves as the parameter set of the feed cache fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedOptions {
    /// Public base URL of the media endpoint, e.g. `http://pod.local:8080`
    pub host: String,
    pub format: AudioFormat,
    pub default_format: AudioFormat,
    #[serde(skip)]
    pub token: Option<String>,
}

/// Whether an episode belongs in a rendered feed
pub fn is_listable(episode: &Episode) -> bool {
    if UNAVAILABLE_TITLES.contains(&episode.title.as_str())
        || episode.description == PRIVATE_DESCRIPTION
    {
        return false;
    }
    !(episode.kind == EpisodeKind::Channel && episode.duration_secs < MIN_CHANNEL_EPISODE_SECS)
}

fn itunes_duration(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn render_item(episode: &Episode, options: &FeedOptions) -> Item {
    let enclosure = EnclosureBuilder::default()
        .url(media_url(
            &options.host,
            &episode.content_id,
            options.format,
            options.default_format,
            options.token.as_deref(),
        ))
        .length("0".to_string())
        .mime_type(options.format.mime_type().to_string())
        .build();

    let guid = GuidBuilder::default()
        .value(episode.content_id.clone())
        .permalink(false)
        .build();

    let itunes = ITunesItemExtensionBuilder::default()
        .duration(Some(itunes_duration(episode.duration_secs)))
        .image(episode.artwork_url.as_deref().and_then(artwork_url))
        .build();

    ItemBuilder::default()
        .title(Some(episode.title.clone()))
        .description(Some(episode.description.clone()))
        .guid(Some(guid))
        .enclosure(Some(enclosure))
        .pub_date(Some(episode.published_at.to_rfc2822()))
        .itunes_ext(Some(itunes))
        .build()
}

/// Render a collection and its episodes as an RSS 2.0 podcast feed
///
/// Episodes are emitted in the given order after dropping unlistable ones.
pub fn assemble(
    collection: &Collection,
    episodes: &[Episode],
    options: &FeedOptions,
) -> Result<Bytes, FeedError> {
    let link = collection_link(collection.kind, &collection.id);
    let artwork = collection.artwork_url.as_deref().and_then(artwork_url);

    let items: Vec<Item> = episodes
        .iter()
        .filter(|episode| is_listable(episode))
        .map(|episode| render_item(episode, options))
        .collect();

    debug!(
        collection_id = %collection.id,
        listed = items.len(),
        skipped = episodes.len() - items.len(),
        "Rendering feed"
    );

    let image = artwork.as_ref().map(|url| {
        ImageBuilder::default()
            .url(url.clone())
            .title(collection.name.clone())
            .link(link.clone())
            .build()
    });

    let itunes = ITunesChannelExtensionBuilder::default()
        .author(Some(collection.artist_name.clone()))
        .image(artwork.clone())
        .summary(Some(collection.description.clone()))
        .build();

    let channel = ChannelBuilder::default()
        .title(collection.name.clone())
        .link(link)
        .description(collection.description.clone())
        .last_build_date(Some(collection.last_build.to_rfc2822()))
        .generator(Some(GENERATOR.to_string()))
        .docs(Some(DOCS_URL.to_string()))
        .image(image)
        .itunes_ext(Some(itunes))
        .items(items)
        .build();

    let buffer = channel.write_to(Vec::new())?;
    Ok(Bytes::from(buffer))
}
