mod links;
mod render;

pub use links::{ARTWORK_SIZE, artwork_url, collection_link, media_url};
pub use render::{FeedOptions, MIN_CHANNEL_EPISODE_SECS, assemble, is_listable};
