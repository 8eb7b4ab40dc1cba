// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use tracing::debug;
use url::Url;

use crate::download::AudioFormat;
use crate::model::EpisodeKind;

/// Edge length requested for feed artwork
pub const ARTWORK_SIZE: u32 = 1000;

/// Public page of a collection on the video platform
pub fn collection_link(kind: EpisodeKind, id: &str) -> String {
    match kind {
        EpisodeKind::Channel => format!("https://www.youtube.com/channel/{id}"),
        EpisodeKind::Playlist => format!("https://www.youtube.com/playlist?list={id}"),
    }
}

/// Rewrite a thumbnail URL to its square high resolution variant
///
/// `.../hqdefault.jpg` becomes `.../1000x1000.jpg`. URLs whose last path
/// segment has no extension are returned unchanged; unparsable ones yield
/// `None`.
pub fn artwork_url(original: &str) -> Option<String> {
    let mut url = Url::parse(original).ok()?;

    let extension = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| Path::new(last).extension())
        .and_then(|ext| ext.to_str())
        .map(String::from);

    let Some(extension) = extension else {
        debug!(url = original, "Artwork has no file extension, keeping it");
        return Some(original.to_string());
    };

    let filename = format!("{ARTWORK_SIZE}x{ARTWORK_SIZE}.{extension}");
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.pop().push(&filename);
        }
        Err(()) => return Some(original.to_string()),
    }
    Some(url.to_string())
}

/// Enclosure URL pointing back at this service's media endpoint
///
/// `format` is only spelled out when it differs from the configured
/// default; `token` is appended whenever configured.
pub fn media_url(
    host: &str,
    content_id: &str,
    format: AudioFormat,
    default_format: AudioFormat,
    token: Option<&str>,
) -> String {
    let mut url = format!(
        "{}/media/{}.{}",
        host.trim_end_matches('/'),
        content_id,
        format.extension()
    );

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    let mut has_query = false;
    if format != default_format {
        query.append_pair("format", format.name());
        has_query = true;
    }
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        query.append_pair("token", token);
        has_query = true;
    }
    if has_query {
        url.push('?');
        url.push_str(&query.finish());
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_links_by_kind() {
        assert_eq!(
            collection_link(EpisodeKind::Channel, "UC1"),
            "https://www.youtube.com/channel/UC1"
        );
        assert_eq!(
            collection_link(EpisodeKind::Playlist, "PL1"),
            "https://www.youtube.com/playlist?list=PL1"
        );
    }

    #[test]
    fn artwork_is_resized() {
        assert_eq!(
            artwork_url("https://i.ytimg.com/vi/abc/hqdefault.jpg?x=1").as_deref(),
            Some("https://i.ytimg.com/vi/abc/1000x1000.jpg?x=1")
        );
        assert_eq!(
            artwork_url("https://yt3.ggpht.com/abc=s88-c").as_deref(),
            Some("https://yt3.ggpht.com/abc=s88-c")
        );
        assert_eq!(artwork_url("not a url"), None);
    }

    #[test]
    fn media_url_default_format_without_token() {
        assert_eq!(
            media_url(
                "http://pod.local/",
                "abc",
                AudioFormat::M4a,
                AudioFormat::M4a,
                None
            ),
            "http://pod.local/media/abc.m4a"
        );
    }

    #[test]
    fn media_url_with_format_and_token() {
        assert_eq!(
            media_url(
                "http://pod.local",
                "abc",
                AudioFormat::Mp3,
                AudioFormat::M4a,
                Some("s3cret")
            ),
            "http://pod.local/media/abc.mp3?format=mp3&token=s3cret"
        );
        assert_eq!(
            media_url(
                "http://pod.local",
                "abc",
                AudioFormat::M4a,
                AudioFormat::M4a,
                Some("a b")
            ),
            "http://pod.local/media/abc.m4a?token=a+b"
        );
    }
}
