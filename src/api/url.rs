// Alacrity - Apple Music ALAC Downloader Bot
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Catalog URL classification.
//!
//! Accepts album, song, and playlist URLs (playlist ids keep their dots and
//! hyphens). An album URL carrying a non-empty `i` query parameter is really
//! a song link, so it collapses to the song id.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{DownloadError, Result};

/// Entity kind of a parsed catalog URL, pluralized as the catalog API
/// expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Songs,
    Albums,
    Playlists,
}

impl UrlKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UrlKind::Songs => "songs",
            UrlKind::Albums => "albums",
            UrlKind::Playlists => "playlists",
        }
    }
}

/// Storefront, kind, and id extracted from a catalog URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlMeta {
    /// Two-letter lowercase storefront code.
    pub storefront: String,
    pub kind: UrlKind,
    pub id: String,
}

fn catalog_url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"https://music\.apple\.com/(?P<storefront>[a-z]{2})/(?P<kind>album|song|playlist)/.*/(?P<id>[0-9a-zA-Z\-.]+)",
        )
        .expect("catalog url pattern is valid")
    })
}

/// Strip whitespace-class control characters and anything after the first
/// NUL. Chat transports occasionally deliver both.
fn clean_input(input: &str) -> &str {
    let input = match input.find('\0') {
        Some(idx) => &input[..idx],
        None => input,
    };
    input.trim_matches(|c: char| (c as u32) < 0x20 || c as u32 == 0x7f)
}

/// Classify a catalog URL into [`UrlMeta`].
///
/// # Errors
/// `invalid_url` when the input does not match the catalog URL shape.
pub fn parse_url_meta(input: &str) -> Result<UrlMeta> {
    let cleaned = clean_input(input);

    let caps = catalog_url_pattern()
        .captures(cleaned)
        .ok_or_else(|| DownloadError::invalid_url("invalid Apple Music URL format"))?;

    let storefront = caps["storefront"].to_string();
    let mut kind = match &caps["kind"] {
        "album" => UrlKind::Albums,
        "song" => UrlKind::Songs,
        _ => UrlKind::Playlists,
    };
    let mut id = caps["id"].to_string();

    // An album link with ?i=<songId> addresses a single song on the album.
    if kind == UrlKind::Albums {
        if let Ok(parsed) = url::Url::parse(cleaned) {
            if let Some(song_id) = parsed
                .query_pairs()
                .find(|(k, _)| k == "i")
                .map(|(_, v)| v.into_owned())
            {
                if !song_id.is_empty() {
                    id = song_id;
                    kind = UrlKind::Songs;
                }
            }
        }
    }

    Ok(UrlMeta {
        storefront,
        kind,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_song_url() {
        let meta = parse_url_meta(
            "https://music.apple.com/in/song/never-gonna-give-you-up/1559523359",
        )
        .unwrap();
        assert_eq!(meta.storefront, "in");
        assert_eq!(meta.kind, UrlKind::Songs);
        assert_eq!(meta.id, "1559523359");
    }

    #[test]
    fn parses_album_url() {
        let meta =
            parse_url_meta("https://music.apple.com/us/album/whenever-you-need-somebody/1558533900")
                .unwrap();
        assert_eq!(meta.kind, UrlKind::Albums);
        assert_eq!(meta.id, "1558533900");
    }

    #[test]
    fn album_with_song_parameter_collapses_to_song() {
        let meta = parse_url_meta("https://music.apple.com/in/album/foo/111?i=222").unwrap();
        assert_eq!(
            meta,
            UrlMeta {
                storefront: "in".to_string(),
                kind: UrlKind::Songs,
                id: "222".to_string(),
            }
        );
    }

    #[test]
    fn album_with_empty_song_parameter_stays_an_album() {
        let meta = parse_url_meta("https://music.apple.com/in/album/foo/111?i=").unwrap();
        assert_eq!(meta.kind, UrlKind::Albums);
        assert_eq!(meta.id, "111");
    }

    #[test]
    fn playlist_ids_keep_dots_and_hyphens() {
        let meta = parse_url_meta(
            "https://music.apple.com/us/playlist/chill/pl.u-76oNlqxLJmzdZv",
        )
        .unwrap();
        assert_eq!(meta.kind, UrlKind::Playlists);
        assert_eq!(meta.id, "pl.u-76oNlqxLJmzdZv");
    }

    #[test]
    fn trailing_nul_and_control_characters_are_ignored() {
        let base = "https://music.apple.com/in/song/never-gonna-give-you-up/1559523359";
        let noisy = format!("{base}\u{0}garbage-after-nul");
        assert_eq!(parse_url_meta(base).unwrap(), parse_url_meta(&noisy).unwrap());

        let crlf = format!(" {base}\r\n");
        assert_eq!(parse_url_meta(base).unwrap(), parse_url_meta(&crlf).unwrap());
    }

    #[test]
    fn rejects_non_catalog_urls() {
        for input in [
            "https://spotify.com/track/1",
            "https://music.apple.com/us/artist/rick-astley/669771",
            "not a url at all",
            "",
        ] {
            let err = parse_url_meta(input).unwrap_err();
            assert!(err.is_kind(ErrorKind::InvalidUrl), "accepted: {input}");
        }
    }

    #[test]
    fn storefront_is_case_sensitive() {
        assert!(parse_url_meta("https://music.apple.com/IN/song/x/123").is_err());
    }
}
