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


//! Catalog response models.
//!
//! Closed types for the documented subset of the catalog payload; unknown
//! fields are ignored by serde. The only field the pipeline treats as
//! mandatory is `extendedAssetUrls.enhancedHls`.

use std::collections::HashMap;

use serde::Deserialize;

/// Top-level catalog response: `data[]` of song records.
#[derive(Debug, Clone, Deserialize)]
pub struct SongResponse {
    #[serde(default)]
    pub data: Vec<Song>,
}

/// One catalog song record.
#[derive(Debug, Clone, Deserialize)]
pub struct Song {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: SongAttributes,
    #[serde(default)]
    pub relationships: Relationships,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SongAttributes {
    pub name: String,
    pub artist_name: String,
    pub album_name: String,
    pub composer_name: String,
    pub release_date: String,
    pub isrc: String,
    pub genre_names: Vec<String>,
    pub track_number: u32,
    pub disc_number: u32,
    pub duration_in_millis: u64,
    pub has_lyrics: bool,
    pub audio_traits: Vec<String>,
    pub artwork: Artwork,
    pub play_params: Option<PlayParams>,
    pub url: String,
    pub previews: Vec<Preview>,
    pub extended_asset_urls: HashMap<String, String>,
}

impl SongAttributes {
    /// The enhanced-HLS master playlist reference, when the catalog offers
    /// lossless for this song.
    pub fn enhanced_hls(&self) -> Option<&str> {
        self.extended_asset_urls
            .get("enhancedHls")
            .map(String::as_str)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Artwork {
    pub width: u32,
    pub height: u32,
    pub url: String,
    pub bg_color: String,
}

impl Artwork {
    /// Resolve the `{w}x{h}` template against the advertised dimensions.
    pub fn resolved_url(&self) -> String {
        self.url
            .replace("{w}x{h}", &format!("{}x{}", self.width, self.height))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayParams {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Preview {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Relationships {
    #[serde(default)]
    pub albums: Relationship,
    #[serde(default)]
    pub artists: Relationship,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Vec<Related>,
}

/// A related album or artist. Albums carry attributes; artists usually only
/// an id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Related {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub attributes: Option<AlbumAttributes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlbumAttributes {
    pub name: String,
    pub artist_name: String,
    pub copyright: String,
    pub record_label: String,
    pub upc: String,
    pub release_date: String,
    pub track_count: u32,
    pub is_compilation: bool,
    pub is_single: bool,
}
