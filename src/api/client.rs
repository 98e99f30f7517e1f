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


//! Catalog HTTP client.
//!
//! Two operations: scrape a short-lived anonymous bearer token from the web
//! front door, and fetch one song's catalog record (with album/artist
//! relationships and extended asset URLs). Tokens are fetched fresh per
//! pipeline run; they expire quickly and caching has bitten before.

use std::sync::OnceLock;

use regex::Regex;

use crate::api::models::{Song, SongResponse};
use crate::api::url::UrlMeta;
use crate::error::{DownloadError, Result};

const WEB_FRONT_DOOR: &str = "https://beta.music.apple.com";
const CATALOG_BASE: &str = "https://amp-api.music.apple.com/v1/catalog";

/// Desktop user agent; the catalog serves a reduced payload to unknown
/// clients.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

fn index_js_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/assets/index-legacy-[^/]+\.js").expect("index js pattern is valid")
    })
}

fn token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"eyJh[^"]+"#).expect("token pattern is valid"))
}

/// Anonymous Apple Music catalog client.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    front_door: String,
    catalog_base: String,
}

impl CatalogClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            front_door: WEB_FRONT_DOOR.to_string(),
            catalog_base: CATALOG_BASE.to_string(),
        }
    }

    /// Point both endpoints elsewhere (local stubs, proxies).
    pub fn with_endpoints(
        mut self,
        front_door: impl Into<String>,
        catalog_base: impl Into<String>,
    ) -> Self {
        self.front_door = front_door.into();
        self.catalog_base = catalog_base.into();
        self
    }

    /// Fetch an anonymous bearer token.
    ///
    /// The front door references a versioned `index-legacy-*.js` asset whose
    /// body embeds the token (a JWT, hence the `eyJh` prefix).
    ///
    /// # Errors
    /// `network_failure` when either request fails or either pattern is
    /// missing from the response body.
    pub async fn fetch_token(&self) -> Result<String> {
        let body = self.get_text(&self.front_door).await?;

        let asset_path = index_js_pattern()
            .find(&body)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| DownloadError::network("index JS file not found"))?;

        let js = self
            .get_text(&format!("{}{asset_path}", self.front_door))
            .await?;

        token_pattern()
            .find(&js)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| DownloadError::network("token not found in JS file"))
    }

    /// Fetch the catalog record for a parsed URL.
    ///
    /// Returns the element of `data[]` whose id equals the requested id.
    ///
    /// # Errors
    /// `network_failure` for transport failures, non-200 responses, decode
    /// failures, and a response that does not contain the requested id.
    pub async fn fetch_song(&self, url_meta: &UrlMeta, token: &str) -> Result<Song> {
        let endpoint = format!(
            "{}/{}/{}/{}",
            self.catalog_base,
            url_meta.storefront,
            url_meta.kind.as_str(),
            url_meta.id
        );

        let response = self
            .http
            .get(&endpoint)
            .header("Authorization", format!("Bearer {token}"))
            .header("Origin", "https://music.apple.com")
            .header("User-Agent", USER_AGENT)
            .query(&[
                ("include", "albums,explicit"),
                ("extend", "extendedAssetUrls"),
                ("l", ""),
            ])
            .send()
            .await
            .map_err(DownloadError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::network(format!(
                "catalog request failed: {status}"
            ))
            .with_context("url", endpoint));
        }

        let decoded: SongResponse = response
            .json()
            .await
            .map_err(|err| DownloadError::network("failed to decode catalog response").caused_by(err))?;

        decoded
            .data
            .into_iter()
            .find(|song| song.id == url_meta.id)
            .ok_or_else(|| {
                DownloadError::network("song not found in response")
                    .with_context("song_id", url_meta.id.clone())
            })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(DownloadError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(
                DownloadError::network(format!("request failed: {status}"))
                    .with_context("url", url.to_string()),
            );
        }

        response
            .text()
            .await
            .map_err(|err| DownloadError::network("failed to read response body").caused_by(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_pattern_extracts_first_jwt() {
        let js = r#"var x="foo";const t="eyJhbGciOiJFUzI1NiJ9.payload.sig";const u="eyJhbGciOther""#;
        let token = token_pattern().find(js).unwrap().as_str();
        assert_eq!(token, "eyJhbGciOiJFUzI1NiJ9.payload.sig");
    }

    #[test]
    fn index_js_pattern_matches_versioned_asset() {
        let html = r#"<script src="/assets/index-legacy-Cc9Mp2yV.js" type="module"></script>"#;
        let path = index_js_pattern().find(html).unwrap().as_str();
        assert_eq!(path, "/assets/index-legacy-Cc9Mp2yV.js");
        assert!(index_js_pattern().find("/assets/index-modern-x.js").is_none());
    }
}
