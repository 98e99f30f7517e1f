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


//! HLS resolution.
//!
//! The manifest helper refreshes the enhanced-HLS URL for a song id over a
//! one-exchange TCP dialogue. The master playlist it points at advertises the
//! lossless variants; we pick the highest-average-bandwidth ALAC stream at or
//! below 192 kHz, rewrite its URI to the fragmented `_m.mp4` form, and
//! collect the key URIs the decryptor will need.

use std::sync::OnceLock;

use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{DownloadError, Result};
use crate::retry::{retry_with_backoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES};

/// Fixed first key URI. The decryptor recognizes it and substitutes song id
/// "0" during the key exchange.
pub const PREFETCH_KEY: &str = "skd://itunes.apple.com/P000000000/s1/e1";

/// Highest sample rate we accept for a variant, in Hz.
const MAX_SAMPLE_RATE: u64 = 192_000;

/// Chosen ALAC stream plus the key URIs referenced by the master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSelection {
    /// Absolute media URL ending in `_m.mp4`.
    pub media_url: String,
    /// Key URIs in order; index 0 is always [`PREFETCH_KEY`].
    pub keys: Vec<String>,
}

fn key_uri_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""(skd?://[^"]*)""#).expect("key uri pattern is valid"))
}

/// Ask the manifest helper for a refreshed enhanced-HLS URL.
///
/// Wire format: `u8 len ‖ utf8 song_id` out, `utf8 url ‖ '\n'` back. The
/// helper closes after one exchange. The dial (only the dial) runs under the
/// shared backoff policy, since a refused connection is usually the helper
/// restarting.
///
/// # Errors
/// `network_failure` for dial/read/write failures, an unterminated reply, or
/// an empty payload.
pub async fn request_playlist_url(addr: &str, song_id: &str) -> Result<String> {
    let id_bytes = song_id.as_bytes();
    let id_len = u8::try_from(id_bytes.len()).map_err(|_| {
        DownloadError::network("song id too long for manifest helper frame")
            .with_context("song_id", song_id.to_string())
    })?;

    let mut conn = retry_with_backoff(DEFAULT_MAX_RETRIES, DEFAULT_BASE_DELAY, || async {
        TcpStream::connect(addr)
            .await
            .map_err(|err| DownloadError::from_dial("error connecting to manifest helper", err))
    })
    .await
    .map_err(|err| err.with_context("addr", addr.to_string()))?;

    conn.write_all(&[id_len])
        .await
        .map_err(|err| DownloadError::from_dial("error writing length to manifest helper", err))?;
    conn.write_all(id_bytes)
        .await
        .map_err(|err| DownloadError::from_dial("error writing song id to manifest helper", err))?;

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match conn.read(&mut byte).await {
            Ok(0) => {
                return Err(DownloadError::network(
                    "manifest helper closed before terminating its response",
                ))
            }
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                response.push(byte[0]);
            }
            Err(err) => {
                return Err(DownloadError::from_dial(
                    "error reading response from manifest helper",
                    err,
                ))
            }
        }
    }

    let url = String::from_utf8_lossy(&response).trim().to_string();
    if url.is_empty() {
        return Err(DownloadError::network(
            "received empty response from manifest helper",
        ));
    }
    Ok(url)
}

/// Parse a master playlist body and select the ALAC media stream.
///
/// Variants are ordered by `AVERAGE-BANDWIDTH` descending; the first with
/// `CODECS="alac"` whose `AUDIO` attribute carries a trailing sample rate of
/// at most 192 000 wins. The chosen URI, resolved against `master_url`, has
/// its `.m3u8` suffix replaced with `_m.mp4`.
///
/// Key collection is textual on purpose: the prefetch key first, then every
/// quoted `skd://` URI ending in `c23` or `c6`, in document order.
pub fn select_variant(master_url: &str, master_body: &str) -> Result<VariantSelection> {
    let base = url::Url::parse(master_url)
        .map_err(|err| DownloadError::network("invalid master playlist URL").caused_by(err))?;

    let mut master = match m3u8_rs::parse_playlist_res(master_body.as_bytes()) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => master,
        Ok(m3u8_rs::Playlist::MediaPlaylist(_)) | Err(_) => {
            return Err(DownloadError::network("m3u8 not of master type"))
        }
    };

    master
        .variants
        .sort_by(|a, b| b.average_bandwidth.unwrap_or(0).cmp(&a.average_bandwidth.unwrap_or(0)));

    let mut selected = None;
    for variant in &master.variants {
        if variant.codecs.as_deref() != Some("alac") {
            continue;
        }
        let audio = variant.audio.as_deref().unwrap_or_default();
        let parts: Vec<&str> = audio.split('-').collect();
        if parts.len() < 2 {
            continue;
        }
        let sample_rate: u64 = parts[parts.len() - 2].parse().map_err(|err| {
            DownloadError::network("malformed audio attribute in master playlist")
                .caused_by(err)
                .with_context("audio", audio.to_string())
        })?;
        if sample_rate <= MAX_SAMPLE_RATE {
            tracing::debug!(
                bit_depth = parts[parts.len() - 1],
                sample_rate,
                uri = %variant.uri,
                "selected ALAC variant"
            );
            selected = Some(variant);
            break;
        }
    }

    let variant = selected.ok_or_else(|| {
        DownloadError::network("no ALAC variant at or below 192 kHz in master playlist")
    })?;

    let mut media = base
        .join(&variant.uri)
        .map_err(|err| DownloadError::network("failed to resolve variant URI").caused_by(err))?;
    let path = media.path().to_string();
    let rewritten = match path.strip_suffix(".m3u8") {
        Some(stem) => format!("{stem}_m.mp4"),
        None => format!("{path}_m.mp4"),
    };
    media.set_path(&rewritten);

    let mut keys = vec![PREFETCH_KEY.to_string()];
    for caps in key_uri_pattern().captures_iter(master_body) {
        let uri = &caps[1];
        if uri.ends_with("c23") || uri.ends_with("c6") {
            keys.push(uri.to_string());
        }
    }

    Ok(VariantSelection {
        media_url: media.to_string(),
        keys,
    })
}
