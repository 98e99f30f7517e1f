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


//! Cover art embedding.
//!
//! Fetches the artwork at the catalog-advertised dimensions and writes it as
//! the MP4 front-cover picture tag. Callers treat failures here as
//! non-fatal: a missing cover is not worth losing a finished download over.

use std::path::Path;

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::probe::Probe;
use lofty::tag::{Tag, TagExt};

use crate::api::models::Artwork;
use crate::error::{DownloadError, Result};

/// Download the cover and embed it into the file at `path`.
pub async fn embed_artwork(
    http: &reqwest::Client,
    path: &Path,
    artwork: &Artwork,
) -> Result<()> {
    if artwork.url.is_empty() {
        return Err(DownloadError::network("no artwork URL in catalog record"));
    }

    let cover_url = artwork.resolved_url();
    let response = http
        .get(&cover_url)
        .send()
        .await
        .map_err(DownloadError::from)?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::network(format!(
            "artwork request failed: {status}"
        ))
        .with_context("url", cover_url));
    }
    let cover = response
        .bytes()
        .await
        .map_err(|err| DownloadError::network("failed to read artwork body").caused_by(err))?;

    let mime = sniff_mime(&cover);
    let path = path.to_path_buf();
    // lofty works on blocking file I/O; keep it off the async threads.
    tokio::task::spawn_blocking(move || write_picture(&path, cover.to_vec(), mime))
        .await
        .map_err(|err| DownloadError::filesystem("artwork task failed").caused_by(err))?
}

fn write_picture(path: &Path, cover: Vec<u8>, mime: Option<MimeType>) -> Result<()> {
    let mut tagged = Probe::open(path)
        .map_err(|err| DownloadError::filesystem("failed to open file for tagging").caused_by(err))?
        .read()
        .map_err(|err| DownloadError::filesystem("failed to parse file for tagging").caused_by(err))?;

    if tagged.primary_tag().is_none() {
        let tag_type = tagged.primary_tag_type();
        tagged.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged
        .primary_tag_mut()
        .ok_or_else(|| DownloadError::filesystem("file format accepts no picture tag"))?;

    tag.push_picture(Picture::new_unchecked(
        PictureType::CoverFront,
        mime,
        None,
        cover,
    ));

    tag.save_to_path(path, WriteOptions::default())
        .map_err(|err| DownloadError::filesystem("failed to write picture tag").caused_by(err))
}

fn sniff_mime(data: &[u8]) -> Option<MimeType> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(MimeType::Jpeg)
    } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some(MimeType::Png)
    } else {
        None
    }
}
