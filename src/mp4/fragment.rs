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


//! Fragmented stream reader.
//!
//! Downloads the `_m.mp4` stream and walks its boxes: the `trex` defaults,
//! the ALAC sample description out of `stsd/enca`, and every `moof`/`mdat`
//! pair's samples with their durations and sample-description indices. The
//! movie header boxes are captured raw because the writer copies them into
//! the output with only their durations rewritten.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, Result};
use crate::mp4::alac::AlacParams;
use crate::mp4::boxes::{self, BoxRef};

/// tfhd optional-field flags.
const TFHD_BASE_DATA_OFFSET: u32 = 0x01;
const TFHD_SAMPLE_DESC_INDEX: u32 = 0x02;
const TFHD_DEFAULT_DURATION: u32 = 0x08;
const TFHD_DEFAULT_SIZE: u32 = 0x10;
const TFHD_DEFAULT_FLAGS: u32 = 0x20;

/// trun optional-field flags.
const TRUN_DATA_OFFSET: u32 = 0x01;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x04;
const TRUN_SAMPLE_DURATION: u32 = 0x100;
const TRUN_SAMPLE_SIZE: u32 = 0x200;
const TRUN_SAMPLE_FLAGS: u32 = 0x400;
const TRUN_SAMPLE_CTS: u32 = 0x800;

/// One audio sample as carried by the fragmented stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Ciphertext payload; replaced by equal-length plaintext downstream.
    pub data: Vec<u8>,
    /// Duration in media timescale units, copied into the output `stts`.
    pub duration: u32,
    /// Index into the key list (already decremented from the 1-based tfhd
    /// value).
    pub desc_index: u32,
}

/// Movie-level boxes the writer reuses. Header payloads are kept so their
/// duration fields can be rewritten; the others are copied whole.
#[derive(Debug, Clone, Default)]
pub struct MovieHeaders {
    /// `mvhd` payload (full box, header stripped).
    pub mvhd: Vec<u8>,
    /// `tkhd` payload.
    pub tkhd: Vec<u8>,
    /// `mdhd` payload.
    pub mdhd: Vec<u8>,
    /// Complete `hdlr` box of the media.
    pub hdlr: Vec<u8>,
    /// Complete `smhd` box.
    pub smhd: Vec<u8>,
    /// Complete `dinf` box.
    pub dinf: Vec<u8>,
}

/// Everything the rest of the pipeline needs from the fragmented stream.
#[derive(Debug, Clone)]
pub struct SongAssets {
    pub alac: AlacParams,
    pub samples: Vec<Sample>,
    pub headers: MovieHeaders,
    /// Σ sample payload length, the decryption progress denominator.
    pub total_data_size: u64,
}

impl SongAssets {
    /// Total track duration in media timescale units.
    pub fn duration(&self) -> u64 {
        self.samples.iter().map(|s| u64::from(s.duration)).sum()
    }
}

struct TrexDefaults {
    duration: u32,
    size: u32,
}

/// Download the fragmented stream into memory, reporting
/// (bytes_read, content_length) as chunks arrive.
///
/// # Errors
/// `network_failure` on transport or parse failures; `cancelled` when the
/// token fires mid-transfer.
pub async fn fetch_fragmented<F>(
    http: &reqwest::Client,
    media_url: &str,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<SongAssets>
where
    F: FnMut(u64, u64),
{
    let response = http
        .get(media_url)
        .send()
        .await
        .map_err(DownloadError::from)?;

    let status = response.status();
    if !status.is_success() {
        return Err(
            DownloadError::network(format!("media request failed: {status}"))
                .with_context("url", media_url.to_string()),
        );
    }

    let total = response.content_length().unwrap_or(0);
    let mut raw: Vec<u8> = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
    let mut stream = response.bytes_stream();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(DownloadError::cancelled("download cancelled"));
            }
            chunk = stream.next() => {
                match chunk {
                    Some(Ok(bytes)) => {
                        raw.extend_from_slice(&bytes);
                        on_progress(raw.len() as u64, total);
                    }
                    Some(Err(err)) => {
                        return Err(DownloadError::network("media stream failed").caused_by(err));
                    }
                    None => break,
                }
            }
        }
    }

    parse_fragmented(&raw)
}

/// Walk an in-memory fragmented MP4 and extract the song assets.
pub fn parse_fragmented(data: &[u8]) -> Result<SongAssets> {
    let trex = parse_trex(data)?;
    let alac = parse_sample_description(data)?;
    let headers = collect_headers(data)?;

    let moofs = boxes::find_all(data, boxes::MOOF)?;
    if moofs.is_empty() {
        return Err(DownloadError::network("no moof boxes in fragmented stream"));
    }
    let mdats = boxes::find_all(data, boxes::MDAT)?;
    if mdats.len() != moofs.len() {
        return Err(DownloadError::network(format!(
            "moof/mdat count mismatch: {} vs {}",
            moofs.len(),
            mdats.len()
        )));
    }

    let mut samples = Vec::new();
    for (moof, mdat) in moofs.iter().zip(mdats.iter()) {
        extract_fragment_samples(moof, mdat.payload, &trex, &mut samples)?;
    }

    let total_data_size = samples.iter().map(|s| s.data.len() as u64).sum();

    Ok(SongAssets {
        alac,
        samples,
        headers,
        total_data_size,
    })
}

fn parse_trex(data: &[u8]) -> Result<TrexDefaults> {
    let trex = boxes::find_path(data, &[boxes::MOOV, boxes::MVEX, boxes::TREX])?
        .ok_or_else(|| DownloadError::network("missing moov/mvex/trex"))?;
    let (_, _, body) = boxes::full_box(trex.payload)?;
    // track_id, default_sample_description_index, then the two defaults we
    // fall back on.
    Ok(TrexDefaults {
        duration: boxes::read_u32(body, 8)?,
        size: boxes::read_u32(body, 12)?,
    })
}

fn parse_sample_description(data: &[u8]) -> Result<AlacParams> {
    let stsd = boxes::find_path(
        data,
        &[
            boxes::MOOV,
            boxes::TRAK,
            boxes::MDIA,
            boxes::MINF,
            boxes::STBL,
            boxes::STSD,
        ],
    )?
    .ok_or_else(|| DownloadError::network("missing sample description table"))?;

    // stsd is a full box with an entry count before its child sample entries.
    let (_, _, entries) = boxes::full_box(stsd.payload)?;
    if entries.len() < 4 {
        return Err(DownloadError::network("stsd too short"));
    }
    let enca = boxes::children(&entries[4..])?
        .into_iter()
        .find(|b| b.kind == boxes::ENCA)
        .ok_or_else(|| DownloadError::network("missing enca sample entry"))?;

    // Child boxes of an audio sample entry start after its 28 fixed bytes.
    if enca.payload.len() < 28 {
        return Err(DownloadError::network("enca sample entry too short"));
    }
    let alac = boxes::children(&enca.payload[28..])?
        .into_iter()
        .find(|b| b.kind == boxes::ALAC)
        .ok_or_else(|| DownloadError::network("missing alac cookie in enca"))?;

    AlacParams::parse(alac.payload)
}

fn collect_headers(data: &[u8]) -> Result<MovieHeaders> {
    let grab_payload = |path: &[boxes::FourCc]| -> Result<Vec<u8>> {
        boxes::find_path(data, path)?
            .map(|b| b.payload.to_vec())
            .ok_or_else(|| {
                DownloadError::network(format!(
                    "missing movie header box '{}'",
                    boxes::fourcc_display(path[path.len() - 1])
                ))
            })
    };
    let grab_raw = |path: &[boxes::FourCc]| -> Result<Vec<u8>> {
        boxes::find_path(data, path)?
            .map(|b| b.raw.to_vec())
            .ok_or_else(|| {
                DownloadError::network(format!(
                    "missing movie header box '{}'",
                    boxes::fourcc_display(path[path.len() - 1])
                ))
            })
    };

    Ok(MovieHeaders {
        mvhd: grab_payload(&[boxes::MOOV, boxes::MVHD])?,
        tkhd: grab_payload(&[boxes::MOOV, boxes::TRAK, boxes::TKHD])?,
        mdhd: grab_payload(&[boxes::MOOV, boxes::TRAK, boxes::MDIA, boxes::MDHD])?,
        hdlr: grab_raw(&[boxes::MOOV, boxes::TRAK, boxes::MDIA, boxes::HDLR])?,
        smhd: grab_raw(&[boxes::MOOV, boxes::TRAK, boxes::MDIA, boxes::MINF, boxes::SMHD])?,
        dinf: grab_raw(&[boxes::MOOV, boxes::TRAK, boxes::MDIA, boxes::MINF, boxes::DINF])?,
    })
}

fn extract_fragment_samples(
    moof: &BoxRef<'_>,
    mdat: &[u8],
    trex: &TrexDefaults,
    out: &mut Vec<Sample>,
) -> Result<()> {
    let trafs: Vec<BoxRef<'_>> = boxes::children(moof.payload)?
        .into_iter()
        .filter(|b| b.kind == boxes::TRAF)
        .collect();

    let mut tfhds = Vec::new();
    let mut truns = Vec::new();
    for traf in &trafs {
        for child in boxes::children(traf.payload)? {
            match child.kind {
                boxes::TFHD => tfhds.push(child),
                boxes::TRUN => truns.push(child),
                _ => {}
            }
        }
    }
    if tfhds.len() != 1 {
        return Err(DownloadError::network(format!(
            "expected one tfhd per fragment, found {}",
            tfhds.len()
        )));
    }
    if truns.is_empty() {
        return Err(DownloadError::network("fragment carries no trun"));
    }

    let tfhd = parse_tfhd(tfhds[0].payload)?;
    // The tfhd index is 1-based when present; key lookup wants 0-based.
    let desc_index = if tfhd.sample_desc_index != 0 {
        tfhd.sample_desc_index - 1
    } else {
        0
    };

    let mut cursor = 0usize;
    for trun in &truns {
        let (_, trun_flags, body) = boxes::full_box(trun.payload)?;
        let sample_count = boxes::read_u32(body, 0)?;
        let mut pos = 4usize;
        if trun_flags & TRUN_DATA_OFFSET != 0 {
            pos += 4;
        }
        if trun_flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            pos += 4;
        }

        for _ in 0..sample_count {
            let mut entry_duration = None;
            let mut entry_size = None;
            if trun_flags & TRUN_SAMPLE_DURATION != 0 {
                entry_duration = Some(boxes::read_u32(body, pos)?);
                pos += 4;
            }
            if trun_flags & TRUN_SAMPLE_SIZE != 0 {
                entry_size = Some(boxes::read_u32(body, pos)?);
                pos += 4;
            }
            if trun_flags & TRUN_SAMPLE_FLAGS != 0 {
                pos += 4;
            }
            if trun_flags & TRUN_SAMPLE_CTS != 0 {
                pos += 4;
            }

            let size = match entry_size {
                Some(s) => s,
                None if tfhd.flags & TFHD_DEFAULT_SIZE != 0 => tfhd.default_size,
                None => trex.size,
            } as usize;

            let duration = match entry_duration {
                Some(d) => d,
                None if tfhd.flags & TFHD_DEFAULT_DURATION != 0 => tfhd.default_duration,
                None => trex.duration,
            };

            let end = cursor
                .checked_add(size)
                .filter(|&e| e <= mdat.len())
                .ok_or_else(|| DownloadError::network("offset mismatch"))?;

            out.push(Sample {
                data: mdat[cursor..end].to_vec(),
                duration,
                desc_index,
            });
            cursor = end;
        }
    }

    // Every byte of the fragment's mdat must be claimed by a trun entry.
    if cursor != mdat.len() {
        return Err(DownloadError::network("offset mismatch"));
    }
    Ok(())
}

struct Tfhd {
    flags: u32,
    sample_desc_index: u32,
    default_duration: u32,
    default_size: u32,
}

fn parse_tfhd(payload: &[u8]) -> Result<Tfhd> {
    let (_, flags, body) = boxes::full_box(payload)?;
    let mut pos = 4usize; // track_id
    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        pos += 8;
    }
    let mut sample_desc_index = 0;
    if flags & TFHD_SAMPLE_DESC_INDEX != 0 {
        sample_desc_index = boxes::read_u32(body, pos)?;
        pos += 4;
    }
    let mut default_duration = 0;
    if flags & TFHD_DEFAULT_DURATION != 0 {
        default_duration = boxes::read_u32(body, pos)?;
        pos += 4;
    }
    let mut default_size = 0;
    if flags & TFHD_DEFAULT_SIZE != 0 {
        default_size = boxes::read_u32(body, pos)?;
        pos += 4;
    }
    if flags & TFHD_DEFAULT_FLAGS != 0 {
        pos += 4;
    }
    let _ = pos;

    Ok(Tfhd {
        flags,
        sample_desc_index,
        default_duration,
        default_size,
    })
}
