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


//! Non-fragmented M4A assembly.
//!
//! Layout is fixed: `ftyp`, `moov` (movie headers copied from the source
//! stream with recomputed durations, a rebuilt sample table, and the iTunes
//! `udta/meta/ilst` atoms), then a single `mdat` holding the plaintext
//! samples back to back. `stco` is written zeroed and patched once the
//! `mdat` position is known.
//!
//! Chunking is fixed at five samples per chunk, which keeps the
//! sample-to-chunk table at one entry (two when the count is not a multiple
//! of five).

use crate::api::models::Song;
use crate::error::{DownloadError, Result};
use crate::mp4::boxes::{self, BoxWriter, FourCc};
use crate::mp4::fragment::SongAssets;

const CHUNK_SIZE: u32 = 5;

// iTunes metadata atom codes. The '©' prefix is 0xA9.
const NAM: FourCc = [0xA9, b'n', b'a', b'm'];
const ALB: FourCc = [0xA9, b'a', b'l', b'b'];
const ART: FourCc = [0xA9, b'A', b'R', b'T'];
const PRF: FourCc = [0xA9, b'p', b'r', b'f'];
const WRT: FourCc = [0xA9, b'w', b'r', b't'];
const DAY: FourCc = [0xA9, b'd', b'a', b'y'];
const GEN: FourCc = [0xA9, b'g', b'e', b'n'];
const PUB: FourCc = [0xA9, b'p', b'u', b'b'];
const SONM: FourCc = *b"sonm";
const SOAL: FourCc = *b"soal";
const SOAR: FourCc = *b"soar";
const SOAA: FourCc = *b"soaa";
const SOCO: FourCc = *b"soco";
const AART: FourCc = *b"aART";
const CPRT: FourCc = *b"cprt";
const CPIL: FourCc = *b"cpil";
const CNID: FourCc = *b"cnID";
const ATID: FourCc = *b"atID";
const TRKN: FourCc = *b"trkn";
const DISK: FourCc = *b"disk";

/// Typed payload of an `ilst` `data` box.
enum DataValue<'a> {
    Utf8(&'a str),
    U8(u8),
    U32(u32),
    Bytes(&'a [u8]),
}

/// Assemble the complete M4A file in memory.
///
/// `plaintext` is the decrypted sample payload in sample order; its length
/// must equal the sample table's total.
pub fn write_m4a(song: &Song, assets: &SongAssets, plaintext: &[u8]) -> Result<Vec<u8>> {
    if plaintext.len() as u64 != assets.total_data_size {
        return Err(DownloadError::unknown(format!(
            "plaintext size {} does not match sample table total {}",
            plaintext.len(),
            assets.total_data_size
        )));
    }

    let duration = assets.duration();
    let num_samples = assets.samples.len() as u32;
    let mut w = BoxWriter::new();

    // ftyp
    w.begin(boxes::FTYP);
    w.bytes(b"M4A ");
    w.u32(0);
    w.bytes(b"M4A ");
    w.bytes(b"mp42");
    w.bytes(b"isom");
    w.bytes(&[0, 0, 0, 0]);
    w.end()?;

    // moov
    w.begin(boxes::MOOV);

    write_patched_header(&mut w, boxes::MVHD, &assets.headers.mvhd, duration, 16, 24, false)?;

    w.begin(boxes::TRAK);
    write_patched_header(&mut w, boxes::TKHD, &assets.headers.tkhd, duration, 20, 28, true)?;

    w.begin(boxes::MDIA);
    write_patched_header(&mut w, boxes::MDHD, &assets.headers.mdhd, duration, 16, 24, false)?;
    w.raw_box(&assets.headers.hdlr);

    w.begin(boxes::MINF);
    w.raw_box(&assets.headers.smhd);
    w.raw_box(&assets.headers.dinf);

    w.begin(boxes::STBL);
    write_stsd(&mut w, assets)?;
    write_stts(&mut w, assets)?;
    write_stsc(&mut w, num_samples)?;
    write_stsz(&mut w, assets)?;
    let stco_entries_at = write_stco(&mut w, num_samples)?;
    w.end()?; // stbl
    w.end()?; // minf
    w.end()?; // mdia
    w.end()?; // trak

    write_udta(&mut w, song)?;
    w.end()?; // moov

    // mdat, then fix up the chunk offsets now that its position is known.
    w.begin(boxes::MDAT);
    w.bytes(plaintext);
    let mdat = w.end()?;

    let mut offset = (mdat.offset + mdat.header_size) as u64;
    let mut entry = stco_entries_at;
    for (i, sample) in assets.samples.iter().enumerate() {
        if i as u32 % CHUNK_SIZE == 0 {
            let offset32 = u32::try_from(offset).map_err(|_| {
                DownloadError::unknown("chunk offset exceeds 32-bit stco range")
            })?;
            w.patch_u32(entry, offset32)?;
            entry += 4;
        }
        offset += sample.data.len() as u64;
    }

    w.finish()
}

/// Copy a movie header payload, replacing its duration (field width chosen
/// by version) and, for `tkhd`, forcing the enabled/in-movie/in-preview
/// flags.
fn write_patched_header(
    w: &mut BoxWriter,
    kind: FourCc,
    payload: &[u8],
    duration: u64,
    v0_offset: usize,
    v1_offset: usize,
    is_tkhd: bool,
) -> Result<()> {
    let mut patched = payload.to_vec();
    let version = *patched.first().ok_or_else(|| {
        DownloadError::network(format!(
            "empty source header '{}'",
            boxes::fourcc_display(kind)
        ))
    })?;

    if version == 0 {
        if patched.len() < v0_offset + 4 {
            return Err(DownloadError::network("source header too short"));
        }
        patched[v0_offset..v0_offset + 4].copy_from_slice(&(duration as u32).to_be_bytes());
    } else {
        if patched.len() < v1_offset + 8 {
            return Err(DownloadError::network("source header too short"));
        }
        patched[v1_offset..v1_offset + 8].copy_from_slice(&duration.to_be_bytes());
    }

    if is_tkhd {
        patched[1..4].copy_from_slice(&[0, 0, 0x07]);
    }

    w.begin(kind);
    w.bytes(&patched);
    w.end()?;
    Ok(())
}

/// One-entry `stsd` whose sample entry is a plain `alac` audio entry
/// wrapping the verbatim magic cookie.
fn write_stsd(w: &mut BoxWriter, assets: &SongAssets) -> Result<()> {
    w.begin(boxes::STSD);
    w.full_box_header(0, 0);
    w.u32(1);

    w.begin(boxes::ALAC);
    w.bytes(&[0, 0, 0, 0, 0, 0, 0, 1]); // reserved + data reference index
    w.bytes(&[0; 8]);
    w.u16(u16::from(assets.alac.num_channels));
    w.u16(u16::from(assets.alac.bit_depth));
    w.bytes(&[0, 0]);
    w.u32(assets.alac.sample_rate);
    w.bytes(&[0, 0]);
    assets.alac.write_box(w)?;
    w.end()?;

    w.end()?;
    Ok(())
}

/// Run-length compress consecutive equal sample durations.
fn write_stts(w: &mut BoxWriter, assets: &SongAssets) -> Result<()> {
    let mut entries: Vec<(u32, u32)> = Vec::new();
    for sample in &assets.samples {
        match entries.last_mut() {
            Some((count, delta)) if *delta == sample.duration => *count += 1,
            _ => entries.push((1, sample.duration)),
        }
    }

    w.begin(boxes::STTS);
    w.full_box_header(0, 0);
    w.u32(entries.len() as u32);
    for (count, delta) in entries {
        w.u32(count);
        w.u32(delta);
    }
    w.end()?;
    Ok(())
}

fn write_stsc(w: &mut BoxWriter, num_samples: u32) -> Result<()> {
    w.begin(boxes::STSC);
    w.full_box_header(0, 0);
    if num_samples % CHUNK_SIZE == 0 {
        w.u32(1);
        w.u32(1); // first chunk
        w.u32(CHUNK_SIZE);
        w.u32(1); // sample description index
    } else {
        w.u32(2);
        w.u32(1);
        w.u32(CHUNK_SIZE);
        w.u32(1);
        w.u32(num_samples / CHUNK_SIZE + 1); // trailing short chunk
        w.u32(num_samples % CHUNK_SIZE);
        w.u32(1);
    }
    w.end()?;
    Ok(())
}

fn write_stsz(w: &mut BoxWriter, assets: &SongAssets) -> Result<()> {
    w.begin(boxes::STSZ);
    w.full_box_header(0, 0);
    w.u32(0); // no uniform size
    w.u32(assets.samples.len() as u32);
    for sample in &assets.samples {
        w.u32(sample.data.len() as u32);
    }
    w.end()?;
    Ok(())
}

/// Zeroed chunk-offset table; returns the buffer position of the first
/// entry for the post-`mdat` fixup.
fn write_stco(w: &mut BoxWriter, num_samples: u32) -> Result<usize> {
    let entry_count = num_samples.div_ceil(CHUNK_SIZE);
    w.begin(boxes::STCO);
    w.full_box_header(0, 0);
    w.u32(entry_count);
    let entries_at = w.position();
    for _ in 0..entry_count {
        w.u32(0);
    }
    w.end()?;
    Ok(entries_at)
}

fn write_udta(w: &mut BoxWriter, song: &Song) -> Result<()> {
    w.begin(boxes::UDTA);
    w.begin(boxes::META);
    w.full_box_header(0, 0);

    // Handler advertising the iTunes metadata dialect.
    w.begin(boxes::HDLR);
    w.full_box_header(0, 0);
    w.u32(0);
    w.bytes(b"mdir");
    w.u32(0x6170_706C); // 'appl'
    w.u32(0);
    w.u32(0);
    w.end()?;

    write_ilst(w, song)?;

    w.end()?; // meta
    w.end()?; // udta
    Ok(())
}

fn write_ilst(w: &mut BoxWriter, song: &Song) -> Result<()> {
    let attrs = &song.attributes;
    let albums = &song.relationships.albums.data;
    let artists = &song.relationships.artists.data;

    w.begin(boxes::ILST);

    add_meta(w, NAM, DataValue::Utf8(&attrs.name))?;
    add_meta(w, SONM, DataValue::Utf8(&attrs.name))?;
    add_meta(w, ALB, DataValue::Utf8(&attrs.album_name))?;
    add_meta(w, SOAL, DataValue::Utf8(&attrs.album_name))?;
    add_meta(w, ART, DataValue::Utf8(&attrs.artist_name))?;
    add_meta(w, SOAR, DataValue::Utf8(&attrs.artist_name))?;
    add_meta(w, PRF, DataValue::Utf8(&attrs.artist_name))?;
    add_freeform(w, "PERFORMER", DataValue::Utf8(&attrs.artist_name))?;
    if let Some(album) = albums.first() {
        add_freeform(w, "ITUNESALBUMID", DataValue::Utf8(&album.id))?;
    }
    add_meta(w, WRT, DataValue::Utf8(&attrs.composer_name))?;
    add_meta(w, SOCO, DataValue::Utf8(&attrs.composer_name))?;
    add_meta(w, DAY, DataValue::Utf8(&attrs.release_date))?;
    add_freeform(w, "RELEASETIME", DataValue::Utf8(&attrs.release_date))?;

    let catalog_id: u32 = song.id.parse().map_err(|_| {
        DownloadError::unknown(format!("song id is not a numeric catalog id: {}", song.id))
    })?;
    add_meta(w, CNID, DataValue::U32(catalog_id))?;
    add_freeform(w, "ISRC", DataValue::Utf8(&attrs.isrc))?;

    if let Some(genre) = attrs.genre_names.first() {
        add_meta(w, GEN, DataValue::Utf8(genre))?;
    }

    if let Some(album) = albums.first().and_then(|a| a.attributes.as_ref()) {
        add_meta(w, AART, DataValue::Utf8(&attrs.artist_name))?;
        add_meta(w, SOAA, DataValue::Utf8(&attrs.artist_name))?;
        add_meta(w, CPRT, DataValue::Utf8(&album.copyright))?;
        add_meta(w, CPIL, DataValue::U8(u8::from(album.is_compilation)))?;
        add_meta(w, PUB, DataValue::Utf8(&album.record_label))?;
        add_freeform(w, "LABEL", DataValue::Utf8(&album.record_label))?;
        add_freeform(w, "UPC", DataValue::Utf8(&album.upc))?;
    }

    if let Some(artist) = artists.first() {
        if !artist.id.is_empty() {
            let artist_id: u32 = artist.id.parse().map_err(|_| {
                DownloadError::unknown(format!(
                    "artist id is not a numeric catalog id: {}",
                    artist.id
                ))
            })?;
            add_meta(w, ATID, DataValue::U32(artist_id))?;
        }
    }

    let track_count = albums
        .first()
        .and_then(|a| a.attributes.as_ref())
        .map(|a| a.track_count)
        .unwrap_or(0);
    let mut trkn = [0u8; 8];
    trkn[0..4].copy_from_slice(&attrs.track_number.to_be_bytes());
    trkn[4..6].copy_from_slice(&(track_count as u16).to_be_bytes());
    add_meta(w, TRKN, DataValue::Bytes(&trkn))?;

    let mut disk = [0u8; 8];
    disk[0..4].copy_from_slice(&attrs.disc_number.to_be_bytes());
    add_meta(w, DISK, DataValue::Bytes(&disk))?;

    w.end()?;
    Ok(())
}

fn add_data(w: &mut BoxWriter, value: DataValue<'_>) -> Result<()> {
    w.begin(boxes::DATA);
    match value {
        DataValue::Utf8(s) => {
            w.u32(1); // UTF-8
            w.u32(0);
            w.bytes(s.as_bytes());
        }
        DataValue::U8(v) => {
            w.u32(21); // big-endian signed integer
            w.u32(0);
            w.u8(v);
        }
        DataValue::U32(v) => {
            w.u32(21);
            w.u32(0);
            w.u32(v);
        }
        DataValue::Bytes(b) => {
            w.u32(0); // binary
            w.u32(0);
            w.bytes(b);
        }
    }
    w.end()?;
    Ok(())
}

fn add_meta(w: &mut BoxWriter, kind: FourCc, value: DataValue<'_>) -> Result<()> {
    w.begin(kind);
    add_data(w, value)?;
    w.end()?;
    Ok(())
}

/// Freeform `----` atom under the `com.apple.iTunes` namespace.
fn add_freeform(w: &mut BoxWriter, name: &str, value: DataValue<'_>) -> Result<()> {
    w.begin(boxes::FREE_FORM);

    w.begin(boxes::MEAN);
    w.u32(0);
    w.bytes(b"com.apple.iTunes");
    w.end()?;

    w.begin(boxes::NAME);
    w.u32(0);
    w.bytes(name.as_bytes());
    w.end()?;

    add_data(w, value)?;
    w.end()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{AlbumAttributes, Related, Song};
    use crate::mp4::boxes::children;
    use crate::mp4::fragment::parse_fragmented;
    use crate::mp4::testutil;

    fn fixture_song() -> Song {
        let mut song: Song = serde_json::from_value(serde_json::json!({
            "id": "1559523359",
            "type": "songs",
            "attributes": {
                "name": "Never Gonna Give You Up",
                "artistName": "Rick Astley",
                "albumName": "Whenever You Need Somebody",
                "composerName": "Stock Aitken Waterman",
                "releaseDate": "1987-07-27",
                "isrc": "GBARL8700027",
                "genreNames": ["Pop"],
                "trackNumber": 1,
                "discNumber": 1,
                "durationInMillis": 213573
            }
        }))
        .expect("fixture song decodes");
        song.relationships.albums.data.push(Related {
            id: "1559523357".to_string(),
            kind: "albums".to_string(),
            attributes: Some(AlbumAttributes {
                name: "Whenever You Need Somebody".to_string(),
                artist_name: "Rick Astley".to_string(),
                copyright: "℗ 1987 Sony".to_string(),
                record_label: "RCA".to_string(),
                upc: "190295459987".to_string(),
                release_date: "1987-11-12".to_string(),
                track_count: 10,
                is_compilation: false,
                is_single: false,
            }),
        });
        song.relationships.artists.data.push(Related {
            id: "669771".to_string(),
            kind: "artists".to_string(),
            attributes: None,
        });
        song
    }

    fn build_output() -> (Vec<u8>, crate::mp4::SongAssets) {
        let fixture = testutil::fragmented_fixture();
        let assets = parse_fragmented(&fixture.bytes).unwrap();
        let plaintext: Vec<u8> = assets
            .samples
            .iter()
            .flat_map(|s| s.data.iter().copied())
            .collect();
        let out = write_m4a(&fixture_song(), &assets, &plaintext).unwrap();
        (out, assets)
    }

    fn stbl_payload(out: &[u8]) -> Vec<u8> {
        boxes::find_path(
            out,
            &[boxes::MOOV, boxes::TRAK, boxes::MDIA, boxes::MINF, boxes::STBL],
        )
        .unwrap()
        .unwrap()
        .payload
        .to_vec()
    }

    #[test]
    fn ftyp_is_an_m4a_brand() {
        let (out, _) = build_output();
        let top = children(&out).unwrap();
        assert_eq!(top[0].kind, boxes::FTYP);
        assert_eq!(&top[0].payload[0..4], b"M4A ");
        assert_eq!(&top[0].payload[8..12], b"M4A ");
        assert_eq!(&top[0].payload[12..16], b"mp42");
        assert_eq!(&top[0].payload[16..20], b"isom");
        assert_eq!(&top[0].payload[20..24], &[0, 0, 0, 0]);
    }

    #[test]
    fn movie_headers_carry_the_recomputed_duration() {
        let (out, assets) = build_output();
        let duration = assets.duration() as u32;

        let mvhd = boxes::find_path(&out, &[boxes::MOOV, boxes::MVHD])
            .unwrap()
            .unwrap();
        assert_eq!(boxes::read_u32(mvhd.payload, 16).unwrap(), duration);

        let tkhd = boxes::find_path(&out, &[boxes::MOOV, boxes::TRAK, boxes::TKHD])
            .unwrap()
            .unwrap();
        assert_eq!(boxes::read_u32(tkhd.payload, 20).unwrap(), duration);
        // enabled + in movie + in preview
        assert_eq!(&tkhd.payload[1..4], &[0, 0, 7]);

        let mdhd = boxes::find_path(&out, &[boxes::MOOV, boxes::TRAK, boxes::MDIA, boxes::MDHD])
            .unwrap()
            .unwrap();
        assert_eq!(boxes::read_u32(mdhd.payload, 16).unwrap(), duration);
    }

    #[test]
    fn stsd_holds_one_alac_entry_with_the_verbatim_cookie() {
        let (out, assets) = build_output();
        let stbl = stbl_payload(&out);
        let stsd = children(&stbl)
            .unwrap()
            .into_iter()
            .find(|b| b.kind == boxes::STSD)
            .unwrap();
        let (_, _, body) = boxes::full_box(stsd.payload).unwrap();
        assert_eq!(boxes::read_u32(body, 0).unwrap(), 1);

        let entry = children(&body[4..])
            .unwrap()
            .into_iter()
            .find(|b| b.kind == boxes::ALAC)
            .unwrap();
        assert_eq!(
            boxes::read_u16(entry.payload, 16).unwrap(),
            u16::from(assets.alac.num_channels)
        );
        assert_eq!(
            boxes::read_u16(entry.payload, 18).unwrap(),
            u16::from(assets.alac.bit_depth)
        );
        assert_eq!(
            boxes::read_u32(entry.payload, 22).unwrap(),
            assets.alac.sample_rate
        );

        let cookie = children(&entry.payload[28..])
            .unwrap()
            .into_iter()
            .find(|b| b.kind == boxes::ALAC)
            .unwrap();
        let parsed = crate::mp4::AlacParams::parse(cookie.payload).unwrap();
        assert_eq!(parsed, assets.alac);
    }

    #[test]
    fn sample_tables_round_trip() {
        let (out, assets) = build_output();
        let n = assets.samples.len() as u32;
        let stbl = stbl_payload(&out);
        let table = |kind: FourCc| {
            children(&stbl)
                .unwrap()
                .into_iter()
                .find(|b| b.kind == kind)
                .map(|b| b.payload.to_vec())
                .unwrap()
        };

        // stts entry count equals the run-length of the duration sequence.
        let mut runs = 0u32;
        let mut last = None;
        for s in &assets.samples {
            if last != Some(s.duration) {
                runs += 1;
                last = Some(s.duration);
            }
        }
        let stts = table(boxes::STTS);
        assert_eq!(boxes::read_u32(&stts, 4).unwrap(), runs);
        let mut covered = 0u32;
        for i in 0..runs as usize {
            covered += boxes::read_u32(&stts, 8 + i * 8).unwrap();
        }
        assert_eq!(covered, n);

        let stsz = table(boxes::STSZ);
        assert_eq!(boxes::read_u32(&stsz, 4).unwrap(), 0);
        assert_eq!(boxes::read_u32(&stsz, 8).unwrap(), n);
        for (i, s) in assets.samples.iter().enumerate() {
            assert_eq!(
                boxes::read_u32(&stsz, 12 + i * 4).unwrap(),
                s.data.len() as u32
            );
        }

        // 7 samples → chunks of 5 and 2.
        let stsc = table(boxes::STSC);
        assert_eq!(boxes::read_u32(&stsc, 4).unwrap(), 2);
        assert_eq!(boxes::read_u32(&stsc, 8).unwrap(), 1);
        assert_eq!(boxes::read_u32(&stsc, 12).unwrap(), 5);
        assert_eq!(boxes::read_u32(&stsc, 20).unwrap(), 2);
        assert_eq!(boxes::read_u32(&stsc, 24).unwrap(), 2);

        let stco = table(boxes::STCO);
        assert_eq!(boxes::read_u32(&stco, 4).unwrap(), n.div_ceil(5));
    }

    #[test]
    fn stsc_collapses_to_one_entry_for_exact_multiples() {
        let mut w = BoxWriter::new();
        write_stsc(&mut w, 10).unwrap();
        let buf = w.finish().unwrap();
        let stsc = children(&buf).unwrap()[0];
        assert_eq!(boxes::read_u32(stsc.payload, 4).unwrap(), 1);
        assert_eq!(boxes::read_u32(stsc.payload, 8).unwrap(), 1);
        assert_eq!(boxes::read_u32(stsc.payload, 12).unwrap(), 5);
    }

    #[test]
    fn stco_offsets_point_into_mdat() {
        let (out, assets) = build_output();

        // Locate the mdat payload in the output by walking the top level.
        let mut pos = 0usize;
        let mut mdat_payload_offset = 0usize;
        for b in children(&out).unwrap() {
            if b.kind == boxes::MDAT {
                mdat_payload_offset = pos + (b.raw.len() - b.payload.len());
                break;
            }
            pos += b.raw.len();
        }
        assert_ne!(mdat_payload_offset, 0);

        let stbl = stbl_payload(&out);
        let stco = children(&stbl)
            .unwrap()
            .into_iter()
            .find(|b| b.kind == boxes::STCO)
            .unwrap();

        let mut expected = Vec::new();
        let mut offset = mdat_payload_offset as u64;
        for (i, s) in assets.samples.iter().enumerate() {
            if i % 5 == 0 {
                expected.push(offset as u32);
            }
            offset += s.data.len() as u64;
        }

        let count = boxes::read_u32(stco.payload, 4).unwrap() as usize;
        assert_eq!(count, expected.len());
        for (i, want) in expected.iter().enumerate() {
            assert_eq!(boxes::read_u32(stco.payload, 8 + i * 4).unwrap(), *want);
        }

        // And the first chunk really starts with the first sample's bytes.
        let first = &out[expected[0] as usize..expected[0] as usize + assets.samples[0].data.len()];
        assert_eq!(first, assets.samples[0].data.as_slice());
    }

    #[test]
    fn ilst_carries_the_expected_atoms() {
        let (out, _) = build_output();
        let meta = boxes::find_path(&out, &[boxes::MOOV, boxes::UDTA, boxes::META])
            .unwrap()
            .unwrap();
        // meta is a full box; children follow the version/flags word.
        let meta_children = children(&meta.payload[4..]).unwrap();
        assert_eq!(meta_children[0].kind, boxes::HDLR);
        assert_eq!(&meta_children[0].payload[8..12], b"mdir");
        assert_eq!(boxes::read_u32(meta_children[0].payload, 12).unwrap(), 0x6170_706C);

        let ilst = meta_children
            .iter()
            .find(|b| b.kind == boxes::ILST)
            .unwrap();
        let atoms = children(ilst.payload).unwrap();
        let kinds: Vec<FourCc> = atoms.iter().map(|b| b.kind).collect();

        for expected in [NAM, SONM, ALB, SOAL, ART, SOAR, PRF, WRT, SOCO, DAY, CNID, GEN, AART,
            SOAA, CPRT, CPIL, PUB, ATID, TRKN, DISK]
        {
            assert!(
                kinds.contains(&expected),
                "missing atom {}",
                boxes::fourcc_display(expected)
            );
        }
        assert_eq!(
            kinds.iter().filter(|k| **k == boxes::FREE_FORM).count(),
            6 // PERFORMER, ITUNESALBUMID, RELEASETIME, ISRC, LABEL, UPC
        );

        // Spot-check a string atom and the trkn payload.
        let nam = atoms.iter().find(|b| b.kind == NAM).unwrap();
        let data = children(nam.payload).unwrap()[0];
        assert_eq!(boxes::read_u32(data.payload, 0).unwrap(), 1);
        assert_eq!(&data.payload[8..], b"Never Gonna Give You Up");

        let trkn = atoms.iter().find(|b| b.kind == TRKN).unwrap();
        let data = children(trkn.payload).unwrap()[0];
        assert_eq!(boxes::read_u32(data.payload, 0).unwrap(), 0);
        assert_eq!(boxes::read_u32(data.payload, 8).unwrap(), 1); // track 1
        assert_eq!(boxes::read_u16(data.payload, 12).unwrap(), 10); // of 10

        let cnid = atoms.iter().find(|b| b.kind == CNID).unwrap();
        let data = children(cnid.payload).unwrap()[0];
        assert_eq!(boxes::read_u32(data.payload, 0).unwrap(), 21);
        assert_eq!(boxes::read_u32(data.payload, 8).unwrap(), 1_559_523_359);
    }

    #[test]
    fn mismatched_plaintext_is_rejected() {
        let fixture = testutil::fragmented_fixture();
        let assets = parse_fragmented(&fixture.bytes).unwrap();
        let err = write_m4a(&fixture_song(), &assets, &[0u8; 3]).unwrap_err();
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn non_numeric_song_id_is_an_error() {
        let fixture = testutil::fragmented_fixture();
        let assets = parse_fragmented(&fixture.bytes).unwrap();
        let plaintext: Vec<u8> = assets
            .samples
            .iter()
            .flat_map(|s| s.data.iter().copied())
            .collect();
        let mut song = fixture_song();
        song.id = "pl.not-numeric".to_string();
        assert!(write_m4a(&song, &assets, &plaintext).is_err());
    }
}
