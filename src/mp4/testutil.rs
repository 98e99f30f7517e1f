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


//! Synthetic fragmented-MP4 fixtures shared by the mp4 tests.
//!
//! The fixture mirrors the shape of a real enhanced-HLS `_m.mp4`: a movie
//! header with an `enca`-wrapped ALAC sample description and trex defaults,
//! followed by two fragments that exercise the per-entry, tfhd-default, and
//! trex-default size/duration paths.

use crate::mp4::alac::AlacParams;
use crate::mp4::boxes::{self, BoxWriter};
use crate::mp4::fragment::Sample;

pub struct Fixture {
    pub bytes: Vec<u8>,
    pub expected_samples: Vec<Sample>,
    pub trun_entry_total: usize,
}

pub fn fixture_alac() -> AlacParams {
    AlacParams {
        frame_length: 4096,
        compatible_version: 0,
        bit_depth: 24,
        pb: 40,
        mb: 10,
        kb: 14,
        num_channels: 2,
        max_run: 255,
        max_frame_bytes: 32_768,
        avg_bit_rate: 2_304_000,
        sample_rate: 44_100,
    }
}

fn write_mvhd(w: &mut BoxWriter) {
    w.begin(boxes::MVHD);
    w.full_box_header(0, 0);
    w.u32(0); // creation
    w.u32(0); // modification
    w.u32(44_100); // timescale
    w.u32(0); // duration, rewritten by the writer
    w.u32(0x0001_0000); // rate 1.0
    w.u16(0x0100); // volume 1.0
    w.u16(0);
    w.u64(0);
    for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        w.u32(v);
    }
    w.bytes(&[0; 24]); // pre_defined
    w.u32(2); // next track id
    let _ = w.end();
}

fn write_tkhd(w: &mut BoxWriter) {
    w.begin(boxes::TKHD);
    w.full_box_header(0, 0x1);
    w.u32(0); // creation
    w.u32(0); // modification
    w.u32(1); // track id
    w.u32(0);
    w.u32(0); // duration
    w.u64(0);
    w.u16(0); // layer
    w.u16(0); // alternate group
    w.u16(0x0100); // volume
    w.u16(0);
    for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        w.u32(v);
    }
    w.u32(0); // width
    w.u32(0); // height
    let _ = w.end();
}

fn write_mdhd(w: &mut BoxWriter) {
    w.begin(boxes::MDHD);
    w.full_box_header(0, 0);
    w.u32(0);
    w.u32(0);
    w.u32(44_100); // timescale
    w.u32(0); // duration
    w.u16(0x55C4); // language "und"
    w.u16(0);
    let _ = w.end();
}

fn write_hdlr(w: &mut BoxWriter) {
    w.begin(boxes::HDLR);
    w.full_box_header(0, 0);
    w.u32(0);
    w.bytes(b"soun");
    w.bytes(&[0; 12]);
    w.bytes(b"SoundHandler\0");
    let _ = w.end();
}

fn write_smhd(w: &mut BoxWriter) {
    w.begin(boxes::SMHD);
    w.full_box_header(0, 0);
    w.u16(0); // balance
    w.u16(0);
    let _ = w.end();
}

fn write_dinf(w: &mut BoxWriter) {
    w.begin(boxes::DINF);
    w.begin(*b"dref");
    w.full_box_header(0, 0);
    w.u32(1);
    w.begin(*b"url ");
    w.full_box_header(0, 1); // self-contained
    let _ = w.end();
    let _ = w.end();
    let _ = w.end();
}

fn write_stsd_with_enca(w: &mut BoxWriter) {
    w.begin(boxes::STSD);
    w.full_box_header(0, 0);
    w.u32(1); // entry count
    w.begin(boxes::ENCA);
    // Audio sample entry prefix: reserved + data-reference-index, version
    // block, channel/sample fields.
    w.bytes(&[0; 6]);
    w.u16(1); // data reference index
    w.bytes(&[0; 8]);
    w.u16(2); // channels
    w.u16(16); // sample size
    w.u16(0);
    w.u16(0);
    w.u32(44_100 << 16); // 16.16 sample rate
    let _ = fixture_alac().write_box(w);
    let _ = w.end();
    let _ = w.end();
}

fn write_moov(w: &mut BoxWriter) {
    w.begin(boxes::MOOV);
    write_mvhd(w);
    w.begin(boxes::TRAK);
    write_tkhd(w);
    w.begin(boxes::MDIA);
    write_mdhd(w);
    write_hdlr(w);
    w.begin(boxes::MINF);
    write_smhd(w);
    write_dinf(w);
    w.begin(boxes::STBL);
    write_stsd_with_enca(w);
    let _ = w.end(); // stbl
    let _ = w.end(); // minf
    let _ = w.end(); // mdia
    let _ = w.end(); // trak
    w.begin(boxes::MVEX);
    w.begin(boxes::TREX);
    w.full_box_header(0, 0);
    w.u32(1); // track id
    w.u32(1); // default sample description index
    w.u32(1024); // default sample duration
    w.u32(0); // default sample size
    w.u32(0); // default sample flags
    let _ = w.end();
    let _ = w.end();
    let _ = w.end(); // moov
}

struct TrunSpec {
    flags: u32,
    entries: Vec<(Option<u32>, Option<u32>)>, // (duration, size)
}

struct FragmentSpec {
    tfhd_flags: u32,
    sample_desc_index: Option<u32>,
    default_duration: Option<u32>,
    default_size: Option<u32>,
    truns: Vec<TrunSpec>,
}

fn write_fragment(w: &mut BoxWriter, spec: &FragmentSpec, mdat: &[u8], sequence: u32) {
    w.begin(boxes::MOOF);
    w.begin(*b"mfhd");
    w.full_box_header(0, 0);
    w.u32(sequence);
    let _ = w.end();
    w.begin(boxes::TRAF);

    w.begin(boxes::TFHD);
    w.full_box_header(0, spec.tfhd_flags);
    w.u32(1); // track id
    if let Some(idx) = spec.sample_desc_index {
        w.u32(idx);
    }
    if let Some(d) = spec.default_duration {
        w.u32(d);
    }
    if let Some(s) = spec.default_size {
        w.u32(s);
    }
    let _ = w.end();

    for trun in &spec.truns {
        w.begin(boxes::TRUN);
        w.full_box_header(0, trun.flags);
        w.u32(trun.entries.len() as u32);
        for &(duration, size) in &trun.entries {
            if trun.flags & 0x100 != 0 {
                w.u32(duration.unwrap_or(0));
            }
            if trun.flags & 0x200 != 0 {
                w.u32(size.unwrap_or(0));
            }
        }
        let _ = w.end();
    }

    let _ = w.end(); // traf
    let _ = w.end(); // moof

    w.begin(boxes::MDAT);
    w.bytes(mdat);
    let _ = w.end();
}

fn build(extra_mdat_slack: usize) -> Fixture {
    let mut w = BoxWriter::new();

    w.begin(boxes::FTYP);
    w.bytes(b"mp42");
    w.u32(0);
    w.bytes(b"mp42");
    w.bytes(b"isom");
    let _ = w.end();

    write_moov(&mut w);

    // Fragment 1: per-entry sizes throughout, first trun with per-entry
    // durations, second trun falling back to the tfhd default duration.
    let frag1 = FragmentSpec {
        tfhd_flags: 0x08,
        sample_desc_index: None,
        default_duration: Some(800),
        default_size: None,
        truns: vec![
            TrunSpec {
                flags: 0x300,
                entries: vec![
                    (Some(1024), Some(5)),
                    (Some(1024), Some(6)),
                    (Some(512), Some(7)),
                ],
            },
            TrunSpec {
                flags: 0x200,
                entries: vec![(None, Some(4)), (None, Some(4))],
            },
        ],
    };
    let mdat1: Vec<u8> = (0u8..26).collect();
    write_fragment(&mut w, &frag1, &mdat1, 1);

    // Fragment 2: tfhd default size, trex default duration, and a 1-based
    // sample-description index pointing at the second key.
    let frag2 = FragmentSpec {
        tfhd_flags: 0x02 | 0x10,
        sample_desc_index: Some(2),
        default_duration: None,
        default_size: Some(3),
        truns: vec![TrunSpec {
            flags: 0x000,
            entries: vec![(None, None), (None, None)],
        }],
    };
    let mut mdat2: Vec<u8> = vec![0xA0, 0xA1, 0xA2, 0xB0, 0xB1, 0xB2];
    mdat2.extend(std::iter::repeat(0xFF).take(extra_mdat_slack));
    write_fragment(&mut w, &frag2, &mdat2, 2);

    let bytes = w.finish().expect("fixture writer is balanced");

    let expected_samples = vec![
        Sample { data: mdat1[0..5].to_vec(), duration: 1024, desc_index: 0 },
        Sample { data: mdat1[5..11].to_vec(), duration: 1024, desc_index: 0 },
        Sample { data: mdat1[11..18].to_vec(), duration: 512, desc_index: 0 },
        Sample { data: mdat1[18..22].to_vec(), duration: 800, desc_index: 0 },
        Sample { data: mdat1[22..26].to_vec(), duration: 800, desc_index: 0 },
        Sample { data: vec![0xA0, 0xA1, 0xA2], duration: 1024, desc_index: 1 },
        Sample { data: vec![0xB0, 0xB1, 0xB2], duration: 1024, desc_index: 1 },
    ];

    Fixture {
        bytes,
        expected_samples,
        trun_entry_total: 7,
    }
}

/// A two-fragment stream whose samples cover every size/duration fallback.
pub fn fragmented_fixture() -> Fixture {
    build(0)
}

/// Same stream, but the last `mdat` carries an unclaimed trailing byte.
pub fn fragmented_fixture_with_slack() -> Vec<u8> {
    build(1).bytes
}
