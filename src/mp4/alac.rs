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


//! The ALAC magic cookie.
//!
//! Lives in the source stream as a full box named `alac` inside the `enca`
//! sample entry. The decoder needs it bit-exact, so it is read once and
//! copied verbatim into the output `stsd`.

use crate::error::{DownloadError, Result};
use crate::mp4::boxes::{self, BoxWriter, ALAC};

/// Codec configuration carried by the `alac` full box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlacParams {
    pub frame_length: u32,
    pub compatible_version: u8,
    pub bit_depth: u8,
    pub pb: u8,
    pub mb: u8,
    pub kb: u8,
    pub num_channels: u8,
    pub max_run: u16,
    pub max_frame_bytes: u32,
    pub avg_bit_rate: u32,
    pub sample_rate: u32,
}

/// Payload length after the full-box preamble.
const COOKIE_LEN: usize = 24;

impl AlacParams {
    /// Parse from an `alac` full-box payload (version/flags included).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (_, _, body) = boxes::full_box(payload)?;
        if body.len() < COOKIE_LEN {
            return Err(DownloadError::network(format!(
                "alac cookie too short: {} bytes",
                body.len()
            )));
        }
        Ok(Self {
            frame_length: boxes::read_u32(body, 0)?,
            compatible_version: body[4],
            bit_depth: body[5],
            pb: body[6],
            mb: body[7],
            kb: body[8],
            num_channels: body[9],
            max_run: boxes::read_u16(body, 10)?,
            max_frame_bytes: boxes::read_u32(body, 12)?,
            avg_bit_rate: boxes::read_u32(body, 16)?,
            sample_rate: boxes::read_u32(body, 20)?,
        })
    }

    /// Write the `alac` full box, cookie verbatim.
    pub fn write_box(&self, w: &mut BoxWriter) -> Result<()> {
        w.begin(ALAC);
        w.full_box_header(0, 0);
        w.u32(self.frame_length);
        w.u8(self.compatible_version);
        w.u8(self.bit_depth);
        w.u8(self.pb);
        w.u8(self.mb);
        w.u8(self.kb);
        w.u8(self.num_channels);
        w.u16(self.max_run);
        w.u32(self.max_frame_bytes);
        w.u32(self.avg_bit_rate);
        w.u32(self.sample_rate);
        w.end()?;
        Ok(())
    }
}
