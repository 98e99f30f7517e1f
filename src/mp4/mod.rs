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


//! ISO-BMFF handling: box primitives, the ALAC magic cookie, the fragmented
//! stream reader, and the non-fragmented M4A writer.

pub mod alac;
pub mod boxes;
pub mod fragment;
pub mod writer;

pub use alac::AlacParams;
pub use fragment::{fetch_fragmented, parse_fragmented, MovieHeaders, Sample, SongAssets};
pub use writer::write_m4a;

#[cfg(test)]
pub(crate) mod testutil;
