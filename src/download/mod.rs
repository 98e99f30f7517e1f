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


//! The acquisition pipeline and its surroundings: phase/progress reporting,
//! the chat reporter seam, the throttled tracker, the request queue, and the
//! orchestrating downloader.

pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod reporter;
pub mod tracker;

pub use pipeline::{DownloadStatus, SongDownloader};
pub use progress::{
    DownloadResult, Phase, Progress, ProgressCallbacks, SongMetadata, SpeedTracker,
};
pub use queue::{JobHandler, QueueConfig, QueueRequest, QueueStatus, RequestQueue};
pub use reporter::{ChatApi, ChatProgressReporter, ProgressReporter};
pub use tracker::ProgressTracker;
