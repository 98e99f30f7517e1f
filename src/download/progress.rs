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


//! Phases, progress snapshots, and the callback surface the pipeline
//! reports through.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::DownloadError;

/// Pipeline phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Validating,
    Downloading,
    Decrypting,
    Writing,
    Uploading,
    Complete,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Validating => "validating",
            Phase::Downloading => "downloading",
            Phase::Decrypting => "decrypting",
            Phase::Writing => "writing",
            Phase::Uploading => "uploading",
            Phase::Complete => "complete",
            Phase::Error => "error",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Phase::Validating => "🔎",
            Phase::Downloading => "⬇️",
            Phase::Decrypting => "🔓",
            Phase::Writing => "💾",
            Phase::Uploading => "📤",
            Phase::Complete => "✅",
            Phase::Error => "❌",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Phase::Validating => "Validating request...",
            Phase::Downloading => "Downloading audio...",
            Phase::Decrypting => "Decrypting samples...",
            Phase::Writing => "Writing file...",
            Phase::Uploading => "Uploading...",
            Phase::Complete => "Complete!",
            Phase::Error => "Failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one operation's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    pub bytes_processed: u64,
    pub total_bytes: u64,
    /// Bytes per second over the recent window.
    pub speed: u64,
    pub eta: Duration,
    pub percentage: f64,
}

impl Progress {
    /// Build a snapshot from raw counters, deriving the percentage.
    pub fn from_counts(bytes_processed: u64, total_bytes: u64) -> Self {
        let percentage = if total_bytes > 0 {
            (bytes_processed as f64 / total_bytes as f64) * 100.0
        } else {
            0.0
        };
        Self {
            bytes_processed,
            total_bytes,
            speed: 0,
            eta: Duration::ZERO,
            percentage,
        }
    }

    pub fn speed_string(&self) -> String {
        format!("{:.1} MB/s", self.speed as f64 / 1_000_000.0)
    }

    pub fn bytes_string(bytes: u64) -> String {
        format!("{:.1} MB", bytes as f64 / 1_000_000.0)
    }

    pub fn eta_string(&self) -> String {
        let secs = self.eta.as_secs();
        if secs == 0 {
            return "calculating...".to_string();
        }
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        if h > 0 {
            format!("{h}h {m}m")
        } else if m > 0 {
            format!("{m}m {s}s")
        } else {
            format!("{s}s")
        }
    }
}

/// Sliding-window byte-rate estimator.
///
/// Positions are absolute totals; the average is taken over the samples that
/// fall inside the window, which smooths out burstiness without lagging a
/// whole transfer behind.
#[derive(Debug)]
pub struct SpeedTracker {
    samples: std::collections::VecDeque<(Instant, u64)>,
    window: Duration,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(10))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: std::collections::VecDeque::new(),
            window,
        }
    }

    pub fn add_position(&mut self, position: u64) {
        let now = Instant::now();
        self.samples.push_back((now, position));
        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Average speed in bytes per second, 0 until two samples exist.
    pub fn average_speed(&self) -> u64 {
        let (first, last) = match (self.samples.front(), self.samples.back()) {
            (Some(f), Some(l)) if self.samples.len() >= 2 => (f, l),
            _ => return 0,
        };
        let bytes = last.1.saturating_sub(first.1);
        let elapsed = last.0.duration_since(first.0).as_secs_f64();
        if elapsed > 0.0 {
            (bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    pub fn eta(&self, bytes_remaining: u64) -> Duration {
        match self.average_speed() {
            0 => Duration::ZERO,
            speed => Duration::from_secs_f64(bytes_remaining as f64 / speed as f64),
        }
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata subset attached to a finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: Duration,
    pub artwork_url: String,
    pub catalog_id: String,
}

/// Final artifact record returned on success.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub file_path: PathBuf,
    pub song: SongMetadata,
    pub file_size: u64,
    pub format: &'static str,
    pub elapsed: Duration,
}

/// Callback bundle the pipeline reports through. Every field is optional so
/// callers wire only what they need.
#[derive(Clone, Default)]
pub struct ProgressCallbacks {
    pub on_progress: Option<Arc<dyn Fn(Phase, Progress) + Send + Sync>>,
    pub on_phase_change: Option<Arc<dyn Fn(Option<Phase>, Phase) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&DownloadError) + Send + Sync>>,
    pub on_complete: Option<Arc<dyn Fn(&DownloadResult) + Send + Sync>>,
}

impl ProgressCallbacks {
    pub fn progress(&self, phase: Phase, progress: Progress) {
        if let Some(cb) = &self.on_progress {
            cb(phase, progress);
        }
    }

    pub fn phase_change(&self, old: Option<Phase>, new: Phase) {
        if let Some(cb) = &self.on_phase_change {
            cb(old, new);
        }
    }

    pub fn error(&self, err: &DownloadError) {
        if let Some(cb) = &self.on_error {
            cb(err);
        }
    }

    pub fn complete(&self, result: &DownloadResult) {
        if let Some(cb) = &self.on_complete {
            cb(result);
        }
    }
}

impl fmt::Debug for ProgressCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_phase_change", &self.on_phase_change.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}
