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


//! Progress rendering into a chat surface.
//!
//! The chat framework itself lives outside this crate; it plugs in through
//! [`ChatApi`]. The reporter owns one status message per tracked job and
//! edits it in place. Chat sends run under a 5 second timeout so a slow
//! transport can never wedge the pipeline.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::download::progress::{Phase, Progress};
use crate::error::{correlation_id, DownloadError, Result};

/// Per-send deadline for the chat transport.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Thin seam over the chat framework: send one message, edit one message.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send a message, returning its id for later edits.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64>;
    /// Replace the text of an earlier message.
    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()>;
}

/// Reporting surface the tracker drives.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn start_tracking(&self, chat_id: i64, song_name: &str) -> Result<()>;
    async fn update_progress(&self, phase: Phase, progress: Progress) -> Result<()>;
    async fn report_phase_change(&self, old: Option<Phase>, new: Phase) -> Result<()>;
    async fn report_error(&self, err: &DownloadError) -> Result<()>;
    async fn report_complete(&self, elapsed: Duration, path: &Path) -> Result<()>;
    async fn stop(&self);
}

#[derive(Debug, Default)]
struct ReporterState {
    chat_id: i64,
    message_id: Option<i64>,
    song_name: String,
    started: Option<Instant>,
    active: bool,
}

/// [`ProgressReporter`] that renders into one chat message.
pub struct ChatProgressReporter<A> {
    api: A,
    state: RwLock<ReporterState>,
}

impl<A: ChatApi> ChatProgressReporter<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            state: RwLock::new(ReporterState::default()),
        }
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<i64> {
        tokio::time::timeout(SEND_TIMEOUT, self.api.send_message(chat_id, text))
            .await
            .map_err(|_| DownloadError::timeout("chat send timed out"))?
    }

    async fn edit(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        tokio::time::timeout(SEND_TIMEOUT, self.api.edit_message(chat_id, message_id, text))
            .await
            .map_err(|_| DownloadError::timeout("chat edit timed out"))?
    }

    fn format_progress(song_name: &str, phase: Phase, progress: &Progress, started: Instant) -> String {
        let elapsed = started.elapsed().as_secs();
        if progress.total_bytes > 0 {
            format!(
                "🎵 **{song_name}**\n\n{} {}\n{:.1}% ({} / {}) · {} · ETA {}\n\n⏱️ Elapsed: {elapsed}s",
                phase.emoji(),
                phase.description(),
                progress.percentage,
                Progress::bytes_string(progress.bytes_processed),
                Progress::bytes_string(progress.total_bytes),
                progress.speed_string(),
                progress.eta_string(),
            )
        } else {
            format!(
                "🎵 **{song_name}**\n\n{} {}\n\n⏱️ Elapsed: {elapsed}s",
                phase.emoji(),
                phase.description(),
            )
        }
    }
}

#[async_trait]
impl<A: ChatApi> ProgressReporter for ChatProgressReporter<A> {
    async fn start_tracking(&self, chat_id: i64, song_name: &str) -> Result<()> {
        {
            let state = self.state.read().await;
            if state.active {
                return Err(DownloadError::unknown("progress tracking is already active"));
            }
        }

        let text = format!("🎵 **{song_name}**\n\n⏳ Initializing download...");
        let message_id = self.send(chat_id, &text).await?;

        let mut state = self.state.write().await;
        state.chat_id = chat_id;
        state.message_id = Some(message_id);
        state.song_name = song_name.to_string();
        state.started = Some(Instant::now());
        state.active = true;
        Ok(())
    }

    async fn update_progress(&self, phase: Phase, progress: Progress) -> Result<()> {
        let (chat_id, message_id, song_name, started) = {
            let state = self.state.read().await;
            match (state.active, state.message_id, state.started) {
                (true, Some(id), Some(started)) => {
                    (state.chat_id, id, state.song_name.clone(), started)
                }
                // Updates while stopped are no-ops.
                _ => return Ok(()),
            }
        };

        let text = Self::format_progress(&song_name, phase, &progress, started);
        self.edit(chat_id, message_id, &text).await
    }

    async fn report_phase_change(&self, _old: Option<Phase>, new: Phase) -> Result<()> {
        let (chat_id, message_id, song_name, started) = {
            let state = self.state.read().await;
            match (state.active, state.message_id, state.started) {
                (true, Some(id), Some(started)) => {
                    (state.chat_id, id, state.song_name.clone(), started)
                }
                _ => return Ok(()),
            }
        };

        let text = format!(
            "🎵 **{song_name}**\n\n{} {}\n\n⏱️ Elapsed: {}s",
            new.emoji(),
            new.description(),
            started.elapsed().as_secs(),
        );
        self.edit(chat_id, message_id, &text).await
    }

    async fn report_error(&self, err: &DownloadError) -> Result<()> {
        let (chat_id, message_id, song_name, started) = {
            let state = self.state.read().await;
            match (state.active, state.message_id, state.started) {
                (true, Some(id), Some(started)) => {
                    (state.chat_id, id, state.song_name.clone(), started)
                }
                _ => return Ok(()),
            }
        };

        // Users get the friendly message family plus the Error ID; the raw
        // internal error goes to the log under the same id for support.
        let correlation = correlation_id();
        tracing::error!(
            correlation = %&correlation[..8],
            %err,
            "reporting job failure to chat"
        );
        let text = format!(
            "🎵 **{song_name}**\n\n{}\n\n⏱️ Elapsed: {}s",
            err.user_message(&correlation),
            started.elapsed().as_secs(),
        );
        self.edit(chat_id, message_id, &text).await
    }

    async fn report_complete(&self, elapsed: Duration, path: &Path) -> Result<()> {
        let (chat_id, message_id, song_name) = {
            let state = self.state.read().await;
            match (state.active, state.message_id) {
                (true, Some(id)) => (state.chat_id, id, state.song_name.clone()),
                _ => return Ok(()),
            }
        };

        let text = format!(
            "🎵 **{song_name}**\n\n✅ **Download Complete!**\n\n⏱️ Total time: {}s\n📁 {}",
            elapsed.as_secs(),
            path.display(),
        );
        self.edit(chat_id, message_id, &text).await
    }

    async fn stop(&self) {
        let mut state = self.state.write().await;
        state.active = false;
        state.message_id = None;
        state.started = None;
    }
}
