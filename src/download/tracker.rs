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


//! Throttled progress delivery.
//!
//! The pipeline can emit progress at whatever rate the network produces it;
//! the chat surface must not be edited more than roughly every two seconds.
//! A single consumer task drives the reporter: callers push (phase,
//! progress) pairs into a small bounded buffer (oldest dropped on
//! overflow), phase transitions render immediately, and a ticker renders
//! the latest snapshot otherwise. Stopping the tracker only joins the
//! consumer; the caller then sends its final completion or error render and
//! shuts the reporter down itself.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::download::progress::{Phase, Progress};
use crate::download::reporter::ProgressReporter;
use crate::error::{DownloadError, Result};

/// Render interval between periodic updates.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Buffered updates are capped here; the consumer only ever renders the
/// newest one anyway.
const BUFFER_CAPACITY: usize = 10;

struct Shared {
    buffer: Mutex<VecDeque<(Phase, Progress)>>,
    notify: Notify,
}

/// Owned consumer task plus the handle callers push updates through.
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    shared: Arc<Shared>,
    interval: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ProgressTracker {
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self::with_interval(reporter, DEFAULT_INTERVAL)
    }

    pub fn with_interval(reporter: Arc<dyn ProgressReporter>, interval: Duration) -> Self {
        Self {
            reporter,
            shared: Arc::new(Shared {
                buffer: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
            interval,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the consumer task.
    ///
    /// # Errors
    /// When the tracker is already running.
    pub fn start(&self) -> Result<()> {
        let mut slot = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return Err(DownloadError::unknown("progress tracker is already running"));
        }

        let reporter = Arc::clone(&self.reporter);
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let interval = self.interval;

        *slot = Some(tokio::spawn(async move {
            run_consumer(reporter, shared, cancel, interval).await;
        }));
        Ok(())
    }

    /// Queue a progress update. Non-blocking; drops the oldest buffered
    /// update when the buffer is full.
    pub fn update(&self, phase: Phase, progress: Progress) {
        {
            let mut buffer = self
                .shared
                .buffer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if buffer.len() >= BUFFER_CAPACITY {
                buffer.pop_front();
            }
            buffer.push_back((phase, progress));
        }
        self.shared.notify.notify_one();
    }

    /// Stop the consumer task. Safe to call twice.
    ///
    /// The reporter is left active on purpose: once the task has joined, no
    /// further periodic render can race the caller's final completion or
    /// error message. Stopping the reporter stays with whoever started the
    /// tracking session.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = {
            let mut slot = self
                .task
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            slot.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    #[cfg(test)]
    fn buffered(&self) -> Vec<(Phase, Progress)> {
        self.shared
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .copied()
            .collect()
    }
}

async fn run_consumer(
    reporter: Arc<dyn ProgressReporter>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    interval: Duration,
) {
    // First periodic render happens one full interval in; phase changes
    // render immediately regardless.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut current: Option<(Phase, Progress)> = None;
    let mut last_phase: Option<Phase> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = shared.notify.notified() => {
                loop {
                    let next = {
                        let mut buffer = shared
                            .buffer
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        buffer.pop_front()
                    };
                    let Some((phase, progress)) = next else { break };

                    if last_phase != Some(phase) {
                        if let Err(err) = reporter.report_phase_change(last_phase, phase).await {
                            tracing::warn!(%err, "phase change report failed");
                        }
                        last_phase = Some(phase);
                    }
                    current = Some((phase, progress));
                }
            }
            _ = ticker.tick() => {
                if let Some((phase, progress)) = current {
                    if let Err(err) = reporter.update_progress(phase, progress).await {
                        tracing::warn!(%err, "progress report failed");
                    }
                }
            }
        }
    }
}
