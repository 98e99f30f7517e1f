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


//! Bounded single-consumer request queue.
//!
//! Submissions come from many chat handlers concurrently; exactly one
//! drainer task takes jobs in FIFO order and runs them through the handler
//! one at a time, so completion order equals submission order. Capacity is
//! seven, duplicates (same sender/chat/message) are rejected outright, and
//! the drainer sleeps briefly between jobs to stay polite to the helpers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::download::progress::DownloadResult;
use crate::error::{correlation_id, DownloadError, Result};

/// Hard queue capacity.
pub const MAX_QUEUE_SIZE: usize = 7;

/// Lifecycle of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending or active pipeline job.
#[derive(Debug, Clone)]
pub struct QueueRequest {
    /// `sender:chat:message`, the duplicate-rejection key.
    pub key: String,
    pub sender_id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub url: String,
    pub request_time: Instant,
    pub status: QueueStatus,
}

/// Build the duplicate-rejection key for a submission.
pub fn request_key(sender_id: i64, chat_id: i64, message_id: i64) -> String {
    format!("{sender_id}:{chat_id}:{message_id}")
}

/// Executes one queued request. The song handler in front of the pipeline
/// implements this; tests plug in doubles.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn process(&self, request: &QueueRequest) -> Result<DownloadResult>;
}

/// Queue tunables.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    /// Pause between jobs; keeps the helpers from being hammered
    /// back to back.
    pub job_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_QUEUE_SIZE,
            job_delay: Duration::from_secs(1),
        }
    }
}

struct QueueState {
    pending: VecDeque<QueueRequest>,
    processing: Option<QueueRequest>,
}

/// Bounded FIFO with a single background drainer.
pub struct RequestQueue {
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
    state: Mutex<QueueState>,
    draining: AtomicBool,
}

impl RequestQueue {
    pub fn new(handler: Arc<dyn JobHandler>) -> Arc<Self> {
        Self::with_config(handler, QueueConfig::default())
    }

    pub fn with_config(handler: Arc<dyn JobHandler>, config: QueueConfig) -> Arc<Self> {
        Arc::new(Self {
            handler,
            config,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                processing: None,
            }),
            draining: AtomicBool::new(false),
        })
    }

    /// Submit a request. Returns its 1-based queue position.
    ///
    /// # Errors
    /// When the queue is at capacity or the key is already queued.
    pub fn submit(
        self: &Arc<Self>,
        sender_id: i64,
        chat_id: i64,
        message_id: i64,
        url: impl Into<String>,
    ) -> Result<usize> {
        let key = request_key(sender_id, chat_id, message_id);
        let position = {
            let mut state = self.lock_state();
            if state.pending.len() >= self.config.capacity {
                return Err(DownloadError::unknown(format!(
                    "queue is full (max {} requests)",
                    self.config.capacity
                )));
            }
            if state.pending.iter().any(|r| r.key == key) {
                return Err(DownloadError::unknown(format!(
                    "request with ID {key} already exists"
                )));
            }

            state.pending.push_back(QueueRequest {
                key: key.clone(),
                sender_id,
                chat_id,
                message_id,
                url: url.into(),
                request_time: Instant::now(),
                status: QueueStatus::Queued,
            });
            state.pending.len()
        };

        tracing::info!(%key, position, "request queued");
        self.ensure_drainer();
        Ok(position)
    }

    /// Number of requests waiting (the active one excluded).
    pub fn size(&self) -> usize {
        self.lock_state().pending.len()
    }

    /// The request currently being processed, if any.
    pub fn processing(&self) -> Option<QueueRequest> {
        self.lock_state().processing.clone()
    }

    /// 1-based position of a queued key; `None` when it is not waiting.
    pub fn position_of(&self, key: &str) -> Option<usize> {
        self.lock_state()
            .pending
            .iter()
            .position(|r| r.key == key)
            .map(|i| i + 1)
    }

    /// Human-readable queue summary for the status command.
    pub fn status_summary(&self) -> String {
        let state = self.lock_state();
        let mut out = format!(
            "📊 Queue: {}/{}\n",
            state.pending.len(),
            self.config.capacity
        );
        match &state.processing {
            Some(request) => out.push_str(&format!("• Processing: {}\n", request.key)),
            None => out.push_str("• Processing: none\n"),
        }
        for (i, request) in state.pending.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, request.key));
        }
        out
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the drainer if it is not already running. Idempotent; the CAS
    /// guarantees a single task.
    fn ensure_drainer(self: &Arc<Self>) {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.drain().await;
        });
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let request = {
                let mut state = self.lock_state();
                match state.pending.pop_front() {
                    Some(request) => {
                        let mut active = request.clone();
                        active.status = QueueStatus::Processing;
                        state.processing = Some(active.clone());
                        active
                    }
                    None => {
                        state.processing = None;
                        self.draining.store(false, Ordering::Release);
                        tracing::debug!("queue drained");
                        return;
                    }
                }
            };

            tracing::info!(key = %request.key, url = %request.url, "processing request");

            // Run the job in its own task so a panic inside a handler is
            // contained and recorded, not fatal to the drainer.
            let handler = Arc::clone(&self.handler);
            let job = request.clone();
            let outcome =
                tokio::spawn(async move { handler.process(&job).await }).await;

            let final_status = match outcome {
                Ok(Ok(result)) => {
                    tracing::info!(
                        key = %request.key,
                        path = %result.file_path.display(),
                        "request completed"
                    );
                    QueueStatus::Completed
                }
                Ok(Err(err)) => {
                    tracing::warn!(key = %request.key, %err, "request failed");
                    QueueStatus::Failed
                }
                Err(join_err) => {
                    let correlation = correlation_id();
                    tracing::error!(
                        key = %request.key,
                        correlation = %&correlation[..8],
                        panicked = join_err.is_panic(),
                        "request handler aborted"
                    );
                    QueueStatus::Failed
                }
            };
            tracing::debug!(key = %request.key, status = %final_status, "request settled");

            {
                let mut state = self.lock_state();
                state.processing = None;
            }

            tokio::time::sleep(self.config.job_delay).await;
        }
    }
}
