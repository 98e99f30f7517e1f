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


//! Binary driver.
//!
//! Loads configuration, initializes logging, and pushes the URLs given on
//! the command line through the queue with a console chat surface, so the
//! whole pipeline can be driven without the chat front-end attached.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use alacrity::download::{
    ChatApi, ChatProgressReporter, DownloadResult, JobHandler, ProgressCallbacks,
    ProgressReporter, ProgressTracker, QueueRequest, RequestQueue, SongDownloader,
};
use alacrity::{Config, Result};

/// Chat surface that renders into the log instead of a messaging network.
struct ConsoleChat {
    next_id: AtomicI64,
}

#[async_trait]
impl ChatApi for ConsoleChat {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::info!(chat_id, message_id = id, "\n{text}");
        Ok(id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        tracing::info!(chat_id, message_id, "\n{text}");
        Ok(())
    }
}

/// Bridges queued requests into the pipeline, one tracker per job.
struct PipelineHandler {
    downloader: Arc<SongDownloader>,
}

#[async_trait]
impl JobHandler for PipelineHandler {
    async fn process(&self, request: &QueueRequest) -> Result<DownloadResult> {
        let reporter: Arc<dyn ProgressReporter> = Arc::new(ChatProgressReporter::new(ConsoleChat {
            next_id: AtomicI64::new(1),
        }));
        reporter.start_tracking(request.chat_id, &request.url).await?;

        let tracker = Arc::new(ProgressTracker::new(Arc::clone(&reporter)));
        tracker.start()?;

        let progress_tracker = Arc::clone(&tracker);
        let phase_tracker = Arc::clone(&tracker);
        let callbacks = ProgressCallbacks {
            on_progress: Some(Arc::new(move |phase, progress| {
                progress_tracker.update(phase, progress);
            })),
            on_phase_change: Some(Arc::new(move |_, new| {
                phase_tracker.update(new, Default::default());
            })),
            ..ProgressCallbacks::default()
        };

        let cancel = CancellationToken::new();
        let result = self
            .downloader
            .download(cancel, &request.url, &callbacks)
            .await;

        tracker.stop().await;
        match &result {
            Ok(done) => {
                reporter
                    .report_complete(done.elapsed, &done.file_path)
                    .await?;
            }
            Err(err) => {
                let _ = reporter.report_error(err).await;
            }
        }
        reporter.stop().await;

        result
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter())),
        )
        .init();

    let urls: Vec<String> = std::env::args().skip(1).collect();
    if urls.is_empty() {
        eprintln!("usage: alacrity <apple-music-url>...");
        std::process::exit(2);
    }

    let downloader = match SongDownloader::new(&config) {
        Ok(downloader) => Arc::new(downloader),
        Err(err) => {
            eprintln!("startup error: {err}");
            std::process::exit(1);
        }
    };

    let queue = RequestQueue::new(Arc::new(PipelineHandler { downloader }));

    for (i, url) in urls.iter().enumerate() {
        match queue.submit(0, 0, i as i64, url.clone()) {
            Ok(position) => tracing::info!(%url, position, "queued"),
            Err(err) => tracing::error!(%url, %err, "rejected"),
        }
    }

    // Wait for the queue to empty, then give the drainer's inter-job pause a
    // moment to settle.
    while queue.size() > 0 || queue.processing().is_some() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
}
