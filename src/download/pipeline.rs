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


//! Pipeline orchestration.
//!
//! One job runs end to end through strictly sequential stages: validate the
//! URL, fetch the catalog record, resolve the ALAC variant through the
//! manifest helper, download and walk the fragmented stream, decrypt the
//! samples through the decryption helper, assemble the M4A, and embed the
//! cover. Cancellation is checked between stages and inside the streaming
//! ones; the final path only ever receives a fully written file.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::api::{CatalogClient, Song};
use crate::artwork;
use crate::config::Config;
use crate::crypto;
use crate::download::progress::{
    DownloadResult, Phase, Progress, ProgressCallbacks, SongMetadata, SpeedTracker,
};
use crate::error::{DownloadError, ErrorKind, Result};
use crate::hls;
use crate::mp4;

/// Snapshot of the downloader's externally visible state.
#[derive(Debug, Clone)]
pub struct DownloadStatus {
    pub phase: Phase,
    pub progress: Progress,
    pub song_name: String,
    pub started: Option<Instant>,
    pub is_active: bool,
    pub error: Option<String>,
}

impl Default for DownloadStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Validating,
            progress: Progress::default(),
            song_name: String::new(),
            started: None,
            is_active: false,
            error: None,
        }
    }
}

struct State {
    status: DownloadStatus,
    cancel: Option<CancellationToken>,
}

/// The song acquisition pipeline. One instance serves one job at a time; the
/// queue serializes access.
pub struct SongDownloader {
    manifest_helper_addr: String,
    decryptor_addr: String,
    download_dir: PathBuf,
    http: reqwest::Client,
    catalog: CatalogClient,
    forbidden: Regex,
    state: Mutex<State>,
}

impl SongDownloader {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| DownloadError::unknown("failed to build HTTP client").caused_by(err))?;
        let catalog = CatalogClient::new(http.clone());
        Ok(Self {
            manifest_helper_addr: config.manifest_helper_addr.clone(),
            decryptor_addr: config.decryptor_addr.clone(),
            download_dir: config.download_dir.clone(),
            http,
            catalog,
            forbidden: Regex::new(r#"[\\/<>:"|?*]"#)
                .map_err(|err| DownloadError::unknown("invalid filename pattern").caused_by(err))?,
            state: Mutex::new(State {
                status: DownloadStatus::default(),
                cancel: None,
            }),
        })
    }

    /// Swap the catalog client, e.g. for stub endpoints.
    pub fn with_catalog_client(mut self, catalog: CatalogClient) -> Self {
        self.catalog = catalog;
        self
    }

    /// Run one download end to end.
    ///
    /// Rejects a second call while a job is active; the queue is the only
    /// intended caller.
    pub async fn download(
        &self,
        cancel: CancellationToken,
        url: &str,
        callbacks: &ProgressCallbacks,
    ) -> Result<DownloadResult> {
        self.begin(cancel.clone())?;
        let result = self.run(cancel, url, callbacks).await;
        self.finish(&result);
        result
    }

    /// Cancel the active job, if any.
    pub fn cancel(&self) -> Result<()> {
        let state = self.lock_state();
        match &state.cancel {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(DownloadError::unknown("no active download to cancel")),
        }
    }

    pub fn status(&self) -> DownloadStatus {
        self.lock_state().status.clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, cancel: CancellationToken) -> Result<()> {
        let mut state = self.lock_state();
        if state.status.is_active {
            return Err(DownloadError::unknown("download already in progress"));
        }
        state.status = DownloadStatus {
            phase: Phase::Validating,
            started: Some(Instant::now()),
            is_active: true,
            ..DownloadStatus::default()
        };
        state.cancel = Some(cancel);
        Ok(())
    }

    fn finish(&self, result: &Result<DownloadResult>) {
        let mut state = self.lock_state();
        state.status.is_active = false;
        state.cancel = None;
        if let Err(err) = result {
            state.status.error = Some(err.to_string());
        }
    }

    fn set_phase(&self, new: Phase, callbacks: &ProgressCallbacks) {
        let old = {
            let mut state = self.lock_state();
            let old = state.status.phase;
            state.status.phase = new;
            old
        };
        if old != new {
            callbacks.phase_change(Some(old), new);
        }
    }

    fn record_progress(&self, progress: Progress) {
        self.lock_state().status.progress = progress;
    }

    fn fail(&self, callbacks: &ProgressCallbacks, err: DownloadError) -> DownloadError {
        {
            let mut state = self.lock_state();
            state.status.phase = Phase::Error;
            state.status.error = Some(err.to_string());
        }
        callbacks.error(&err);
        err
    }

    /// Wrap a stage failure with the stage's kind and message, letting
    /// cancellation pass through untouched.
    fn stage_error(kind: ErrorKind, message: &str, cause: DownloadError) -> DownloadError {
        if cause.is_kind(ErrorKind::Cancelled) {
            return cause;
        }
        DownloadError::new(kind, message).caused_by(cause)
    }

    fn sanitize(&self, name: &str) -> String {
        self.forbidden.replace_all(name, "_").into_owned()
    }

    fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(DownloadError::cancelled("download cancelled"))
        } else {
            Ok(())
        }
    }

    fn song_metadata(song: &Song) -> SongMetadata {
        SongMetadata {
            title: song.attributes.name.clone(),
            artist: song.attributes.artist_name.clone(),
            album: song.attributes.album_name.clone(),
            duration: std::time::Duration::from_millis(song.attributes.duration_in_millis),
            artwork_url: song.attributes.artwork.url.clone(),
            catalog_id: song.id.clone(),
        }
    }

    async fn run(
        &self,
        cancel: CancellationToken,
        url: &str,
        callbacks: &ProgressCallbacks,
    ) -> Result<DownloadResult> {
        let started = Instant::now();
        self.set_phase(Phase::Validating, callbacks);

        let url_meta = crate::api::parse_url_meta(url).map_err(|err| {
            self.fail(
                callbacks,
                Self::stage_error(ErrorKind::InvalidUrl, "failed to extract URL metadata", err),
            )
        })?;

        Self::check_cancelled(&cancel).map_err(|err| self.fail(callbacks, err))?;

        let token = self.catalog.fetch_token().await.map_err(|err| {
            self.fail(
                callbacks,
                Self::stage_error(
                    ErrorKind::NetworkFailure,
                    "failed to get authentication token",
                    err,
                ),
            )
        })?;

        let song = self
            .catalog
            .fetch_song(&url_meta, &token)
            .await
            .map_err(|err| {
                self.fail(
                    callbacks,
                    Self::stage_error(ErrorKind::NetworkFailure, "failed to get song metadata", err),
                )
            })?;

        let mut enhanced_hls = match song.attributes.enhanced_hls() {
            Some(url) => url.to_string(),
            None => {
                return Err(self.fail(
                    callbacks,
                    DownloadError::alac_not_available("ALAC format not available for this song")
                        .with_context("song_id", song.id.clone()),
                ))
            }
        };

        let refreshed = hls::request_playlist_url(&self.manifest_helper_addr, &song.id)
            .await
            .map_err(|err| {
                self.fail(
                    callbacks,
                    Self::stage_error(
                        ErrorKind::NetworkFailure,
                        "failed to get enhanced HLS URL",
                        err,
                    ),
                )
            })?;
        if refreshed.ends_with("m3u8") {
            enhanced_hls = refreshed;
        }

        let song_name = format!(
            "{}.m4a",
            self.sanitize(&format!(
                "{} - {}",
                song.attributes.name, song.attributes.artist_name
            ))
        );
        self.lock_state().status.song_name = song_name.clone();

        // A finished file short-circuits the whole pipeline.
        let file_path = self.download_dir.join(&song_name);
        if let Ok(existing) = tokio::fs::metadata(&file_path).await {
            tracing::info!(path = %file_path.display(), "song already downloaded");
            let result = DownloadResult {
                file_path,
                song: Self::song_metadata(&song),
                file_size: existing.len(),
                format: "m4a",
                elapsed: started.elapsed(),
            };
            self.set_phase(Phase::Complete, callbacks);
            callbacks.complete(&result);
            return Ok(result);
        }

        let master_body = self.fetch_master(&enhanced_hls).await.map_err(|err| {
            self.fail(
                callbacks,
                Self::stage_error(
                    ErrorKind::NetworkFailure,
                    "failed to extract media information",
                    err,
                ),
            )
        })?;
        let selection = hls::select_variant(&enhanced_hls, &master_body).map_err(|err| {
            self.fail(
                callbacks,
                Self::stage_error(
                    ErrorKind::NetworkFailure,
                    "failed to extract media information",
                    err,
                ),
            )
        })?;

        Self::check_cancelled(&cancel).map_err(|err| self.fail(callbacks, err))?;
        self.set_phase(Phase::Downloading, callbacks);

        let mut download_speed = SpeedTracker::new();
        let assets = mp4::fetch_fragmented(&self.http, &selection.media_url, &cancel, |done, total| {
            let mut progress = Progress::from_counts(done, total);
            download_speed.add_position(done);
            progress.speed = download_speed.average_speed();
            progress.eta = download_speed.eta(total.saturating_sub(done));
            self.record_progress(progress);
            callbacks.progress(Phase::Downloading, progress);
        })
        .await
        .map_err(|err| {
            self.fail(
                callbacks,
                Self::stage_error(
                    ErrorKind::NetworkFailure,
                    "failed to download song data",
                    err,
                ),
            )
        })?;

        // Every sample must resolve to a key before anything crosses the
        // decryptor's wire.
        if assets
            .samples
            .iter()
            .any(|s| s.desc_index as usize >= selection.keys.len())
        {
            return Err(self.fail(
                callbacks,
                DownloadError::decryption("decryption size mismatch")
                    .with_context("song_id", song.id.clone()),
            ));
        }

        Self::check_cancelled(&cancel).map_err(|err| self.fail(callbacks, err))?;
        self.set_phase(Phase::Decrypting, callbacks);

        let mut decrypt_speed = SpeedTracker::new();
        let plaintext = crypto::decrypt_samples(
            &self.decryptor_addr,
            &song.id,
            &assets.samples,
            &selection.keys,
            &cancel,
            |done, total| {
                let mut progress = Progress::from_counts(done, total);
                decrypt_speed.add_position(done);
                progress.speed = decrypt_speed.average_speed();
                progress.eta = decrypt_speed.eta(total.saturating_sub(done));
                self.record_progress(progress);
                callbacks.progress(Phase::Decrypting, progress);
            },
        )
        .await
        .map_err(|err| {
            self.fail(
                callbacks,
                Self::stage_error(
                    ErrorKind::DecryptionFailure,
                    "failed to decrypt song",
                    err,
                ),
            )
        })?;

        Self::check_cancelled(&cancel).map_err(|err| self.fail(callbacks, err))?;
        self.set_phase(Phase::Writing, callbacks);

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|err| {
                self.fail(
                    callbacks,
                    DownloadError::filesystem("failed to create downloads directory")
                        .caused_by(err),
                )
            })?;

        let m4a = mp4::write_m4a(&song, &assets, &plaintext).map_err(|err| {
            self.fail(
                callbacks,
                Self::stage_error(ErrorKind::FileSystem, "failed to write M4A file", err),
            )
        })?;

        // Stage through a sibling temp file so the final path never holds a
        // partial write, then rename into place.
        let part_path = self.download_dir.join(format!("{song_name}.part"));
        let write_result = async {
            tokio::fs::write(&part_path, &m4a).await?;
            Self::check_cancelled(&cancel)
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::Interrupted, "cancelled"))?;
            tokio::fs::rename(&part_path, &file_path).await
        }
        .await;
        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&part_path).await;
            let failure = if err.kind() == std::io::ErrorKind::Interrupted {
                DownloadError::cancelled("download cancelled")
            } else {
                DownloadError::filesystem("failed to write output file").caused_by(err)
            };
            return Err(self.fail(callbacks, failure));
        }

        // Artwork problems are logged, never fatal.
        if let Err(err) =
            artwork::embed_artwork(&self.http, &file_path, &song.attributes.artwork).await
        {
            tracing::warn!(%err, path = %file_path.display(), "failed to embed artwork");
        }

        let file_size = tokio::fs::metadata(&file_path)
            .await
            .map(|m| m.len())
            .map_err(|err| {
                self.fail(
                    callbacks,
                    DownloadError::filesystem("failed to stat output file").caused_by(err),
                )
            })?;

        let result = DownloadResult {
            file_path,
            song: Self::song_metadata(&song),
            file_size,
            format: "m4a",
            elapsed: started.elapsed(),
        };

        self.set_phase(Phase::Complete, callbacks);
        callbacks.complete(&result);
        Ok(result)
    }

    async fn fetch_master(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await.map_err(DownloadError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::network(format!(
                "master playlist request failed: {status}"
            )));
        }
        response
            .text()
            .await
            .map_err(|err| DownloadError::network("failed to read master playlist").caused_by(err))
    }
}
