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


//! Bounded exponential backoff for discrete retryable operations.
//!
//! The pipeline itself never auto-retries; this wrapper exists for the helper
//! dials, where a refused or reset connection is usually the helper
//! restarting.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Delays never grow beyond this cap.
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Run `op` up to `1 + max_retries` times, sleeping `base_delay * 2^(n-1)`
/// (capped at 30 s) before retry `n`. Only errors whose
/// [`is_retryable`](crate::error::DownloadError::is_retryable) returns true
/// are retried; everything else is returned immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < max_retries && err.is_retryable() => {
                attempt += 1;
                let exp = base_delay.saturating_mul(1 << (attempt - 1).min(16));
                let delay = exp.min(MAX_DELAY);
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
