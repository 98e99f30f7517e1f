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


//! Pipeline error type.
//!
//! Every failure the pipeline can report falls into one of eight kinds, and
//! each error carries a human-readable message, an optional cause, and a
//! context map (song id, url, stage, ...). The queue drainer, the progress
//! reporter, and the chat layer all consume the same type.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, DownloadError>;

/// Category of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input could not be classified as an Apple Music catalog URL.
    InvalidUrl,
    /// An HTTP request, TCP dialogue, or stream parse failed.
    NetworkFailure,
    /// The decryption helper dialogue broke or returned malformed output.
    DecryptionFailure,
    /// Creating, writing, or inspecting local files failed.
    FileSystem,
    /// The catalog record has no enhanced-HLS (lossless) asset.
    AlacNotAvailable,
    /// An operation exceeded its deadline.
    Timeout,
    /// The job's cancellation token fired.
    Cancelled,
    /// Anything that does not fit the categories above.
    Unknown,
}

impl ErrorKind {
    /// Stable snake_case name used in logs and serialized contexts.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::NetworkFailure => "network_failure",
            ErrorKind::DecryptionFailure => "decryption_failure",
            ErrorKind::FileSystem => "filesystem_error",
            ErrorKind::AlacNotAvailable => "alac_not_available",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured failure from any pipeline stage.
#[derive(Error, Debug)]
#[error("{}: {message}", .kind.as_str())]
pub struct DownloadError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Underlying error, when one exists.
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Free-form context (song id, url, stage name, correlation id).
    pub context: HashMap<String, String>,
    /// Whether a retry of the same operation could plausibly succeed.
    pub transient: bool,
}

impl DownloadError {
    /// Create an error with a kind and message, no cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            context: HashMap::new(),
            transient: false,
        }
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidUrl, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkFailure, message)
    }

    pub fn decryption(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DecryptionFailure, message)
    }

    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileSystem, message)
    }

    pub fn alac_not_available(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlacNotAvailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message).transient(true)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    /// Attach an underlying cause.
    pub fn caused_by(
        mut self,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attach a context key/value pair.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Mark (or unmark) the error as transient.
    pub fn transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    /// Whether this error is of the given kind.
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Whether a bounded retry is worthwhile.
    ///
    /// Only connection-level transients and timeouts qualify; everything else
    /// fails the same way on a second attempt.
    pub fn is_retryable(&self) -> bool {
        self.transient || self.kind == ErrorKind::Timeout
    }

    /// Map an I/O error from a helper dial into a network error, flagging the
    /// transient connection failures (refused, reset, timed out) that the
    /// retry wrapper is allowed to retry.
    pub fn from_dial(message: impl Into<String>, err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let transient = matches!(
            err.kind(),
            Io::ConnectionRefused | Io::ConnectionReset | Io::ConnectionAborted | Io::TimedOut
        );
        Self::network(message).caused_by(err).transient(transient)
    }

    /// Short, emoji-prefixed message suitable for the chat surface.
    ///
    /// The internal correlation id (first 8 chars) is appended so users can
    /// quote it back for support.
    pub fn user_message(&self, correlation_id: &str) -> String {
        let lowered = format!("{} {}", self.message, self.kind.as_str()).to_lowercase();

        let body = if self.kind == ErrorKind::InvalidUrl {
            "Please provide a valid Apple Music URL.".to_string()
        } else if lowered.contains("timeout") || self.kind == ErrorKind::Timeout {
            "⏱️ The request took too long to process. Please try again.".to_string()
        } else if lowered.contains("rate limit") || lowered.contains("too many") {
            "🚦 I'm receiving too many requests right now. Please wait a moment and try again."
                .to_string()
        } else if lowered.contains("permission") || lowered.contains("forbidden") {
            "🔒 I don't have permission to perform this action.".to_string()
        } else if lowered.contains("not found") {
            "🔍 The requested resource was not found. Please check your command and try again."
                .to_string()
        } else if lowered.contains("network") || lowered.contains("connection") {
            "🌐 I'm having trouble reaching the upstream servers. Please try again in a moment."
                .to_string()
        } else {
            "❌ Something went wrong while processing your request. Please try again.".to_string()
        };

        if correlation_id.len() >= 8 {
            format!("{body}\n\n🔧 Error ID: {}", &correlation_id[..8])
        } else {
            body
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DownloadError::timeout("HTTP request timed out").caused_by(err)
        } else {
            let transient = err.is_connect();
            DownloadError::network(format!("HTTP request failed: {err}"))
                .caused_by(err)
                .transient(transient)
        }
    }
}

/// Generate a correlation id: 16 lowercase hex chars, of which the first 8
/// are shown to users.
pub fn correlation_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect()
}
