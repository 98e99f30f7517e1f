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


//! Environment configuration.
//!
//! All configuration comes from environment variables (with `.env` support
//! for development). The result is a single immutable struct threaded through
//! constructors; configuration errors at startup are fatal.

use std::fmt;
use std::path::PathBuf;

use crate::error::{DownloadError, Result};

/// Required variables, validated together so an operator sees every missing
/// one at once.
const REQUIRED_VARS: [&str; 3] = ["BOT_TOKEN", "API_ID", "API_HASH"];

const DEFAULT_MANIFEST_HELPER: &str = "127.0.0.1:20020";
const DEFAULT_DECRYPTOR: &str = "127.0.0.1:10020";
const DEFAULT_DOWNLOAD_DIR: &str = "downloads";

/// Log verbosity accepted by `LOG_LEVEL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARN" => Some(Self::Warn),
            "ERROR" => Some(Self::Error),
            "FATAL" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Directive for the tracing env-filter. FATAL has no tracing
    /// counterpart; it maps to error-only output.
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error | Self::Fatal => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        };
        f.write_str(s)
    }
}

/// Immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Chat bot token (consumed by the out-of-tree front-end).
    pub bot_token: String,
    /// Chat framework API id.
    pub api_id: i64,
    /// Chat framework API hash.
    pub api_hash: String,
    /// Log verbosity, default INFO.
    pub log_level: LogLevel,
    /// Address of the manifest helper (`M3U8_URL`).
    pub manifest_helper_addr: String,
    /// Address of the decryption helper (`DEC_URL`).
    pub decryptor_addr: String,
    /// Directory that finished files land in.
    pub download_dir: PathBuf,
}

impl Config {
    /// Load and validate configuration from the process environment.
    ///
    /// A missing `.env` file is fine; missing required variables, a
    /// non-positive `API_ID`, or an unknown `LOG_LEVEL` are not.
    pub fn from_env() -> Result<Self> {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                tracing::warn!(%err, ".env file could not be loaded");
            }
        }

        let missing: Vec<&str> = REQUIRED_VARS
            .iter()
            .copied()
            .filter(|name| env_var(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(DownloadError::unknown(format!(
                "missing required environment variables: {missing:?}"
            )));
        }

        let bot_token = env_var("BOT_TOKEN").unwrap_or_default();
        let api_hash = env_var("API_HASH").unwrap_or_default();

        let api_id_raw = env_var("API_ID").unwrap_or_default();
        let api_id: i64 = api_id_raw.parse().map_err(|_| {
            DownloadError::unknown(format!(
                "API_ID must be a valid integer, got: {api_id_raw}"
            ))
        })?;
        if api_id <= 0 {
            return Err(DownloadError::unknown(format!(
                "API_ID must be a positive integer, got: {api_id}"
            )));
        }

        let log_level = match env_var("LOG_LEVEL") {
            None => LogLevel::Info,
            Some(raw) => LogLevel::parse(&raw).ok_or_else(|| {
                DownloadError::unknown(format!(
                    "invalid log level: {raw}. Valid levels are: DEBUG, INFO, WARN, ERROR, FATAL"
                ))
            })?,
        };

        Ok(Self {
            bot_token,
            api_id,
            api_hash,
            log_level,
            manifest_helper_addr: env_var("M3U8_URL")
                .unwrap_or_else(|| DEFAULT_MANIFEST_HELPER.to_string()),
            decryptor_addr: env_var("DEC_URL").unwrap_or_else(|| DEFAULT_DECRYPTOR.to_string()),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}
