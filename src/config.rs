//! Configuration loading.
//!
//! Loads delivery settings from `./config.toml` (or
//! `$CHAT_DELIVERY_CONFIG_PATH`). Environment variables override file
//! values; file values override defaults. A missing file is not an error —
//! defaults apply.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::types::{BETWEEN_CHUNK_TIMEOUT_MS, SEND_MESSAGE_TIMEOUT_MS};

/// Top-level delivery configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Send race timing.
    pub send: SendConfig,
    /// Transport channel settings.
    pub channel: ChannelConfig,
}

/// Send race timing (`[send]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SendConfig {
    /// Overall send timeout in milliseconds.
    pub send_timeout_ms: u64,
    /// Allowed gap between streamed reply chunks in milliseconds.
    pub between_chunk_timeout_ms: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: SEND_MESSAGE_TIMEOUT_MS,
            between_chunk_timeout_ms: BETWEEN_CHUNK_TIMEOUT_MS,
        }
    }
}

/// Transport channel settings (`[channel]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Chat endpoint the payload is posted to.
    pub endpoint: String,
    /// Connection setup timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/chat".to_owned(),
            request_timeout_ms: 10_000,
        }
    }
}

impl ChatConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Resolved send timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send.send_timeout_ms)
    }

    /// Resolved between-chunk timeout.
    pub fn between_chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.send.between_chunk_timeout_ms)
    }

    /// Resolved connection setup timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.channel.request_timeout_ms)
    }

    /// Load configuration from a specific TOML file. A missing file yields
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(ChatConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        Self::load_from(&path)
    }

    /// Resolve config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        match env("CHAT_DELIVERY_CONFIG_PATH") {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("config.toml"),
        }
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability. Invalid values are logged
    /// and ignored.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("CHAT_SEND_TIMEOUT_MS") {
            match v.parse() {
                Ok(n) => self.send.send_timeout_ms = n,
                Err(_) => tracing::warn!(
                    var = "CHAT_SEND_TIMEOUT_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("CHAT_BETWEEN_CHUNK_TIMEOUT_MS") {
            match v.parse() {
                Ok(n) => self.send.between_chunk_timeout_ms = n,
                Err(_) => tracing::warn!(
                    var = "CHAT_BETWEEN_CHUNK_TIMEOUT_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("CHAT_CHANNEL_ENDPOINT") {
            self.channel.endpoint = v;
        }
        if let Some(v) = env("CHAT_CHANNEL_REQUEST_TIMEOUT_MS") {
            match v.parse() {
                Ok(n) => self.channel.request_timeout_ms = n,
                Err(_) => tracing::warn!(
                    var = "CHAT_CHANNEL_REQUEST_TIMEOUT_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Parse a configuration from a TOML string (for testing and embedding).
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML does not match the schema.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }
}
