//! Configuration loading.
//!
//! Loads `backchannel.toml` (or `$BACKCHANNEL_CONFIG_PATH`). Environment
//! variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::queue::QueueConfig;
use crate::transport::MezonConfig;

/// Top-level bot configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Delivery queue settings (`[queue]`).
    pub queue: QueueConfig,
    /// Chat-platform connection settings (`[transport]`).
    pub transport: MezonConfig,
    /// Database settings (`[database]`).
    pub database: DatabaseConfig,
    /// Channel routing (`[channels]`).
    pub channels: ChannelsConfig,
    /// Log output settings (`[logging]`).
    pub logging: LoggingConfig,
}

/// Where the bot keeps its SQLite database.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the database file.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "backchannel.db".to_owned(),
        }
    }
}

/// Channels the bot posts to.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Channel where approved confessions are posted.
    pub confession_channel_id: String,
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rotated JSON log files.
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "logs".to_owned(),
        }
    }
}

impl BotConfig {
    /// Load configuration with precedence: env vars > TOML file >
    /// defaults. A missing config file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: Self =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Config file path: `$BACKCHANNEL_CONFIG_PATH` or
    /// `./backchannel.toml` in the working directory.
    fn config_path() -> PathBuf {
        std::env::var("BACKCHANNEL_CONFIG_PATH")
            .map_or_else(|_| PathBuf::from("backchannel.toml"), PathBuf::from)
    }

    /// Apply environment variable overrides. Takes a resolver function
    /// so tests can inject values without touching the process
    /// environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("BACKCHANNEL_TOKEN") {
            self.transport.token = v;
        }
        if let Some(v) = env("BACKCHANNEL_API_URL") {
            self.transport.base_url = v;
        }
        if let Some(v) = env("BACKCHANNEL_DB_PATH") {
            self.database.path = v;
        }
        if let Some(v) = env("BACKCHANNEL_CONFESSION_CHANNEL") {
            self.channels.confession_channel_id = v;
        }
        if let Some(v) = env("BACKCHANNEL_MAX_CONCURRENT") {
            match v.parse() {
                Ok(n) => self.queue.max_concurrent = n,
                Err(_) => tracing::warn!(
                    var = "BACKCHANNEL_MAX_CONCURRENT",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("BACKCHANNEL_MAX_REQUEUES") {
            match v.parse() {
                Ok(n) => self.queue.max_requeues = n,
                Err(_) => tracing::warn!(
                    var = "BACKCHANNEL_MAX_REQUEUES",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }
}
