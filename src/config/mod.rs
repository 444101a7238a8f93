//! # Configuration Management Module
//!
//! Volley reads a single TOML file. Every section and field has a default, so an empty
//! file (or no file at all) yields a working bot that talks to a bridge on
//! `127.0.0.1:5000` and monitors channel 1.
//!
//! ## Configuration Structure
//!
//! - [`BotConfig`] - Monitored channel, trigger words, preferred relay, reply texts
//! - [`MeshConfig`] - Bridge address and command timeouts
//! - [`RateLimitConfig`] - Sliding window per sender
//! - [`GeoConfig`] - Location of the postal code database
//! - [`WatchdogConfig`] - Connection poll interval
//! - [`LoggingConfig`] - Log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use volley::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("Bridge: {}", config.mesh.tcp);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [bot]
//! channel = 1
//! preferred_relay = "a1"
//!
//! [mesh]
//! tcp = "127.0.0.1:5000"
//!
//! [rate_limit]
//! max_requests = 3
//! window_seconds = 360
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::bot::classify::{DEFAULT_INFO_WORDS, DEFAULT_TRIGGER_WORDS};
use crate::bot::telemetry::NodeHash;
use crate::mesh::bridge::validate_address;

pub const DEFAULT_INFO_REPLY: &str =
    "Volley ping bot. Send: ping, zipcode (22767), or prefix (040).";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Group channel index to answer on.
    pub channel: u8,
    /// Public key prefix of a relay to highlight with `via:` when it appears in a route.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_relay: Option<String>,
    pub trigger_words: Vec<String>,
    pub info_words: Vec<String>,
    pub info_reply: String,
    /// Log a stats line after every N delivered pongs. 0 disables it.
    pub stats_every: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            preferred_relay: None,
            trigger_words: DEFAULT_TRIGGER_WORDS.iter().map(|w| w.to_string()).collect(),
            info_words: DEFAULT_INFO_WORDS.iter().map(|w| w.to_string()).collect(),
            info_reply: DEFAULT_INFO_REPLY.to_string(),
            stats_every: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Bridge address as `HOST:PORT`.
    pub tcp: String,
    pub reply_timeout_secs: u64,
    pub reconnect_max_backoff_secs: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            tcp: "127.0.0.1:5000".to_string(),
            reply_timeout_secs: 10,
            reconnect_max_backoff_secs: 30,
        }
    }
}

impl MeshConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn reconnect_max_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 3,
            window_seconds: 360,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// sled directory built by `volley import-geo`.
    pub db_path: String,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            db_path: "data/geo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub poll_interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

impl WatchdogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject values the bot cannot run with.
    pub fn validate(&self) -> Result<()> {
        validate_address(&self.mesh.tcp).map_err(|e| anyhow!("[mesh] tcp: {}", e))?;
        if self.rate_limit.max_requests == 0 {
            return Err(anyhow!("[rate_limit] max_requests must be at least 1"));
        }
        if self.rate_limit.window_seconds == 0 {
            return Err(anyhow!("[rate_limit] window_seconds must be at least 1"));
        }
        if self.watchdog.poll_interval_secs == 0 {
            return Err(anyhow!("[watchdog] poll_interval_secs must be at least 1"));
        }
        if self.mesh.reply_timeout_secs == 0 {
            return Err(anyhow!("[mesh] reply_timeout_secs must be at least 1"));
        }
        if let Some(relay) = &self.bot.preferred_relay {
            let relay = relay.trim();
            if relay.len() < 2 || !relay.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(anyhow!(
                    "[bot] preferred_relay '{}' is not a hex key prefix",
                    relay
                ));
            }
        }
        Ok(())
    }

    /// Route node hash of the configured preferred relay.
    pub fn preferred_relay_hash(&self) -> Option<NodeHash> {
        self.bot
            .preferred_relay
            .as_deref()
            .and_then(NodeHash::from_key_prefix)
    }
}
