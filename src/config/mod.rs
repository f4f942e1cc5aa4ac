//! # Configuration Management
//!
//! TOML configuration for the station: peer table, delivery/ack tuning,
//! transport parameters, stats persistence, logging, and message templates.
//!
//! ```toml
//! [station]
//! selected_peer = "yang"
//! update_interval = 60
//! ack_mode = true
//!
//! [[peers]]
//! name = "yin"
//! address = "!9e7656a8"
//!
//! [[peers]]
//! name = "yang"
//! address = "305419896"
//!
//! [transport]
//! channel = 0
//! hop_limit = 3
//!
//! [storage]
//! stats_file = "signal_stats.json"
//!
//! [logging]
//! level = "info"
//! file = "meshwx.log"
//!
//! [message_templates]
//! template1 = "{date} {time} ({online}/{total})\nT: {temp}F {snr} snr/{hops} hop\nH: {humidity}% {time_detail}"
//! ```
//!
//! Peers are an array of tables so fan-out order is exactly the order the
//! operator wrote them in. Every field has a serde default; a missing
//! section falls back whole.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::template::DEFAULT_TEMPLATE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub message_templates: HashMap<String, String>,
}

/// One configured peer. Address accepts decimal or `!hex`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Target peer when our own node is not in the peer table.
    #[serde(default)]
    pub selected_peer: String,
    /// Seconds between sensing ticks.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    /// Request acknowledgments and run the retry/confirm cycle.
    #[serde(default = "default_true")]
    pub ack_mode: bool,
    /// Seconds to wait after a batch send for immediate acks.
    #[serde(default = "default_ack_window")]
    pub ack_window: u64,
    /// Seconds from end-of-classification to the single retry.
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Send a confirmation reply back to peers that really acked.
    #[serde(default = "default_true")]
    pub confirmations: bool,
    /// Seconds from a real ack to its deferred confirmation reply.
    #[serde(default = "default_confirm_wait")]
    pub confirm_wait: u64,
    /// Seconds before an unanswered pending entry is swept.
    #[serde(default = "default_pending_max_age")]
    pub pending_max_age: u64,
    /// Minimum seconds between link reconnection attempts.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// Name of the message template to send.
    #[serde(default = "default_template_name")]
    pub message_template: String,
}

fn default_true() -> bool {
    true
}
fn default_update_interval() -> u64 {
    60
}
fn default_ack_window() -> u64 {
    5
}
fn default_retry_delay() -> u64 {
    60
}
fn default_confirm_wait() -> u64 {
    30
}
fn default_pending_max_age() -> u64 {
    120
}
fn default_reconnect_interval() -> u64 {
    10
}
fn default_template_name() -> String {
    "template1".to_string()
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            selected_peer: String::new(),
            update_interval: default_update_interval(),
            ack_mode: true,
            ack_window: default_ack_window(),
            retry_delay: default_retry_delay(),
            confirmations: true,
            confirm_wait: default_confirm_wait(),
            pending_max_age: default_pending_max_age(),
            reconnect_interval: default_reconnect_interval(),
            message_template: default_template_name(),
        }
    }
}

impl StationConfig {
    pub fn ack_window_duration(&self) -> Duration {
        Duration::from_secs(self.ack_window)
    }
    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }
    pub fn confirm_wait_duration(&self) -> Duration {
        Duration::from_secs(self.confirm_wait)
    }
    pub fn pending_max_age_duration(&self) -> Duration {
        Duration::from_secs(self.pending_max_age)
    }
    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }
    pub fn update_interval_duration(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub channel: u32,
    #[serde(default = "default_hop_limit")]
    pub hop_limit: u8,
}

fn default_hop_limit() -> u8 {
    3
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            hop_limit: default_hop_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_stats_file")]
    pub stats_file: String,
}

fn default_stats_file() -> String {
    "signal_stats.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            stats_file: default_stats_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: Some("meshwx.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;
        Ok(config)
    }

    /// Write a starter configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut message_templates = HashMap::new();
        message_templates.insert("template1".to_string(), DEFAULT_TEMPLATE.to_string());
        Config {
            station: StationConfig {
                selected_peer: "yang".to_string(),
                ..StationConfig::default()
            },
            peers: vec![
                PeerEntry {
                    name: "yin".to_string(),
                    address: "!9e7656a8".to_string(),
                },
                PeerEntry {
                    name: "yang".to_string(),
                    address: "!9e757a8c".to_string(),
                },
            ],
            transport: TransportConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            message_templates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.station.selected_peer, "yang");
        assert_eq!(parsed.peers.len(), 2);
        assert_eq!(parsed.station.ack_window, 5);
        assert_eq!(parsed.station.retry_delay, 60);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let parsed: Config = toml::from_str("[[peers]]\nname = \"a\"\naddress = \"1\"\n").unwrap();
        assert!(parsed.station.ack_mode);
        assert_eq!(parsed.station.update_interval, 60);
        assert_eq!(parsed.transport.hop_limit, 3);
        assert_eq!(parsed.storage.stats_file, "signal_stats.json");
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn peers_preserve_configured_order() {
        let toml_src = r#"
            [[peers]]
            name = "c"
            address = "3"

            [[peers]]
            name = "a"
            address = "1"

            [[peers]]
            name = "b"
            address = "2"
        "#;
        let parsed: Config = toml::from_str(toml_src).unwrap();
        let names: Vec<&str> = parsed.peers.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }
}
