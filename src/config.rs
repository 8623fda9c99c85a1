use std::num::NonZeroUsize;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

/// Settings shared by every actor in a registry tree
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegistryConfig {
    /// Capacity of each actor's command mailbox
    ///
    /// Parents forward to children with an awaited send, so a child with a full
    /// mailbox holds up its parent (and with it every sibling) until it drains.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: NonZeroUsize,

    /// How long an all-temperatures query waits for devices to answer
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Default wait used by the request/response helpers on handles
    #[serde(default = "default_ask_timeout_ms")]
    pub ask_timeout_ms: u64,
}

impl RegistryConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn ask_timeout(&self) -> Duration {
        Duration::from_millis(self.ask_timeout_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            query_timeout_ms: default_query_timeout_ms(),
            ask_timeout_ms: default_ask_timeout_ms(),
        }
    }
}

const DEFAULT_MAILBOX_CAPACITY: NonZeroUsize = NonZeroUsize::new(32).unwrap();

fn default_mailbox_capacity() -> NonZeroUsize {
    DEFAULT_MAILBOX_CAPACITY
}

fn default_query_timeout_ms() -> u64 {
    3000
}

fn default_ask_timeout_ms() -> u64 {
    1000
}

/// A device the hub binary should track on startup
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DeviceConfig {
    pub group: String,
    pub device: String,
    /// Reading recorded right after the device is registered
    pub initial: Option<f64>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,

    pub devices: Option<Vec<DeviceConfig>>,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .context("invalid configuration file provided")
        .inspect(|config| trace!("loaded config: {config:?}"))
}
