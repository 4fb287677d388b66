use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Complete agent configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub agent: SubscriptionConfig,
}

/// Broker connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_entity_id")]
    pub entity_id: String,
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    std::env::var("BROKER_URL").unwrap_or_else(|_| "http://localhost:8000".to_string())
}

fn default_entity_id() -> String {
    std::env::var("BROKER_ENTITY_ID").unwrap_or_default()
}

fn default_api_key() -> String {
    std::env::var("BROKER_API_KEY").unwrap_or_default()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            entity_id: default_entity_id(),
            api_key: default_api_key(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Poll loop settings
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Minimum time between the start of two poll cycles (milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Treat Ctrl-C as a graceful stop request while the loop runs
    #[serde(default = "default_stop_on_interrupt")]
    pub stop_on_interrupt: bool,
    /// Seconds a reply callback from `send_message` stays registered; 0 keeps it until forgotten
    #[serde(default = "default_response_ttl_secs")]
    pub response_ttl_secs: u64,
}

fn default_interval_ms() -> u64 {
    100
}

fn default_stop_on_interrupt() -> bool {
    true
}

fn default_response_ttl_secs() -> u64 {
    300
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        // A zero period would make the interval timer panic.
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn response_ttl(&self) -> Option<Duration> {
        (self.response_ttl_secs > 0).then(|| Duration::from_secs(self.response_ttl_secs))
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            stop_on_interrupt: default_stop_on_interrupt(),
            response_ttl_secs: default_response_ttl_secs(),
        }
    }
}

/// Message names the binary subscribes to at startup
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AgentConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path))?;
    let config: AgentConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file '{}'", path))?;
    Ok(config)
}
