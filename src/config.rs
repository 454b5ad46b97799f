// src/config.rs

//! Manages client configuration: loading, defaults and validation.

use crate::core::balancer::RegionGroup;
use crate::core::errors::LavalinkError;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Settings for a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique name of the node within a client.
    pub name: String,
    /// Base address, e.g. `ws://localhost:2333`. `http(s)` schemes are accepted too.
    pub server_uri: String,
    pub password: String,
    /// The region group this node serves. Untagged nodes accept every tenant.
    #[serde(default)]
    pub region: Option<RegionGroup>,
    /// A session id from a previous run, sent when connecting so the node can resume it.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Consecutive timeouts after which the node is considered lost. `0` disables the check.
    #[serde(default = "default_max_consecutive_timeouts")]
    pub max_consecutive_timeouts: u32,
    /// When set, session resuming is enabled with this timeout after every fresh `ready`.
    #[serde(with = "humantime_serde", default)]
    pub resume_timeout: Option<Duration>,
    #[serde(with = "humantime_serde", default = "default_reconnect_initial")]
    pub reconnect_initial: Duration,
    #[serde(with = "humantime_serde", default = "default_reconnect_max")]
    pub reconnect_max: Duration,
    /// How long a failure counts towards the node's penalty.
    #[serde(with = "humantime_serde", default = "default_failure_window")]
    pub failure_window: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_max_concurrent_requests() -> usize {
    16
}
fn default_max_consecutive_timeouts() -> u32 {
    3
}
fn default_reconnect_initial() -> Duration {
    Duration::from_secs(1)
}
fn default_reconnect_max() -> Duration {
    Duration::from_secs(30)
}
fn default_failure_window() -> Duration {
    Duration::from_secs(60)
}

impl NodeConfig {
    /// Creates a node configuration with default tuning.
    pub fn new(name: impl Into<String>, server_uri: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_uri: server_uri.into(),
            password: password.into(),
            region: None,
            session_id: None,
            request_timeout: default_request_timeout(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_consecutive_timeouts: default_max_consecutive_timeouts(),
            resume_timeout: None,
            reconnect_initial: default_reconnect_initial(),
            reconnect_max: default_reconnect_max(),
            failure_window: default_failure_window(),
        }
    }

    pub fn with_region(mut self, region: RegionGroup) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    pub fn with_max_consecutive_timeouts(mut self, max: u32) -> Self {
        self.max_consecutive_timeouts = max;
        self
    }

    pub fn with_resume_timeout(mut self, timeout: Duration) -> Self {
        self.resume_timeout = Some(timeout);
        self
    }

    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial = initial;
        self.reconnect_max = max;
        self
    }

    /// The REST base address derived from `server_uri`.
    pub fn rest_base(&self) -> Result<Url, LavalinkError> {
        let mut url = Url::parse(&self.server_uri)?;
        let scheme = match url.scheme() {
            "ws" | "http" => "http",
            "wss" | "https" => "https",
            other => {
                return Err(LavalinkError::InvalidConfig(format!(
                    "unsupported scheme '{other}' for node '{}'",
                    self.name
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| LavalinkError::InvalidConfig(format!("cannot use scheme '{scheme}'")))?;
        url.set_path("/");
        Ok(url)
    }

    /// The event channel address derived from `server_uri`.
    pub fn websocket_url(&self) -> Result<Url, LavalinkError> {
        let mut url = self.rest_base()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| LavalinkError::InvalidConfig(format!("cannot use scheme '{scheme}'")))?;
        url.set_path("/v4/websocket");
        Ok(url)
    }

    /// Validates a single node entry.
    pub fn validate(&self) -> Result<(), LavalinkError> {
        if self.name.trim().is_empty() {
            return Err(LavalinkError::InvalidConfig("node name cannot be empty".into()));
        }
        self.rest_base()?;
        if self.password.is_empty() {
            return Err(LavalinkError::InvalidConfig(format!(
                "node '{}' has an empty password",
                self.name
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(LavalinkError::InvalidConfig(format!(
                "node '{}': request_timeout cannot be 0",
                self.name
            )));
        }
        if self.max_concurrent_requests == 0 {
            return Err(LavalinkError::InvalidConfig(format!(
                "node '{}': max_concurrent_requests cannot be 0",
                self.name
            )));
        }
        if self.reconnect_initial > self.reconnect_max {
            return Err(LavalinkError::InvalidConfig(format!(
                "node '{}': reconnect_initial cannot exceed reconnect_max",
                self.name
            )));
        }
        Ok(())
    }
}

/// Failover policy of links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Selection attempts made while a link is reassigning before it becomes orphaned.
    #[serde(default = "default_max_reassign_attempts")]
    pub max_reassign_attempts: u32,
    /// Pause between two reassignment attempts.
    #[serde(with = "humantime_serde", default = "default_reassign_backoff")]
    pub reassign_backoff: Duration,
    /// How often orphaned links are offered to the pool again. `0` disables the task.
    #[serde(with = "humantime_serde", default = "default_orphan_retry_interval")]
    pub orphan_retry_interval: Duration,
}

fn default_max_reassign_attempts() -> u32 {
    3
}
fn default_reassign_backoff() -> Duration {
    Duration::from_millis(500)
}
fn default_orphan_retry_interval() -> Duration {
    Duration::from_secs(15)
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_reassign_attempts: default_max_reassign_attempts(),
            reassign_backoff: default_reassign_backoff(),
            orphan_retry_interval: default_orphan_retry_interval(),
        }
    }
}

/// The penalty providers a client starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Players,
    Cpu,
    Frames,
    Failures,
    VoiceRegion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderKind>,
    /// Penalty added per recent failure by the failures provider.
    #[serde(default = "default_failure_weight")]
    pub failure_weight: u64,
}

fn default_providers() -> Vec<ProviderKind> {
    vec![
        ProviderKind::Players,
        ProviderKind::Cpu,
        ProviderKind::Frames,
        ProviderKind::Failures,
    ]
}
fn default_failure_weight() -> u64 {
    100
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            failure_weight: default_failure_weight(),
        }
    }
}

/// Represents the final, validated client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// The bot user id sent to every node.
    pub user_id: u64,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
}

fn default_client_name() -> String {
    format!("lavalink-cluster/{}", env!("CARGO_PKG_VERSION"))
}
fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    /// Creates a configuration without nodes.
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            client_name: default_client_name(),
            log_level: default_log_level(),
            nodes: Vec::new(),
            link: LinkConfig::default(),
            balancer: BalancerConfig::default(),
        }
    }

    /// Creates a new `ClientConfig` by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.user_id == 0 {
            return Err(anyhow!("user_id cannot be 0"));
        }
        if self.client_name.trim().is_empty() {
            return Err(anyhow!("client_name cannot be empty"));
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            node.validate()?;
            if !names.insert(node.name.as_str()) {
                return Err(anyhow!("duplicate node name '{}'", node.name));
            }
        }

        if self.link.max_reassign_attempts == 0 {
            return Err(anyhow!("link.max_reassign_attempts cannot be 0"));
        }
        if self.balancer.providers.is_empty() {
            warn!("No penalty providers configured; node selection falls back to registration order.");
        }
        if self.nodes.is_empty() {
            warn!("No nodes configured; every link will stay unbound until a node is added.");
        }
        Ok(())
    }
}
