use crate::domain::result::DomainResult;
use crate::domain::DomainError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Fixed row id of the singleton endpoint configuration.
pub const ENDPOINT_CONFIG_ID: i32 = 1;

/// Whether the sorter endpoint listens for the sorter or dials out to it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointMode {
    /// Bind `host:port` and accept a single sorter connection
    #[default]
    Listen,
    /// Connect to the sorter at `host:port`, reconnecting with backoff
    Dial,
}

impl fmt::Display for EndpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listen => write!(f, "listen"),
            Self::Dial => write!(f, "dial"),
        }
    }
}

impl std::str::FromStr for EndpointMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "listen" | "server" => Ok(Self::Listen),
            "dial" | "client" => Ok(Self::Dial),
            other => Err(format!(
                "unknown endpoint mode '{}', expected: listen, dial",
                other
            )),
        }
    }
}

/// Wire protocol spoken with the sorter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// Newline-delimited JSON envelopes with a `Type` discriminator
    #[default]
    JsonLines,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JsonLines => write!(f, "json_lines"),
        }
    }
}

impl std::str::FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json_lines" | "json-lines" | "jsonlines" | "json" => Ok(Self::JsonLines),
            other => Err(format!(
                "unknown protocol kind '{}', expected: json_lines",
                other
            )),
        }
    }
}

/// Singleton configuration for the sorter endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub mode: EndpointMode,
    pub host: String,
    pub port: u16,
    pub protocol: ProtocolKind,
    pub enabled: bool,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    /// Outbound heartbeat interval; 0 disables heartbeats
    pub heartbeat_interval_ms: u64,
    /// Upper bound on the dial reconnect delay
    pub reconnect_max_delay_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            mode: EndpointMode::Listen,
            host: "0.0.0.0".to_string(),
            port: 9000,
            protocol: ProtocolKind::JsonLines,
            enabled: true,
            connect_timeout_ms: 3000,
            send_timeout_ms: 1000,
            heartbeat_interval_ms: 0,
            reconnect_max_delay_ms: 2000,
        }
    }
}

impl EndpointConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.host.trim().is_empty() {
            return Err(DomainError::InvalidEndpointConfig(
                "host must not be empty".to_string(),
            ));
        }
        if self.mode == EndpointMode::Dial && self.port == 0 {
            return Err(DomainError::InvalidEndpointConfig(
                "dial mode requires a non-zero port".to_string(),
            ));
        }
        if self.send_timeout_ms == 0 {
            return Err(DomainError::InvalidEndpointConfig(
                "send_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Hash an endpoint config for change detection.
pub fn hash_endpoint_config(config: &EndpointConfig) -> String {
    let mut hasher = DefaultHasher::new();
    config.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Repository trait for the singleton endpoint configuration
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EndpointConfigRepository: Send + Sync {
    /// Get the configuration, `None` if it was never stored
    async fn get_endpoint_config(&self) -> DomainResult<Option<EndpointConfig>>;

    /// Insert or replace the configuration
    async fn upsert_endpoint_config(&self, config: &EndpointConfig) -> DomainResult<()>;
}
