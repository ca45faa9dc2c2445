use common::domain::{EndpointConfig, EndpointMode, ProtocolKind, TimeoutPolicy};
use common::postgres::PostgresConfig;
use config::{Config, ConfigError, Environment};
use dws_ingest::{DwsReaderConfig, ScanFormat};
use parcel_orchestrator::ParcelOrchestrationConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where parcels, audit entries and runtime configuration are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" | "in_memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown storage backend '{}', expected: postgres, memory",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // Storage
    /// postgres or memory
    #[serde(default = "default_storage_backend")]
    pub storage_backend: String,

    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    /// Create missing tables on startup
    #[serde(default = "default_postgres_apply_schema")]
    pub postgres_apply_schema: bool,

    // Sorter endpoint seed, used until an endpoint row exists
    /// listen or dial
    #[serde(default = "default_sorter_mode")]
    pub sorter_mode: String,

    #[serde(default = "default_sorter_host")]
    pub sorter_host: String,

    #[serde(default = "default_sorter_port")]
    pub sorter_port: u16,

    #[serde(default = "default_sorter_connect_timeout_ms")]
    pub sorter_connect_timeout_ms: u64,

    #[serde(default = "default_sorter_send_timeout_ms")]
    pub sorter_send_timeout_ms: u64,

    /// 0 disables heartbeats
    #[serde(default)]
    pub sorter_heartbeat_interval_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub sorter_reconnect_max_delay_ms: u64,

    /// Capacity of the channel between the endpoint and the orchestrator
    #[serde(default = "default_sorter_event_buffer")]
    pub sorter_event_buffer: usize,

    // Timeout policy seed, used until a policy row exists
    #[serde(default = "default_true")]
    pub timeout_enabled: bool,

    #[serde(default)]
    pub timeout_min_wait_ms: u64,

    #[serde(default = "default_timeout_max_wait_ms")]
    pub timeout_max_wait_ms: u64,

    #[serde(default = "default_timeout_exception_chute")]
    pub timeout_exception_chute: String,

    #[serde(default = "default_timeout_check_interval_ms")]
    pub timeout_check_interval_ms: u64,

    // DWS reader
    #[serde(default)]
    pub dws_enabled: bool,

    #[serde(default = "default_dws_host")]
    pub dws_host: String,

    #[serde(default = "default_dws_port")]
    pub dws_port: u16,

    /// delimited or json
    #[serde(default = "default_dws_format")]
    pub dws_format: String,

    /// Field template for delimited lines, e.g. `{Code},{Weight},{Length}`
    #[serde(default = "default_dws_template")]
    pub dws_template: String,

    #[serde(default = "default_dws_delimiter")]
    pub dws_delimiter: String,

    #[serde(default = "default_dws_connect_timeout_ms")]
    pub dws_connect_timeout_ms: u64,

    #[serde(default = "default_reconnect_max_delay_ms")]
    pub dws_reconnect_max_delay_ms: u64,

    // Orchestration
    #[serde(default)]
    pub request_chute_from_wcs: bool,

    #[serde(default)]
    pub notify_wcs_on_scan: bool,

    #[serde(default = "default_wcs_timeout_ms")]
    pub wcs_timeout_ms: u64,

    #[serde(default = "default_registry_retention_ms")]
    pub registry_retention_ms: u64,

    #[serde(default = "default_config_poll_interval_ms")]
    pub config_poll_interval_ms: u64,

    #[serde(default = "default_background_shutdown_timeout_ms")]
    pub background_shutdown_timeout_ms: u64,

    #[serde(default = "default_scan_buffer")]
    pub scan_buffer: usize,

    /// Upper bound for all closers together
    #[serde(default = "default_closer_timeout_secs")]
    pub closer_timeout_secs: u64,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default)]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

// Storage defaults
fn default_storage_backend() -> String {
    "postgres".to_string()
}

fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "sortline".to_string()
}

fn default_postgres_username() -> String {
    "sortline".to_string()
}

fn default_postgres_password() -> String {
    "sortline".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

fn default_postgres_apply_schema() -> bool {
    true
}

// Sorter defaults
fn default_sorter_mode() -> String {
    "listen".to_string()
}

fn default_sorter_host() -> String {
    "0.0.0.0".to_string()
}

fn default_sorter_port() -> u16 {
    9000
}

fn default_sorter_connect_timeout_ms() -> u64 {
    3000
}

fn default_sorter_send_timeout_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    2000
}

fn default_sorter_event_buffer() -> usize {
    1024
}

// Timeout policy defaults
fn default_timeout_max_wait_ms() -> u64 {
    10_000
}

fn default_timeout_exception_chute() -> String {
    "EXCEPTION".to_string()
}

fn default_timeout_check_interval_ms() -> u64 {
    500
}

// DWS defaults
fn default_dws_host() -> String {
    "127.0.0.1".to_string()
}

fn default_dws_port() -> u16 {
    9100
}

fn default_dws_format() -> String {
    "delimited".to_string()
}

fn default_dws_template() -> String {
    "{Code},{Weight},{Length},{Width},{Height},{Volume}".to_string()
}

fn default_dws_delimiter() -> String {
    ",".to_string()
}

fn default_dws_connect_timeout_ms() -> u64 {
    3000
}

// Orchestration defaults
fn default_wcs_timeout_ms() -> u64 {
    2000
}

fn default_registry_retention_ms() -> u64 {
    600_000
}

fn default_config_poll_interval_ms() -> u64 {
    2000
}

fn default_background_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_scan_buffer() -> usize {
    1024
}

fn default_closer_timeout_secs() -> u64 {
    10
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "sortline".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("SORTLINE"))
            .build()?
            .try_deserialize()
    }

    pub fn storage(&self) -> anyhow::Result<StorageBackend> {
        self.storage_backend
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
    }

    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn endpoint_seed(&self) -> anyhow::Result<EndpointConfig> {
        let mode: EndpointMode = self
            .sorter_mode
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        let endpoint = EndpointConfig {
            mode,
            host: self.sorter_host.clone(),
            port: self.sorter_port,
            protocol: ProtocolKind::JsonLines,
            enabled: true,
            connect_timeout_ms: self.sorter_connect_timeout_ms,
            send_timeout_ms: self.sorter_send_timeout_ms,
            heartbeat_interval_ms: self.sorter_heartbeat_interval_ms,
            reconnect_max_delay_ms: self.sorter_reconnect_max_delay_ms,
        };
        endpoint.validate()?;
        Ok(endpoint)
    }

    pub fn timeout_policy_seed(&self) -> anyhow::Result<TimeoutPolicy> {
        let policy = TimeoutPolicy {
            enabled: self.timeout_enabled,
            min_wait_ms: self.timeout_min_wait_ms,
            max_wait_ms: self.timeout_max_wait_ms,
            exception_chute_id: self.timeout_exception_chute.clone(),
            check_interval_ms: self.timeout_check_interval_ms,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn scan_format(&self) -> anyhow::Result<ScanFormat> {
        match self.dws_format.to_lowercase().as_str() {
            "delimited" => Ok(ScanFormat::Delimited {
                template: self.dws_template.clone(),
                delimiter: self.dws_delimiter.clone(),
            }),
            "json" => Ok(ScanFormat::Json),
            other => Err(anyhow::anyhow!(
                "unknown DWS format '{}', expected: delimited, json",
                other
            )),
        }
    }

    pub fn dws_reader(&self) -> DwsReaderConfig {
        DwsReaderConfig {
            host: self.dws_host.clone(),
            port: self.dws_port,
            connect_timeout_ms: self.dws_connect_timeout_ms,
            reconnect_max_delay_ms: self.dws_reconnect_max_delay_ms,
        }
    }

    pub fn orchestration(&self) -> ParcelOrchestrationConfig {
        ParcelOrchestrationConfig {
            request_chute_from_wcs: self.request_chute_from_wcs,
            notify_wcs_on_scan: self.notify_wcs_on_scan,
            wcs_timeout_ms: self.wcs_timeout_ms,
            registry_retention_ms: self.registry_retention_ms,
            config_poll_interval_ms: self.config_poll_interval_ms,
            background_shutdown_timeout_ms: self.background_shutdown_timeout_ms,
            scan_buffer: self.scan_buffer,
        }
    }

    pub fn closer_timeout(&self) -> Duration {
        Duration::from_secs(self.closer_timeout_secs)
    }
}
