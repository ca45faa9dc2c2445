use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelOrchestrationConfig {
    /// Ask the WCS for a chute before evaluating rules (default: false)
    pub request_chute_from_wcs: bool,

    /// Report every bound scan to the WCS in the background (default: false)
    pub notify_wcs_on_scan: bool,

    /// Upper bound on a WCS chute request (default: 2 seconds)
    pub wcs_timeout_ms: u64,

    /// Age after which any parcel is dropped from memory (default: 10 minutes)
    pub registry_retention_ms: u64,

    /// How often the config watcher polls the repositories (default: 2 seconds)
    pub config_poll_interval_ms: u64,

    /// How long shutdown waits for in-flight background writes (default: 5 seconds)
    pub background_shutdown_timeout_ms: u64,

    /// Capacity of the scan channel between the DWS reader and the glue
    pub scan_buffer: usize,
}

impl Default for ParcelOrchestrationConfig {
    fn default() -> Self {
        Self {
            request_chute_from_wcs: false,
            notify_wcs_on_scan: false,
            wcs_timeout_ms: 2_000,
            registry_retention_ms: 600_000,
            config_poll_interval_ms: 2_000,
            background_shutdown_timeout_ms: 5_000,
            scan_buffer: 1024,
        }
    }
}

impl ParcelOrchestrationConfig {
    pub fn wcs_timeout(&self) -> Duration {
        Duration::from_millis(self.wcs_timeout_ms)
    }

    pub fn registry_retention(&self) -> Duration {
        Duration::from_millis(self.registry_retention_ms)
    }

    pub fn config_poll_interval(&self) -> Duration {
        Duration::from_millis(self.config_poll_interval_ms.max(10))
    }

    pub fn background_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.background_shutdown_timeout_ms)
    }
}
