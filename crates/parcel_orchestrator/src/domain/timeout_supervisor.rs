use crate::domain::{ParcelOrchestrationService, TimeoutPolicyCache};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Periodically times out parcels that never received a scan.
///
/// The policy is re-read on every tick, so a reloaded `check_interval_ms`
/// or `max_wait_ms` takes effect without a restart.
pub struct TimeoutSupervisor {
    service: Arc<ParcelOrchestrationService>,
    timeout_policy: Arc<TimeoutPolicyCache>,
}

impl TimeoutSupervisor {
    pub fn new(
        service: Arc<ParcelOrchestrationService>,
        timeout_policy: Arc<TimeoutPolicyCache>,
    ) -> Self {
        Self {
            service,
            timeout_policy,
        }
    }

    #[instrument(name = "timeout_supervisor", skip_all)]
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        info!("starting timeout supervisor");

        loop {
            let interval = self.timeout_policy.current().check_interval();
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("timeout supervisor stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let report = self.service.sweep().await;
            if !report.timed_out.is_empty() || !report.evicted.is_empty() {
                debug!(
                    timed_out = report.timed_out.len(),
                    evicted = report.evicted.len(),
                    "timeout sweep finished"
                );
            }
        }
    }
}
