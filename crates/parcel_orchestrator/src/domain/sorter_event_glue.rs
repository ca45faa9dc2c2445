use crate::domain::ParcelOrchestrationService;
use common::domain::ScanRecord;
use sorter_protocol::{SorterEvent, SortingCompletedEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Feeds sorter events and DWS scans into the orchestration service.
///
/// Detection, scan binding and in-memory completion happen inline so their
/// order is preserved. Routing a bound scan and completing a parcel that has
/// to be read back from the store are spawned on the background tracker.
pub struct SorterEventGlue {
    service: Arc<ParcelOrchestrationService>,
    events: mpsc::Receiver<SorterEvent>,
    scans: mpsc::Receiver<ScanRecord>,
}

impl SorterEventGlue {
    pub fn new(
        service: Arc<ParcelOrchestrationService>,
        events: mpsc::Receiver<SorterEvent>,
        scans: mpsc::Receiver<ScanRecord>,
    ) -> Self {
        Self {
            service,
            events,
            scans,
        }
    }

    #[instrument(name = "sorter_event_glue", skip_all)]
    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        info!("starting sorter event glue");
        let mut events_open = true;
        let mut scans_open = true;

        while events_open || scans_open {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sorter event glue stopping");
                    return Ok(());
                }
                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!("sorter event channel closed");
                        events_open = false;
                    }
                },
                scan = self.scans.recv(), if scans_open => match scan {
                    Some(scan) => self.handle_scan(scan),
                    None => {
                        debug!("scan channel closed");
                        scans_open = false;
                    }
                },
            }
        }

        info!("all glue inputs closed, stopping");
        Ok(())
    }

    fn handle_event(&self, event: SorterEvent) {
        match event {
            SorterEvent::ParcelDetected(detected) => {
                let parcel_id = detected.parcel_id.clone();
                if let Err(e) = self.service.handle_parcel_detected(detected) {
                    warn!(parcel_id = %parcel_id, error = %e, "failed to handle parcel detection");
                }
            }
            SorterEvent::SortingCompleted(completed) => self.handle_completion(completed),
            SorterEvent::ConnectionChanged { connected, peer } => {
                info!(connected, peer = ?peer, "sorter connection changed");
            }
        }
    }

    fn handle_completion(&self, completed: SortingCompletedEvent) {
        match self.service.complete_tracked(&completed) {
            Ok(true) => {}
            Ok(false) => {
                debug!(parcel_id = %completed.parcel_id, "completion for untracked parcel, checking store");
                let service = Arc::clone(&self.service);
                self.service.background().spawn(async move {
                    let parcel_id = completed.parcel_id.clone();
                    if let Err(e) = service.complete_untracked(completed).await {
                        warn!(parcel_id = %parcel_id, error = %e, "failed to handle sorting completion");
                    }
                });
            }
            Err(e) => {
                warn!(parcel_id = %completed.parcel_id, error = %e, "failed to handle sorting completion");
            }
        }
    }

    fn handle_scan(&self, scan: ScanRecord) {
        let Some(bound) = self.service.bind_scan(scan) else {
            return;
        };

        let service = Arc::clone(&self.service);
        self.service.background().spawn(async move {
            let parcel_id = bound.parcel.parcel_id.clone();
            if let Err(e) = service.route_bound_parcel(bound).await {
                warn!(parcel_id = %parcel_id, error = %e, "failed to route bound parcel");
            }
        });
    }
}
