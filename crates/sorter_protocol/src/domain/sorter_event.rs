use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The sorter saw a parcel enter the line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelDetectedEvent {
    pub parcel_id: String,
    pub source_id: Option<String>,
    pub cart_number: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// The sorter finished executing a chute assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct SortingCompletedEvent {
    pub parcel_id: String,
    pub actual_chute: String,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SorterEvent {
    ParcelDetected(ParcelDetectedEvent),
    SortingCompleted(SortingCompletedEvent),
    ConnectionChanged {
        connected: bool,
        peer: Option<String>,
    },
}

impl SorterEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ParcelDetected(_) => "parcel_detected",
            Self::SortingCompleted(_) => "sorting_completed",
            Self::ConnectionChanged { .. } => "connection_changed",
        }
    }
}

/// Sending half of the event hub, cloned into every endpoint instance.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<SorterEvent>,
}

impl EventPublisher {
    /// Deliver an event unless `cancel` fires first.
    ///
    /// Returns `false` when the event was not delivered, either because the
    /// receiver is gone or the caller is shutting down.
    pub async fn publish(&self, event: SorterEvent, cancel: &CancellationToken) -> bool {
        let name = event.name();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(event = name, "dropping sorter event, endpoint shutting down");
                false
            }
            result = self.sender.send(event) => {
                if result.is_err() {
                    debug!(event = name, "dropping sorter event, no subscriber");
                }
                result.is_ok()
            }
        }
    }
}

/// Bounded single-subscriber channel carrying endpoint events.
pub fn event_channel(capacity: usize) -> (EventPublisher, mpsc::Receiver<SorterEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (EventPublisher { sender }, receiver)
}
