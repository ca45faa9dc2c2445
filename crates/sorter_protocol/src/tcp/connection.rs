use crate::domain::{EndpointKind, EventPublisher, SorterEvent};
use crate::tcp::{decode_line, encode_line, WireError, WireMessage, MAX_LINE_LENGTH};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};

struct ActiveWriter {
    id: u64,
    sink: FramedWrite<OwnedWriteHalf, LinesCodec>,
    teardown: CancellationToken,
}

/// Holds the one live connection of an endpoint.
///
/// `occupied` is claimed before a connection task is spawned so a second
/// accepted socket can be rejected without waiting on the writer lock.
#[derive(Default)]
pub(crate) struct ConnectionSlot {
    writer: tokio::sync::Mutex<Option<ActiveWriter>>,
    occupied: AtomicBool,
    connected: AtomicBool,
    next_id: AtomicU64,
}

impl ConnectionSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn try_claim(&self) -> bool {
        self.occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn install(
        &self,
        sink: FramedWrite<OwnedWriteHalf, LinesCodec>,
        teardown: CancellationToken,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.writer.lock().await = Some(ActiveWriter { id, sink, teardown });
        self.connected.store(true, Ordering::Release);
        id
    }

    async fn vacate(&self, id: u64) {
        let mut writer = self.writer.lock().await;
        if writer.as_ref().is_some_and(|active| active.id == id) {
            *writer = None;
        }
        self.connected.store(false, Ordering::Release);
        self.occupied.store(false, Ordering::Release);
    }

    /// Write one line to the live connection.
    ///
    /// A failed or timed-out write tears the connection down.
    pub(crate) async fn send_line(&self, line: String, send_timeout: Duration) -> bool {
        let mut guard = self.writer.lock().await;
        let Some(active) = guard.as_mut() else {
            warn!("no active sorter connection, message not sent");
            return false;
        };

        let error = match tokio::time::timeout(send_timeout, active.sink.send(line)).await {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("write timed out after {:?}", send_timeout),
        };

        warn!(error = %error, "sorter write failed, closing connection");
        if let Some(active) = guard.take() {
            active.teardown.cancel();
        }
        self.connected.store(false, Ordering::Release);
        false
    }

    /// Drop the live connection, if any.
    pub(crate) async fn close(&self) {
        if let Some(active) = self.writer.lock().await.take() {
            active.teardown.cancel();
        }
        self.connected.store(false, Ordering::Release);
    }
}

/// Per-endpoint settings shared by every connection it drives.
#[derive(Clone)]
pub(crate) struct ConnectionDriver {
    pub(crate) kind: EndpointKind,
    pub(crate) publisher: EventPublisher,
    pub(crate) slot: Arc<ConnectionSlot>,
    pub(crate) heartbeat_interval: Option<Duration>,
    pub(crate) send_timeout: Duration,
}

async fn next_heartbeat(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl ConnectionDriver {
    pub(crate) async fn send(&self, message: &WireMessage) -> bool {
        match encode_line(message) {
            Ok(line) => self.slot.send_line(line, self.send_timeout).await,
            Err(e) => {
                warn!(error = %e, message_type = message.type_name(), "failed to encode sorter message");
                false
            }
        }
    }

    /// Drive one connection until EOF, a read error, a failed write or
    /// `shutdown`. The slot must already be claimed by the caller and is
    /// released on return.
    pub(crate) async fn run(&self, stream: TcpStream, peer: SocketAddr, shutdown: CancellationToken) {
        let peer_label = peer.to_string();
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer_label, error = %e, "failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let sink = FramedWrite::new(write_half, LinesCodec::new());

        let teardown = shutdown.child_token();
        let connection_id = self.slot.install(sink, teardown.clone()).await;

        info!(peer = %peer_label, kind = %self.kind, "sorter connected");
        self.publisher
            .publish(
                SorterEvent::ConnectionChanged {
                    connected: true,
                    peer: Some(peer_label.clone()),
                },
                &shutdown,
            )
            .await;

        let mut heartbeat = self.heartbeat_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = teardown.cancelled() => {
                    debug!(peer = %peer_label, "sorter connection torn down");
                    break;
                }
                _ = next_heartbeat(&mut heartbeat) => {
                    if !self.send(&WireMessage::Heartbeat).await {
                        break;
                    }
                }
                frame = lines.next() => match frame {
                    Some(Ok(line)) => self.handle_line(&line, &peer_label, &shutdown).await,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(peer = %peer_label, max = MAX_LINE_LENGTH, "discarding oversized line");
                    }
                    Some(Err(LinesCodecError::Io(e))) => {
                        warn!(peer = %peer_label, error = %e, "sorter read failed");
                        break;
                    }
                    None => {
                        info!(peer = %peer_label, "sorter closed the connection");
                        break;
                    }
                },
            }
        }

        self.slot.vacate(connection_id).await;
        self.publisher
            .publish(
                SorterEvent::ConnectionChanged {
                    connected: false,
                    peer: Some(peer_label),
                },
                &shutdown,
            )
            .await;
    }

    /// Each inbound line gets its own root span, independent of the
    /// connection span.
    async fn handle_line(&self, line: &str, peer: &str, shutdown: &CancellationToken) {
        let span = info_span!(
            parent: Span::none(),
            "sorter_message",
            peer = %peer,
            kind = %self.kind,
            message_type = tracing::field::Empty,
            parcel_id = tracing::field::Empty,
        );

        async {
            let message = match decode_line(line) {
                Ok(message) => message,
                Err(WireError::Empty) => return,
                Err(e) => {
                    warn!(error = %e, line_len = line.len(), "skipping malformed sorter line");
                    return;
                }
            };
            Span::current().record("message_type", message.type_name());

            let received_at = Utc::now();
            let event = match message {
                WireMessage::ParcelDetected(message) => {
                    Span::current().record("parcel_id", message.parcel_id.as_str());
                    SorterEvent::ParcelDetected(message.into_event(received_at))
                }
                WireMessage::SortingCompleted(message) => {
                    Span::current().record("parcel_id", message.parcel_id.as_str());
                    SorterEvent::SortingCompleted(message.into_event(received_at))
                }
                WireMessage::Heartbeat => {
                    trace!("sorter heartbeat");
                    return;
                }
                WireMessage::ChuteAssignment(_) => {
                    debug!("ignoring inbound chute assignment");
                    return;
                }
            };

            if self.publisher.publish(event, shutdown).await {
                debug!("sorter event published");
            }
        }
        .instrument(span)
        .await
    }
}
