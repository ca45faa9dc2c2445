use crate::domain::{EndpointKind, EventPublisher, SorterEndpoint};
use crate::tcp::{ConnectionDriver, ConnectionSlot, WireMessage};
use async_trait::async_trait;
use common::domain::{ChuteAssignment, DomainResult, EndpointConfig};
use common::tcp::ReconnectBackoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct RunningDialer {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Dial-mode endpoint: connects out to the sorter and keeps reconnecting.
pub struct TcpClientEndpoint {
    config: EndpointConfig,
    driver: ConnectionDriver,
    running: tokio::sync::Mutex<Option<RunningDialer>>,
}

impl TcpClientEndpoint {
    pub fn new(config: EndpointConfig, publisher: EventPublisher) -> Self {
        let driver = ConnectionDriver {
            kind: EndpointKind::Dial,
            publisher,
            slot: Arc::new(ConnectionSlot::new()),
            heartbeat_interval: config.heartbeat_interval(),
            send_timeout: config.send_timeout(),
        };
        Self {
            config,
            driver,
            running: tokio::sync::Mutex::new(None),
        }
    }
}

/// Connect, serve, and reconnect until cancelled.
async fn dial_loop(config: EndpointConfig, driver: ConnectionDriver, token: CancellationToken) {
    let address = config.address();
    let mut backoff = ReconnectBackoff::new(config.reconnect_max_delay());

    loop {
        let delay = backoff.next_delay();
        if !delay.is_zero() {
            debug!(address = %address, delay_ms = delay.as_millis() as u64, attempt = backoff.attempt(), "waiting before reconnect");
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let connected = tokio::select! {
            _ = token.cancelled() => break,
            result = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&address)) => result,
        };

        match connected {
            Ok(Ok(stream)) => {
                let peer = match stream.peer_addr() {
                    Ok(peer) => peer,
                    Err(e) => {
                        warn!(address = %address, error = %e, "connected socket has no peer address");
                        continue;
                    }
                };
                if !driver.slot.try_claim() {
                    // Only this loop claims the slot, so it is always free here
                    warn!(address = %address, "connection slot busy, dropping new connection");
                    continue;
                }
                let connected_at = Instant::now();
                driver.run(stream, peer, token.clone()).await;
                let uptime = connected_at.elapsed();
                if !backoff.session_ended(uptime) {
                    debug!(address = %address, uptime_ms = uptime.as_millis() as u64, "sorter session ended early, backing off");
                }
            }
            Ok(Err(e)) => {
                warn!(address = %address, error = %e, "failed to connect to sorter");
            }
            Err(_) => {
                warn!(address = %address, timeout_ms = config.connect_timeout_ms, "connect to sorter timed out");
            }
        }

        if token.is_cancelled() {
            break;
        }
    }

    debug!(address = %address, "sorter dial loop stopped");
}

#[async_trait]
impl SorterEndpoint for TcpClientEndpoint {
    #[instrument(skip(self), fields(address = %self.config.address()))]
    async fn start(&self) -> DomainResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("dial endpoint already running");
            return Ok(());
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(dial_loop(
            self.config.clone(),
            self.driver.clone(),
            token.clone(),
        ));
        *running = Some(RunningDialer { token, task });

        info!("sorter dial endpoint started");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> DomainResult<()> {
        let Some(dialer) = self.running.lock().await.take() else {
            return Ok(());
        };

        dialer.token.cancel();
        self.driver.slot.close().await;
        match tokio::time::timeout(STOP_TIMEOUT, dialer.task).await {
            Ok(Ok(())) => debug!("dial endpoint stopped gracefully"),
            Ok(Err(e)) => error!(error = ?e, "dial endpoint task panicked"),
            Err(_) => warn!("dial endpoint did not stop within timeout"),
        }

        info!("sorter dial endpoint stopped");
        Ok(())
    }

    async fn send_chute_assignment(&self, assignment: &ChuteAssignment) -> bool {
        self.driver
            .send(&WireMessage::ChuteAssignment(assignment.into()))
            .await
    }

    fn is_connected(&self) -> bool {
        self.driver.slot.is_connected()
    }

    fn kind(&self) -> EndpointKind {
        EndpointKind::Dial
    }
}
