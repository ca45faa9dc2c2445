use crate::domain::{EndpointKind, EventPublisher, SorterEndpoint};
use crate::tcp::{ConnectionDriver, ConnectionSlot, WireMessage};
use async_trait::async_trait;
use common::domain::{ChuteAssignment, DomainError, DomainResult, EndpointConfig};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct RunningListener {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Listen-mode endpoint: binds `host:port` and serves exactly one sorter
/// connection at a time.
///
/// While a connection is live every further accepted socket is closed
/// immediately; accepting resumes once the live connection ends.
pub struct TcpServerEndpoint {
    config: EndpointConfig,
    driver: ConnectionDriver,
    running: tokio::sync::Mutex<Option<RunningListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpServerEndpoint {
    pub fn new(config: EndpointConfig, publisher: EventPublisher) -> Self {
        let driver = ConnectionDriver {
            kind: EndpointKind::Listen,
            publisher,
            slot: Arc::new(ConnectionSlot::new()),
            heartbeat_interval: config.heartbeat_interval(),
            send_timeout: config.send_timeout(),
        };
        Self {
            config,
            driver,
            running: tokio::sync::Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Bound address once started; useful when configured with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }

    fn set_local_addr(&self, addr: Option<SocketAddr>) {
        if let Ok(mut local_addr) = self.local_addr.lock() {
            *local_addr = addr;
        }
    }
}

async fn accept_loop(listener: TcpListener, driver: ConnectionDriver, token: CancellationToken) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            // Reap finished connection tasks so the set does not grow
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if !driver.slot.try_claim() {
                        warn!(peer = %peer, "sorter connection already active, rejecting new connection");
                        drop(stream);
                        continue;
                    }
                    let driver = driver.clone();
                    let token = token.clone();
                    connections.spawn(async move { driver.run(stream, peer, token).await });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                    }
                }
            },
        }
    }

    driver.slot.close().await;
    while connections.join_next().await.is_some() {}
    debug!("sorter accept loop stopped");
}

#[async_trait]
impl SorterEndpoint for TcpServerEndpoint {
    #[instrument(skip(self), fields(address = %self.config.address()))]
    async fn start(&self) -> DomainResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("listen endpoint already running");
            return Ok(());
        }

        let listener = TcpListener::bind(self.config.address())
            .await
            .map_err(|e| {
                DomainError::EndpointError(format!(
                    "failed to bind {}: {}",
                    self.config.address(),
                    e
                ))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DomainError::EndpointError(e.to_string()))?;
        self.set_local_addr(Some(local_addr));

        let token = CancellationToken::new();
        let task = tokio::spawn(accept_loop(listener, self.driver.clone(), token.clone()));
        *running = Some(RunningListener { token, task });

        info!(local_addr = %local_addr, "sorter listen endpoint started");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> DomainResult<()> {
        let Some(listener) = self.running.lock().await.take() else {
            return Ok(());
        };

        listener.token.cancel();
        match tokio::time::timeout(STOP_TIMEOUT, listener.task).await {
            Ok(Ok(())) => debug!("listen endpoint stopped gracefully"),
            Ok(Err(e)) => error!(error = ?e, "listen endpoint task panicked"),
            Err(_) => warn!("listen endpoint did not stop within timeout"),
        }

        self.set_local_addr(None);
        info!("sorter listen endpoint stopped");
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
        EndpointKind::Listen
    }
}
