use crate::parser::ScanParser;
use common::domain::ScanRecord;
use common::tcp::ReconnectBackoff;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument, Span};

const MAX_SCAN_LINE_LENGTH: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DwsReaderConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for DwsReaderConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9100,
            connect_timeout_ms: 3000,
            reconnect_max_delay_ms: 2000,
        }
    }
}

impl DwsReaderConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }
}

/// Dials the DWS device and forwards every parsed scan to `sink`.
///
/// Unparseable lines are logged and dropped; connection loss is retried with
/// the shared reconnect schedule.
pub struct DwsReader {
    config: DwsReaderConfig,
    parser: ScanParser,
    sink: mpsc::Sender<ScanRecord>,
}

enum SessionEnd {
    Cancelled,
    Disconnected,
    SinkClosed,
}

impl DwsReader {
    pub fn new(config: DwsReaderConfig, parser: ScanParser, sink: mpsc::Sender<ScanRecord>) -> Self {
        Self {
            config,
            parser,
            sink,
        }
    }

    #[instrument(name = "dws_reader", skip_all, fields(address = %self.config.address()))]
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let address = self.config.address();
        let mut backoff = ReconnectBackoff::new(self.config.reconnect_max_delay());
        info!("starting DWS reader");

        loop {
            let delay = backoff.next_delay();
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(&address)) => result,
            };

            let stream = match connected {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!(error = %e, attempt = backoff.attempt(), "failed to connect to DWS device");
                    continue;
                }
                Err(_) => {
                    warn!(attempt = backoff.attempt(), "connect to DWS device timed out");
                    continue;
                }
            };

            info!("connected to DWS device");
            let connected_at = Instant::now();

            match self.read_session(stream, &cancel).await {
                SessionEnd::Cancelled => break,
                SessionEnd::SinkClosed => {
                    warn!("scan consumer gone, stopping DWS reader");
                    break;
                }
                SessionEnd::Disconnected => {
                    let uptime = connected_at.elapsed();
                    backoff.session_ended(uptime);
                    warn!(uptime_ms = uptime.as_millis() as u64, "DWS connection lost, reconnecting");
                }
            }
        }

        info!("DWS reader stopped");
        Ok(())
    }

    async fn read_session(&self, stream: TcpStream, cancel: &CancellationToken) -> SessionEnd {
        let mut lines =
            FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_SCAN_LINE_LENGTH));

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                frame = lines.next() => frame,
            };

            match frame {
                Some(Ok(line)) => {
                    if !self.forward_line(&line, cancel).await {
                        return if cancel.is_cancelled() {
                            SessionEnd::Cancelled
                        } else {
                            SessionEnd::SinkClosed
                        };
                    }
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(max = MAX_SCAN_LINE_LENGTH, "discarding oversized DWS line");
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    warn!(error = %e, "DWS read failed");
                    return SessionEnd::Disconnected;
                }
                None => return SessionEnd::Disconnected,
            }
        }
    }

    /// Returns `false` only when the scan could not be handed on.
    async fn forward_line(&self, line: &str, cancel: &CancellationToken) -> bool {
        if line.trim().is_empty() {
            return true;
        }

        let span = info_span!(
            parent: Span::none(),
            "dws_scan",
            barcode = tracing::field::Empty,
        );

        async {
            let record = match self.parser.parse(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, line_len = line.len(), "discarding unparseable DWS line");
                    return true;
                }
            };
            Span::current().record("barcode", record.barcode.as_str());

            tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                sent = self.sink.send(record) => {
                    if sent.is_ok() {
                        debug!("scan forwarded");
                    }
                    sent.is_ok()
                }
            }
        }
        .instrument(span)
        .await
    }
}
