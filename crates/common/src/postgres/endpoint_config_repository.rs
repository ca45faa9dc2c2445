use crate::domain::{
    DomainError, DomainResult, EndpointConfig, EndpointConfigRepository, EndpointMode,
    ProtocolKind, ENDPOINT_CONFIG_ID,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tracing::debug;

fn parse_column<T: std::str::FromStr<Err = String>>(value: String) -> DomainResult<T> {
    value
        .parse::<T>()
        .map_err(|e| DomainError::RepositoryError(anyhow::anyhow!(e)))
}

fn millis_column(value: i64) -> u64 {
    value.max(0) as u64
}

#[derive(Clone)]
pub struct PostgresEndpointConfigRepository {
    client: PostgresClient,
}

impl PostgresEndpointConfigRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EndpointConfigRepository for PostgresEndpointConfigRepository {
    async fn get_endpoint_config(&self) -> DomainResult<Option<EndpointConfig>> {
        let conn = self
            .client
            .connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT mode, host, port, protocol, enabled, connect_timeout_ms, send_timeout_ms,
                        heartbeat_interval_ms, reconnect_max_delay_ms
                 FROM endpoint_config
                 WHERE id = $1",
                &[&ENDPOINT_CONFIG_ID],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let port: i32 = row.get(2);
        let port = u16::try_from(port).map_err(|_| {
            DomainError::InvalidEndpointConfig(format!("stored port out of range: {}", port))
        })?;

        Ok(Some(EndpointConfig {
            mode: parse_column::<EndpointMode>(row.get(0))?,
            host: row.get(1),
            port,
            protocol: parse_column::<ProtocolKind>(row.get(3))?,
            enabled: row.get(4),
            connect_timeout_ms: millis_column(row.get(5)),
            send_timeout_ms: millis_column(row.get(6)),
            heartbeat_interval_ms: millis_column(row.get(7)),
            reconnect_max_delay_ms: millis_column(row.get(8)),
        }))
    }

    async fn upsert_endpoint_config(&self, config: &EndpointConfig) -> DomainResult<()> {
        debug!(mode = %config.mode, address = %config.address(), "upserting endpoint config");

        let conn = self
            .client
            .connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let mode = config.mode.to_string();
        let protocol = config.protocol.to_string();
        let port = i32::from(config.port);
        let connect_timeout_ms = config.connect_timeout_ms as i64;
        let send_timeout_ms = config.send_timeout_ms as i64;
        let heartbeat_interval_ms = config.heartbeat_interval_ms as i64;
        let reconnect_max_delay_ms = config.reconnect_max_delay_ms as i64;

        conn.execute(
            "INSERT INTO endpoint_config (id, mode, host, port, protocol, enabled, connect_timeout_ms,
                                          send_timeout_ms, heartbeat_interval_ms, reconnect_max_delay_ms, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
             ON CONFLICT (id) DO UPDATE SET
                mode = EXCLUDED.mode,
                host = EXCLUDED.host,
                port = EXCLUDED.port,
                protocol = EXCLUDED.protocol,
                enabled = EXCLUDED.enabled,
                connect_timeout_ms = EXCLUDED.connect_timeout_ms,
                send_timeout_ms = EXCLUDED.send_timeout_ms,
                heartbeat_interval_ms = EXCLUDED.heartbeat_interval_ms,
                reconnect_max_delay_ms = EXCLUDED.reconnect_max_delay_ms,
                updated_at = NOW()",
            &[
                &ENDPOINT_CONFIG_ID,
                &mode,
                &config.host,
                &port,
                &protocol,
                &config.enabled,
                &connect_timeout_ms,
                &send_timeout_ms,
                &heartbeat_interval_ms,
                &reconnect_max_delay_ms,
            ],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(())
    }
}
