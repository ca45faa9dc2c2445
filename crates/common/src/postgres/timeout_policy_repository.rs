use crate::domain::{
    DomainError, DomainResult, TimeoutPolicy, TimeoutPolicyRepository, TIMEOUT_POLICY_ID,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tracing::debug;

#[derive(Clone)]
pub struct PostgresTimeoutPolicyRepository {
    client: PostgresClient,
}

impl PostgresTimeoutPolicyRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TimeoutPolicyRepository for PostgresTimeoutPolicyRepository {
    async fn get_timeout_policy(&self) -> DomainResult<Option<TimeoutPolicy>> {
        let conn = self
            .client
            .connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT enabled, min_wait_ms, max_wait_ms, exception_chute_id, check_interval_ms
                 FROM timeout_policy
                 WHERE id = $1",
                &[&TIMEOUT_POLICY_ID],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(row.map(|row| {
            let min_wait_ms: i64 = row.get(1);
            let max_wait_ms: i64 = row.get(2);
            let check_interval_ms: i64 = row.get(4);
            TimeoutPolicy {
                enabled: row.get(0),
                min_wait_ms: min_wait_ms.max(0) as u64,
                max_wait_ms: max_wait_ms.max(0) as u64,
                exception_chute_id: row.get(3),
                check_interval_ms: check_interval_ms.max(0) as u64,
            }
        }))
    }

    async fn upsert_timeout_policy(&self, policy: &TimeoutPolicy) -> DomainResult<()> {
        debug!(
            enabled = policy.enabled,
            max_wait_ms = policy.max_wait_ms,
            "upserting timeout policy"
        );

        let conn = self
            .client
            .connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let min_wait_ms = policy.min_wait_ms as i64;
        let max_wait_ms = policy.max_wait_ms as i64;
        let check_interval_ms = policy.check_interval_ms as i64;

        conn.execute(
            "INSERT INTO timeout_policy (id, enabled, min_wait_ms, max_wait_ms, exception_chute_id,
                                         check_interval_ms, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             ON CONFLICT (id) DO UPDATE SET
                enabled = EXCLUDED.enabled,
                min_wait_ms = EXCLUDED.min_wait_ms,
                max_wait_ms = EXCLUDED.max_wait_ms,
                exception_chute_id = EXCLUDED.exception_chute_id,
                check_interval_ms = EXCLUDED.check_interval_ms,
                updated_at = NOW()",
            &[
                &TIMEOUT_POLICY_ID,
                &policy.enabled,
                &min_wait_ms,
                &max_wait_ms,
                &policy.exception_chute_id,
                &check_interval_ms,
            ],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(())
    }
}
