use crate::domain::{
    DomainError, DomainResult, LifecycleAuditEntry, LifecycleAuditRepository, LifecycleStage,
};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tracing::debug;

#[derive(Clone)]
pub struct PostgresLifecycleAuditRepository {
    client: PostgresClient,
}

impl PostgresLifecycleAuditRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LifecycleAuditRepository for PostgresLifecycleAuditRepository {
    async fn append_entry(&self, entry: &LifecycleAuditEntry) -> DomainResult<()> {
        debug!(parcel_id = %entry.parcel_id, stage = %entry.stage, "appending lifecycle audit entry");

        let conn = self
            .client
            .connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let stage = entry.stage.as_str();

        // Replayed appends of the same transition collapse onto one row
        conn.execute(
            "INSERT INTO parcel_lifecycle_audit (parcel_id, stage, event_time, description)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (parcel_id, stage, event_time) DO NOTHING",
            &[&entry.parcel_id, &stage, &entry.event_time, &entry.description],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(())
    }

    async fn list_entries(&self, parcel_id: &str) -> DomainResult<Vec<LifecycleAuditEntry>> {
        let conn = self
            .client
            .connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                "SELECT parcel_id, stage, event_time, description
                 FROM parcel_lifecycle_audit
                 WHERE parcel_id = $1
                 ORDER BY event_time ASC, id ASC",
                &[&parcel_id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        rows.iter()
            .map(|row| {
                let stage: String = row.get(1);
                Ok(LifecycleAuditEntry {
                    parcel_id: row.get(0),
                    stage: stage
                        .parse::<LifecycleStage>()
                        .map_err(|e| DomainError::RepositoryError(anyhow::anyhow!(e)))?,
                    event_time: row.get(2),
                    description: row.get(3),
                })
            })
            .collect()
    }
}
