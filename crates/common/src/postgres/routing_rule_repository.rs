use crate::domain::{DomainError, DomainResult, RoutingRule, RoutingRuleRepository};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use tokio_postgres::Row;
use tracing::{debug, info};

fn rule_from_row(row: &Row) -> RoutingRule {
    RoutingRule {
        rule_id: row.get(0),
        priority: row.get(1),
        condition: row.get(2),
        target_chute: row.get(3),
        enabled: row.get(4),
    }
}

#[derive(Clone)]
pub struct PostgresRoutingRuleRepository {
    client: PostgresClient,
}

impl PostgresRoutingRuleRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }

    async fn query_rules(&self, only_enabled: bool) -> DomainResult<Vec<RoutingRule>> {
        let conn = self
            .client
            .connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows = conn
            .query(
                "SELECT rule_id, priority, condition, target_chute, enabled
                 FROM routing_rules
                 WHERE enabled OR NOT $1
                 ORDER BY priority ASC, rule_id ASC",
                &[&only_enabled],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(rows.iter().map(rule_from_row).collect())
    }
}

#[async_trait]
impl RoutingRuleRepository for PostgresRoutingRuleRepository {
    async fn list_rules(&self) -> DomainResult<Vec<RoutingRule>> {
        self.query_rules(false).await
    }

    async fn list_enabled_rules(&self) -> DomainResult<Vec<RoutingRule>> {
        self.query_rules(true).await
    }

    async fn upsert_rule(&self, rule: &RoutingRule) -> DomainResult<()> {
        debug!(rule_id = %rule.rule_id, "upserting routing rule");

        let conn = self
            .client
            .connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        conn.execute(
            "INSERT INTO routing_rules (rule_id, priority, condition, target_chute, enabled, updated_at)
             VALUES ($1, $2, $3, $4, $5, NOW())
             ON CONFLICT (rule_id) DO UPDATE SET
                priority = EXCLUDED.priority,
                condition = EXCLUDED.condition,
                target_chute = EXCLUDED.target_chute,
                enabled = EXCLUDED.enabled,
                updated_at = NOW()",
            &[
                &rule.rule_id,
                &rule.priority,
                &rule.condition,
                &rule.target_chute,
                &rule.enabled,
            ],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

        info!(rule_id = %rule.rule_id, "routing rule stored");
        Ok(())
    }

    async fn delete_rule(&self, rule_id: &str) -> DomainResult<bool> {
        let conn = self
            .client
            .connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let rows_affected = conn
            .execute("DELETE FROM routing_rules WHERE rule_id = $1", &[&rule_id])
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(rows_affected > 0)
    }
}
