use crate::domain::result::DomainResult;
use crate::domain::LifecycleStage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One append-only record per lifecycle transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleAuditEntry {
    pub parcel_id: String,
    pub stage: LifecycleStage,
    pub event_time: DateTime<Utc>,
    pub description: String,
}

impl LifecycleAuditEntry {
    pub fn new(
        parcel_id: impl Into<String>,
        stage: LifecycleStage,
        event_time: DateTime<Utc>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            parcel_id: parcel_id.into(),
            stage,
            event_time,
            description: description.into(),
        }
    }
}

/// Repository trait for the lifecycle audit trail
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait LifecycleAuditRepository: Send + Sync {
    /// Append an entry; entries are never updated or deleted
    async fn append_entry(&self, entry: &LifecycleAuditEntry) -> DomainResult<()>;

    /// List entries for a parcel ordered by event time
    async fn list_entries(&self, parcel_id: &str) -> DomainResult<Vec<LifecycleAuditEntry>>;
}
