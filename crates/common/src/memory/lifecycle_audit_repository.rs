use crate::domain::{DomainResult, LifecycleAuditEntry, LifecycleAuditRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory append-only audit trail keyed by parcel.
pub struct InMemoryLifecycleAuditRepository {
    entries: RwLock<HashMap<String, Vec<LifecycleAuditEntry>>>,
}

impl InMemoryLifecycleAuditRepository {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryLifecycleAuditRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LifecycleAuditRepository for InMemoryLifecycleAuditRepository {
    async fn append_entry(&self, entry: &LifecycleAuditEntry) -> DomainResult<()> {
        let mut entries = self.entries.write().await;
        let trail = entries.entry(entry.parcel_id.clone()).or_default();

        let duplicate = trail
            .iter()
            .any(|e| e.stage == entry.stage && e.event_time == entry.event_time);
        if !duplicate {
            trail.push(entry.clone());
        }
        Ok(())
    }

    async fn list_entries(&self, parcel_id: &str) -> DomainResult<Vec<LifecycleAuditEntry>> {
        let entries = self.entries.read().await;
        let mut trail = entries.get(parcel_id).cloned().unwrap_or_default();
        // Stable sort keeps append order for entries sharing a timestamp
        trail.sort_by_key(|e| e.event_time);
        Ok(trail)
    }
}
