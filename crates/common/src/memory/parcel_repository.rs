use crate::domain::{DomainResult, Parcel, ParcelRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory implementation of `ParcelRepository` using a `HashMap`.
///
/// Like the PostgreSQL repository, an upsert carrying an older `updated_at`
/// than the stored row is ignored.
pub struct InMemoryParcelRepository {
    parcels: RwLock<HashMap<String, Parcel>>,
}

impl InMemoryParcelRepository {
    pub fn new() -> Self {
        Self {
            parcels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn count(&self) -> usize {
        self.parcels.read().await.len()
    }
}

impl Default for InMemoryParcelRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ParcelRepository for InMemoryParcelRepository {
    async fn get_parcel(&self, parcel_id: &str) -> DomainResult<Option<Parcel>> {
        let parcels = self.parcels.read().await;
        Ok(parcels.get(parcel_id).cloned())
    }

    async fn upsert_parcel(&self, parcel: &Parcel) -> DomainResult<()> {
        let mut parcels = self.parcels.write().await;
        match parcels.get(&parcel.parcel_id) {
            Some(stored) if stored.updated_at > parcel.updated_at => {}
            _ => {
                parcels.insert(parcel.parcel_id.clone(), parcel.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LifecycleStage;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_upsert_and_get() {
        let repo = InMemoryParcelRepository::new();
        let parcel = Parcel::detected("P1", Some("3".to_string()), Utc::now());

        repo.upsert_parcel(&parcel).await.unwrap();

        let stored = repo.get_parcel("P1").await.unwrap().unwrap();
        assert_eq!(stored, parcel);
        assert!(repo.get_parcel("P2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_upsert_is_ignored() {
        let repo = InMemoryParcelRepository::new();
        let created = Utc::now();
        let stale = Parcel::detected("P1", None, created);
        let mut fresh = stale.clone();
        fresh
            .advance(LifecycleStage::Timeout, created + Duration::seconds(1))
            .unwrap();

        repo.upsert_parcel(&fresh).await.unwrap();
        repo.upsert_parcel(&stale).await.unwrap();

        let stored = repo.get_parcel("P1").await.unwrap().unwrap();
        assert_eq!(stored.stage, LifecycleStage::Timeout);
        assert_eq!(repo.count().await, 1);
    }
}
