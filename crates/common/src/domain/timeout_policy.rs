use crate::domain::result::DomainResult;
use crate::domain::DomainError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Fixed row id of the singleton timeout policy.
pub const TIMEOUT_POLICY_ID: i32 = 1;

/// Singleton policy governing scan correlation and stalled-parcel handling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub enabled: bool,
    /// Minimum parcel age before a scan may bind to it
    pub min_wait_ms: u64,
    /// Age after which a parcel still waiting for a scan is timed out
    pub max_wait_ms: u64,
    /// Chute used for timed-out parcels and as the no-decision fallback
    pub exception_chute_id: String,
    pub check_interval_ms: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_wait_ms: 0,
            max_wait_ms: 10_000,
            exception_chute_id: "EXCEPTION".to_string(),
            check_interval_ms: 500,
        }
    }
}

impl TimeoutPolicy {
    pub fn min_wait(&self) -> Duration {
        Duration::from_millis(self.min_wait_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Sweep interval, never below 10ms so a zero value cannot spin the loop.
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(10))
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.exception_chute_id.trim().is_empty() {
            return Err(DomainError::InvalidTimeoutPolicy(
                "exception_chute_id must not be empty".to_string(),
            ));
        }
        if self.min_wait_ms > self.max_wait_ms {
            return Err(DomainError::InvalidTimeoutPolicy(format!(
                "min_wait_ms ({}) exceeds max_wait_ms ({})",
                self.min_wait_ms, self.max_wait_ms
            )));
        }
        Ok(())
    }
}

/// Hash a timeout policy for change detection.
pub fn hash_timeout_policy(policy: &TimeoutPolicy) -> String {
    let mut hasher = DefaultHasher::new();
    policy.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

/// Repository trait for the singleton timeout policy
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TimeoutPolicyRepository: Send + Sync {
    /// Get the policy, `None` if it was never stored
    async fn get_timeout_policy(&self) -> DomainResult<Option<TimeoutPolicy>>;

    /// Insert or replace the policy
    async fn upsert_timeout_policy(&self, policy: &TimeoutPolicy) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        assert!(TimeoutPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_min_wait_above_max_wait_rejected() {
        let policy = TimeoutPolicy {
            min_wait_ms: 5_000,
            max_wait_ms: 1_000,
            ..Default::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(DomainError::InvalidTimeoutPolicy(_))
        ));
    }

    #[test]
    fn test_check_interval_has_floor() {
        let policy = TimeoutPolicy {
            check_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(policy.check_interval(), Duration::from_millis(10));
    }
}
