use common::domain::TimeoutPolicy;
use std::sync::{Arc, RwLock};

/// Current timeout policy, swapped whole by the config watcher.
///
/// Readers get an `Arc` snapshot so a swap never tears a sweep in half.
#[derive(Debug)]
pub struct TimeoutPolicyCache {
    current: RwLock<Arc<TimeoutPolicy>>,
}

impl TimeoutPolicyCache {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            current: RwLock::new(Arc::new(policy)),
        }
    }

    pub fn current(&self) -> Arc<TimeoutPolicy> {
        match self.current.read() {
            Ok(current) => Arc::clone(&*current),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    pub fn replace(&self, policy: TimeoutPolicy) {
        let policy = Arc::new(policy);
        match self.current.write() {
            Ok(mut current) => *current = policy,
            Err(poisoned) => *poisoned.into_inner() = policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_is_visible_to_later_reads() {
        let cache = TimeoutPolicyCache::new(TimeoutPolicy::default());
        let before = cache.current();

        cache.replace(TimeoutPolicy {
            max_wait_ms: 250,
            ..Default::default()
        });

        assert_eq!(before.max_wait_ms, 10_000);
        assert_eq!(cache.current().max_wait_ms, 250);
    }
}
