use chrono::{DateTime, Utc};
use common::domain::{DomainError, DomainResult, LifecycleStage, Parcel, ScanRecord};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

struct TrackedParcel {
    parcel: Parcel,
    tracked_since: Instant,
}

impl TrackedParcel {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.tracked_since)
    }

    fn awaiting_scan(&self) -> bool {
        self.parcel.stage == LifecycleStage::Created && !self.parcel.is_bound()
    }
}

#[derive(Default)]
struct RegistryState {
    parcels: HashMap<String, TrackedParcel>,
    awaiting_scan: VecDeque<String>,
}

/// What a completion report found in the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The parcel was in flight and is now terminal
    Completed(Parcel),
    /// The parcel had already reached a terminal stage
    AlreadyTerminal(Parcel),
    /// The parcel is not held in memory
    NotTracked,
}

/// In-memory parcels plus the FIFO of parcels waiting for a scan.
///
/// All operations take one mutex and never await while holding it, so
/// binding a scan and timing out a parcel are mutually exclusive.
pub struct ParcelRegistry {
    state: Mutex<RegistryState>,
}

impl Default for ParcelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParcelRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a freshly detected parcel. Returns `false` if the id is already held.
    pub fn insert(&self, parcel: Parcel, now: Instant) -> bool {
        let mut state = self.lock();
        if state.parcels.contains_key(&parcel.parcel_id) {
            return false;
        }

        let parcel_id = parcel.parcel_id.clone();
        state.parcels.insert(
            parcel_id.clone(),
            TrackedParcel {
                parcel,
                tracked_since: now,
            },
        );
        state.awaiting_scan.push_back(parcel_id);
        true
    }

    /// Bind `scan` to the oldest queued parcel at least `min_wait` old.
    ///
    /// The bound parcel leaves the queue and moves to `DwsReceived`. Returns
    /// `None` when no queued parcel is eligible yet.
    pub fn bind_next(
        &self,
        scan: &ScanRecord,
        min_wait: Duration,
        now: Instant,
        at: DateTime<Utc>,
    ) -> Option<Parcel> {
        let mut state = self.lock();
        let RegistryState {
            parcels,
            awaiting_scan,
        } = &mut *state;

        let position = awaiting_scan.iter().position(|parcel_id| {
            parcels
                .get(parcel_id)
                .is_some_and(|tracked| tracked.awaiting_scan() && tracked.age(now) >= min_wait)
        })?;
        let parcel_id = awaiting_scan.remove(position)?;

        let tracked = parcels.get_mut(&parcel_id)?;
        tracked.parcel.bind_scan(scan);
        tracked
            .parcel
            .advance(LifecycleStage::DwsReceived, at)
            .ok()?;
        Some(tracked.parcel.clone())
    }

    /// Record the routing decision for a bound parcel.
    pub fn assign_chute(
        &self,
        parcel_id: &str,
        chute_id: &str,
        at: DateTime<Utc>,
    ) -> DomainResult<Parcel> {
        let mut state = self.lock();
        let tracked = state
            .parcels
            .get_mut(parcel_id)
            .ok_or_else(|| DomainError::ParcelNotFound(parcel_id.to_string()))?;
        tracked.parcel.assign_chute(chute_id, at)?;
        Ok(tracked.parcel.clone())
    }

    /// Apply a completion report and stop tracking the parcel.
    pub fn complete(
        &self,
        parcel_id: &str,
        actual_chute: &str,
        success: bool,
        failure_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> DomainResult<CompletionOutcome> {
        let mut state = self.lock();
        let Some(tracked) = state.parcels.remove(parcel_id) else {
            return Ok(CompletionOutcome::NotTracked);
        };
        state.awaiting_scan.retain(|queued| queued != parcel_id);

        let mut parcel = tracked.parcel;
        if parcel.stage.is_terminal() {
            return Ok(CompletionOutcome::AlreadyTerminal(parcel));
        }
        parcel.complete(actual_chute, success, failure_reason, at)?;
        Ok(CompletionOutcome::Completed(parcel))
    }

    /// Time out every queued parcel older than `max_wait`.
    ///
    /// Expired parcels leave the queue but stay tracked until the sorter
    /// reports their completion or retention evicts them.
    pub fn expire_stalled(
        &self,
        max_wait: Duration,
        exception_chute_id: &str,
        now: Instant,
        at: DateTime<Utc>,
    ) -> Vec<Parcel> {
        let mut state = self.lock();
        let RegistryState {
            parcels,
            awaiting_scan,
        } = &mut *state;

        let mut expired = Vec::new();
        awaiting_scan.retain(|parcel_id| {
            let Some(tracked) = parcels.get_mut(parcel_id) else {
                return false;
            };
            if !tracked.awaiting_scan() || tracked.age(now) <= max_wait {
                return true;
            }
            if tracked.parcel.time_out(exception_chute_id, at).is_ok() {
                expired.push(tracked.parcel.clone());
            }
            false
        });
        expired
    }

    /// Drop every parcel tracked for at least `retention`. Returns their ids.
    pub fn evict_older_than(&self, retention: Duration, now: Instant) -> Vec<String> {
        let mut state = self.lock();
        let stale: Vec<String> = state
            .parcels
            .iter()
            .filter(|(_, tracked)| tracked.age(now) >= retention)
            .map(|(parcel_id, _)| parcel_id.clone())
            .collect();

        if stale.is_empty() {
            return stale;
        }
        for parcel_id in &stale {
            state.parcels.remove(parcel_id);
        }
        state
            .awaiting_scan
            .retain(|queued| !stale.contains(queued));
        stale
    }

    pub fn get(&self, parcel_id: &str) -> Option<Parcel> {
        self.lock()
            .parcels
            .get(parcel_id)
            .map(|tracked| tracked.parcel.clone())
    }

    /// Every tracked parcel, oldest first.
    pub fn snapshot(&self) -> Vec<Parcel> {
        let state = self.lock();
        let mut parcels: Vec<(Instant, Parcel)> = state
            .parcels
            .values()
            .map(|tracked| (tracked.tracked_since, tracked.parcel.clone()))
            .collect();
        parcels.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.parcel_id.cmp(&b.1.parcel_id))
        });
        parcels.into_iter().map(|(_, parcel)| parcel).collect()
    }

    pub fn queue_len(&self) -> usize {
        self.lock().awaiting_scan.len()
    }

    pub fn len(&self) -> usize {
        self.lock().parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().parcels.is_empty()
    }
}
