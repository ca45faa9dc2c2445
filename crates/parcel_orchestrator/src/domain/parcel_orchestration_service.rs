use crate::domain::{
    AssignmentSink, BackgroundJob, BackgroundTasks, CompletionOutcome, ParcelOrchestrationConfig,
    ParcelRegistry, RuleDecision, RuleEvaluator, TimeoutPolicyCache,
};
use chrono::Utc;
use common::domain::{
    AssignmentReason, ChuteAssignment, DomainError, DomainResult, LifecycleAuditEntry,
    LifecycleAuditRepository, Parcel, ParcelRepository, ScanRecord, WcsAdapter, WcsResponse,
};
use sorter_protocol::{ParcelDetectedEvent, SortingCompletedEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// A scan that has been bound to a parcel but not yet routed.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParcel {
    pub parcel: Parcel,
    pub scan: ScanRecord,
}

/// What one supervisor sweep did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub timed_out: Vec<ChuteAssignment>,
    pub evicted: Vec<String>,
}

/// Drives parcels through their lifecycle.
///
/// The registry is authoritative; repositories are updated by background
/// jobs and may briefly lag behind it.
pub struct ParcelOrchestrationService {
    registry: ParcelRegistry,
    rule_evaluator: Arc<RuleEvaluator>,
    timeout_policy: Arc<TimeoutPolicyCache>,
    assignment_sink: Arc<dyn AssignmentSink>,
    parcel_repository: Arc<dyn ParcelRepository>,
    audit_repository: Arc<dyn LifecycleAuditRepository>,
    wcs_adapter: Arc<dyn WcsAdapter>,
    background: BackgroundTasks,
    config: ParcelOrchestrationConfig,
}

impl ParcelOrchestrationService {
    pub fn new(
        rule_evaluator: Arc<RuleEvaluator>,
        timeout_policy: Arc<TimeoutPolicyCache>,
        assignment_sink: Arc<dyn AssignmentSink>,
        parcel_repository: Arc<dyn ParcelRepository>,
        audit_repository: Arc<dyn LifecycleAuditRepository>,
        wcs_adapter: Arc<dyn WcsAdapter>,
        config: ParcelOrchestrationConfig,
    ) -> Self {
        Self {
            registry: ParcelRegistry::new(),
            rule_evaluator,
            timeout_policy,
            assignment_sink,
            parcel_repository,
            audit_repository,
            wcs_adapter,
            background: BackgroundTasks::new(),
            config,
        }
    }

    /// Start tracking a parcel the sorter just reported.
    #[instrument(skip(self, event), fields(parcel_id = %event.parcel_id))]
    pub fn handle_parcel_detected(&self, event: ParcelDetectedEvent) -> DomainResult<()> {
        if event.parcel_id.trim().is_empty() {
            return Err(DomainError::InvalidParcelId(event.parcel_id));
        }

        let detected_at = event.detected_at.min(Utc::now());
        let parcel = Parcel::detected(&event.parcel_id, event.cart_number.clone(), detected_at);
        if !self.registry.insert(parcel.clone(), Instant::now()) {
            warn!(parcel_id = %event.parcel_id, "duplicate parcel detection ignored");
            return Ok(());
        }
        debug!(
            parcel_id = %parcel.parcel_id,
            queued = self.registry.queue_len(),
            "parcel waiting for scan"
        );

        let description = match &event.source_id {
            Some(source_id) => format!("detected by {}", source_id),
            None => "detected".to_string(),
        };
        self.background
            .fan_out(&parcel.parcel_id, self.persistence_jobs(&parcel, description));
        Ok(())
    }

    /// Bind a scan to the oldest eligible parcel.
    ///
    /// Synchronous so that binds happen strictly in scan arrival order.
    pub fn bind_scan(&self, scan: ScanRecord) -> Option<BoundParcel> {
        let policy = self.timeout_policy.current();
        let Some(parcel) =
            self.registry
                .bind_next(&scan, policy.min_wait(), Instant::now(), Utc::now())
        else {
            warn!(
                barcode = %scan.barcode,
                queued = self.registry.queue_len(),
                "no parcel eligible for scan, dropping it"
            );
            return None;
        };
        info!(parcel_id = %parcel.parcel_id, barcode = %scan.barcode, "scan bound to parcel");

        let mut jobs =
            self.persistence_jobs(&parcel, format!("scan bound, barcode {}", scan.barcode));
        if self.config.notify_wcs_on_scan {
            let wcs_adapter = Arc::clone(&self.wcs_adapter);
            let barcode = scan.barcode.clone();
            jobs.push(BackgroundJob::new("wcs_scan_parcel", async move {
                wcs_adapter.scan_parcel(&barcode).await.map(|_| ())
            }));
        }
        self.background.fan_out(&parcel.parcel_id, jobs);

        Some(BoundParcel { parcel, scan })
    }

    /// Decide a chute for a bound parcel and push it to the sorter.
    #[instrument(skip(self, bound), fields(parcel_id = %bound.parcel.parcel_id))]
    pub async fn route_bound_parcel(&self, bound: BoundParcel) -> DomainResult<ChuteAssignment> {
        let BoundParcel { parcel, scan } = bound;

        let wcs_response = self.request_wcs_chute(&parcel, &scan).await;
        let decision = self
            .rule_evaluator
            .evaluate(&parcel, &scan, wcs_response.as_ref());

        let (chute_id, reason, rule_id) = match decision {
            RuleDecision::Matched { rule_id, chute_id } => {
                (chute_id, AssignmentReason::Rule, Some(rule_id))
            }
            RuleDecision::NoDecision => match wcs_chute(wcs_response.as_ref()) {
                Some(chute_id) => (chute_id, AssignmentReason::WcsResponse, None),
                None => (
                    self.timeout_policy.current().exception_chute_id.clone(),
                    AssignmentReason::Fallback,
                    None,
                ),
            },
        };

        let assigned_at = Utc::now();
        let assigned = self
            .registry
            .assign_chute(&parcel.parcel_id, &chute_id, assigned_at)?;

        let assignment = ChuteAssignment {
            parcel_id: assigned.parcel_id.clone(),
            chute_id,
            reason,
            rule_id,
            barcode: Some(scan.barcode),
            assigned_at,
        };
        self.dispatch(&assignment).await;

        let description = match &assignment.rule_id {
            Some(rule_id) => format!("chute {} assigned by rule {}", assignment.chute_id, rule_id),
            None => format!("chute {} assigned ({})", assignment.chute_id, assignment.reason),
        };
        self.background
            .fan_out(&assigned.parcel_id, self.persistence_jobs(&assigned, description));

        Ok(assignment)
    }

    /// Bind and route in one step. `Ok(None)` when the scan was dropped.
    pub async fn handle_scan(&self, scan: ScanRecord) -> DomainResult<Option<ChuteAssignment>> {
        match self.bind_scan(scan) {
            Some(bound) => self.route_bound_parcel(bound).await.map(Some),
            None => Ok(None),
        }
    }

    /// Apply the sorter's completion report.
    ///
    /// Parcels no longer in memory are looked up in the repository.
    #[instrument(skip(self, event), fields(parcel_id = %event.parcel_id))]
    pub async fn handle_sorting_completed(&self, event: SortingCompletedEvent) -> DomainResult<()> {
        if self.complete_tracked(&event)? {
            return Ok(());
        }
        self.complete_untracked(event).await
    }

    /// Complete a parcel held in memory without touching the store.
    ///
    /// Returns `false` when the registry does not know the parcel; the caller
    /// decides whether and where to run [`Self::complete_untracked`].
    pub fn complete_tracked(&self, event: &SortingCompletedEvent) -> DomainResult<bool> {
        let completed_at = event.completed_at.max(Utc::now());
        match self.registry.complete(
            &event.parcel_id,
            &event.actual_chute,
            event.success,
            event.failure_reason.as_deref(),
            completed_at,
        )? {
            CompletionOutcome::NotTracked => Ok(false),
            outcome => {
                self.apply_completion(event, outcome, completed_at)?;
                Ok(true)
            }
        }
    }

    /// Complete a parcel that has left the registry, loading it from the store.
    #[instrument(skip(self, event), fields(parcel_id = %event.parcel_id))]
    pub async fn complete_untracked(&self, event: SortingCompletedEvent) -> DomainResult<()> {
        let completed_at = event.completed_at.max(Utc::now());
        let outcome = self.complete_from_store(&event, completed_at).await?;
        self.apply_completion(&event, outcome, completed_at)
    }

    fn apply_completion(
        &self,
        event: &SortingCompletedEvent,
        outcome: CompletionOutcome,
        completed_at: chrono::DateTime<Utc>,
    ) -> DomainResult<()> {
        match outcome {
            CompletionOutcome::Completed(parcel) => {
                info!(
                    parcel_id = %parcel.parcel_id,
                    actual_chute = %event.actual_chute,
                    success = event.success,
                    stage = %parcel.stage,
                    "sorting completed"
                );

                let description = if event.success {
                    format!("landed in chute {}", event.actual_chute)
                } else {
                    format!(
                        "sorting failed at chute {}: {}",
                        event.actual_chute,
                        event.failure_reason.as_deref().unwrap_or("unknown")
                    )
                };
                let mut jobs = self.persistence_jobs(&parcel, description);

                if event.success {
                    if let Some(barcode) = parcel.barcode.clone() {
                        let wcs_adapter = Arc::clone(&self.wcs_adapter);
                        let parcel_id = parcel.parcel_id.clone();
                        let chute_id = event.actual_chute.clone();
                        jobs.push(BackgroundJob::new("wcs_notify_landing", async move {
                            wcs_adapter
                                .notify_chute_landing(&parcel_id, &chute_id, &barcode)
                                .await
                                .map(|_| ())
                        }));
                    }
                }
                self.background.fan_out(&parcel.parcel_id, jobs);
            }
            CompletionOutcome::AlreadyTerminal(parcel) => {
                info!(
                    parcel_id = %parcel.parcel_id,
                    stage = %parcel.stage,
                    "completion for terminal parcel, recording audit entry only"
                );
                let entry = LifecycleAuditEntry::new(
                    &parcel.parcel_id,
                    parcel.stage,
                    completed_at,
                    format!(
                        "completion reported after {}: chute {}, success {}",
                        parcel.stage, event.actual_chute, event.success
                    ),
                );
                let audit_repository = Arc::clone(&self.audit_repository);
                self.background.fan_out(
                    &parcel.parcel_id,
                    vec![BackgroundJob::new("append_audit", async move {
                        audit_repository.append_entry(&entry).await
                    })],
                );
            }
            CompletionOutcome::NotTracked => {
                return Err(DomainError::ParcelNotFound(event.parcel_id.clone()));
            }
        }

        Ok(())
    }

    /// Time out stalled parcels and evict parcels past retention.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> SweepReport {
        let policy = self.timeout_policy.current();
        let now = Instant::now();
        let mut report = SweepReport::default();

        if policy.enabled {
            let expired = self.registry.expire_stalled(
                policy.max_wait(),
                &policy.exception_chute_id,
                now,
                Utc::now(),
            );
            for parcel in expired {
                warn!(
                    parcel_id = %parcel.parcel_id,
                    max_wait_ms = policy.max_wait_ms,
                    exception_chute_id = %policy.exception_chute_id,
                    "no scan received in time, routing parcel to exception chute"
                );
                let assignment = ChuteAssignment {
                    parcel_id: parcel.parcel_id.clone(),
                    chute_id: policy.exception_chute_id.clone(),
                    reason: AssignmentReason::Timeout,
                    rule_id: None,
                    barcode: None,
                    assigned_at: parcel.updated_at,
                };
                self.dispatch(&assignment).await;

                let description = format!(
                    "no scan within {}ms, routed to {}",
                    policy.max_wait_ms, policy.exception_chute_id
                );
                self.background
                    .fan_out(&parcel.parcel_id, self.persistence_jobs(&parcel, description));
                report.timed_out.push(assignment);
            }
        }

        report.evicted = self
            .registry
            .evict_older_than(self.config.registry_retention(), now);
        for parcel_id in &report.evicted {
            warn!(parcel_id = %parcel_id, "parcel exceeded registry retention, evicted from memory");
        }

        report
    }

    pub fn get_parcel(&self, parcel_id: &str) -> Option<Parcel> {
        self.registry.get(parcel_id)
    }

    pub fn snapshot(&self) -> Vec<Parcel> {
        self.registry.snapshot()
    }

    pub fn queue_len(&self) -> usize {
        self.registry.queue_len()
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    /// Wait up to `timeout` for in-flight background writes.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!(in_flight = self.background.in_flight(), "waiting for background writes");
        self.background.shutdown(timeout).await
    }

    async fn complete_from_store(
        &self,
        event: &SortingCompletedEvent,
        completed_at: chrono::DateTime<Utc>,
    ) -> DomainResult<CompletionOutcome> {
        let Some(mut parcel) = self.parcel_repository.get_parcel(&event.parcel_id).await? else {
            return Err(DomainError::ParcelNotFound(event.parcel_id.clone()));
        };
        debug!(parcel_id = %parcel.parcel_id, stage = %parcel.stage, "completing parcel loaded from repository");

        if parcel.stage.is_terminal() {
            return Ok(CompletionOutcome::AlreadyTerminal(parcel));
        }
        parcel.complete(
            &event.actual_chute,
            event.success,
            event.failure_reason.as_deref(),
            completed_at,
        )?;
        Ok(CompletionOutcome::Completed(parcel))
    }

    async fn request_wcs_chute(&self, parcel: &Parcel, scan: &ScanRecord) -> Option<WcsResponse> {
        if !self.config.request_chute_from_wcs {
            return None;
        }

        let request = self
            .wcs_adapter
            .request_chute(&parcel.parcel_id, scan, None);
        match tokio::time::timeout(self.config.wcs_timeout(), request).await {
            Ok(Ok(response)) => {
                debug!(
                    parcel_id = %parcel.parcel_id,
                    success = response.success,
                    code = %response.code,
                    "WCS chute response"
                );
                Some(response)
            }
            Ok(Err(e)) => {
                warn!(parcel_id = %parcel.parcel_id, error = %e, "WCS chute request failed");
                None
            }
            Err(_) => {
                warn!(
                    parcel_id = %parcel.parcel_id,
                    timeout_ms = self.config.wcs_timeout_ms,
                    "WCS chute request timed out"
                );
                None
            }
        }
    }

    async fn dispatch(&self, assignment: &ChuteAssignment) {
        if self
            .assignment_sink
            .send_chute_assignment(assignment)
            .await
        {
            info!(
                parcel_id = %assignment.parcel_id,
                chute_id = %assignment.chute_id,
                reason = %assignment.reason,
                "chute assignment sent"
            );
        } else {
            warn!(
                parcel_id = %assignment.parcel_id,
                chute_id = %assignment.chute_id,
                reason = %assignment.reason,
                "chute assignment not delivered"
            );
        }
    }

    fn persistence_jobs(&self, parcel: &Parcel, description: String) -> Vec<BackgroundJob> {
        let parcel_repository = Arc::clone(&self.parcel_repository);
        let audit_repository = Arc::clone(&self.audit_repository);
        let snapshot = parcel.clone();
        let entry = LifecycleAuditEntry::new(
            &parcel.parcel_id,
            parcel.stage,
            parcel.updated_at,
            description,
        );

        vec![
            BackgroundJob::new("upsert_parcel", async move {
                parcel_repository.upsert_parcel(&snapshot).await
            }),
            BackgroundJob::new("append_audit", async move {
                audit_repository.append_entry(&entry).await
            }),
        ]
    }
}

fn wcs_chute(response: Option<&WcsResponse>) -> Option<String> {
    response
        .filter(|response| response.success)
        .and_then(|response| response.chute_id.clone())
        .filter(|chute_id| !chute_id.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::domain::{
        LifecycleStage, MockParcelRepository, MockWcsAdapter, NoopWcsAdapter, RoutingRule,
        TimeoutPolicy,
    };
    use common::memory::{
        InMemoryLifecycleAuditRepository, InMemoryParcelRepository, InMemoryRoutingRuleRepository,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<ChuteAssignment>>,
    }

    impl RecordingSink {
        fn sent(&self) -> Vec<ChuteAssignment> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AssignmentSink for RecordingSink {
        async fn send_chute_assignment(&self, assignment: &ChuteAssignment) -> bool {
            self.sent.lock().unwrap().push(assignment.clone());
            true
        }
    }

    struct SlowWcs;

    #[async_trait]
    impl WcsAdapter for SlowWcs {
        async fn request_chute(
            &self,
            _parcel_id: &str,
            _scan: &ScanRecord,
            _ocr: Option<String>,
        ) -> DomainResult<WcsResponse> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(WcsResponse::ok(Some("CH-SLOW".to_string())))
        }

        async fn notify_chute_landing(
            &self,
            _parcel_id: &str,
            _chute_id: &str,
            _barcode: &str,
        ) -> DomainResult<WcsResponse> {
            Ok(WcsResponse::ok(None))
        }

        async fn scan_parcel(&self, _barcode: &str) -> DomainResult<WcsResponse> {
            Ok(WcsResponse::ok(None))
        }
    }

    struct Harness {
        service: ParcelOrchestrationService,
        sink: Arc<RecordingSink>,
        parcels: Arc<InMemoryParcelRepository>,
        audit: Arc<InMemoryLifecycleAuditRepository>,
    }

    fn harness_with(
        rules: Vec<RoutingRule>,
        policy: TimeoutPolicy,
        wcs_adapter: Arc<dyn WcsAdapter>,
        config: ParcelOrchestrationConfig,
    ) -> Harness {
        let evaluator = Arc::new(RuleEvaluator::new(Arc::new(
            InMemoryRoutingRuleRepository::new(),
        )));
        evaluator.install(rules);
        let sink = Arc::new(RecordingSink::default());
        let parcels = Arc::new(InMemoryParcelRepository::new());
        let audit = Arc::new(InMemoryLifecycleAuditRepository::new());

        let service = ParcelOrchestrationService::new(
            evaluator,
            Arc::new(TimeoutPolicyCache::new(policy)),
            sink.clone(),
            parcels.clone(),
            audit.clone(),
            wcs_adapter,
            config,
        );
        Harness {
            service,
            sink,
            parcels,
            audit,
        }
    }

    fn harness(rules: Vec<RoutingRule>) -> Harness {
        harness_with(
            rules,
            TimeoutPolicy::default(),
            Arc::new(NoopWcsAdapter),
            ParcelOrchestrationConfig::default(),
        )
    }

    fn rule(rule_id: &str, priority: i32, condition: &str, chute: &str) -> RoutingRule {
        RoutingRule {
            rule_id: rule_id.to_string(),
            priority,
            condition: condition.to_string(),
            target_chute: chute.to_string(),
            enabled: true,
        }
    }

    fn detected(parcel_id: &str) -> ParcelDetectedEvent {
        ParcelDetectedEvent {
            parcel_id: parcel_id.to_string(),
            source_id: Some("sorter-1".to_string()),
            cart_number: None,
            detected_at: Utc::now(),
        }
    }

    fn scan(barcode: &str, weight: f64) -> ScanRecord {
        let mut scan = ScanRecord::new(barcode, Utc::now());
        scan.weight = Some(weight);
        scan
    }

    fn completed(parcel_id: &str, chute: &str, success: bool) -> SortingCompletedEvent {
        SortingCompletedEvent {
            parcel_id: parcel_id.to_string(),
            actual_chute: chute.to_string(),
            success,
            failure_reason: (!success).then(|| "jam".to_string()),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_scan_routes_by_rule_and_persists_every_stage() {
        let h = harness(vec![
            rule("heavy", 1, "weight > 10.0", "CH-HEAVY"),
            rule("default", 9, "true", "CH-DEFAULT"),
        ]);

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        let assignment = h
            .service
            .handle_scan(scan("ABC", 12.0))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(assignment.chute_id, "CH-HEAVY");
        assert_eq!(assignment.reason, AssignmentReason::Rule);
        assert_eq!(assignment.rule_id.as_deref(), Some("heavy"));
        assert_eq!(assignment.barcode.as_deref(), Some("ABC"));
        assert_eq!(h.sink.sent(), vec![assignment]);

        let in_memory = h.service.get_parcel("P1").unwrap();
        assert_eq!(in_memory.stage, LifecycleStage::ChuteAssigned);
        assert_eq!(in_memory.weight, Some(12.0));

        h.service.background().wait_idle().await;
        let stored = h.parcels.get_parcel("P1").await.unwrap().unwrap();
        assert_eq!(stored.stage, LifecycleStage::ChuteAssigned);
        let stages: Vec<_> = h
            .audit
            .list_entries("P1")
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.stage)
            .collect();
        assert_eq!(
            stages,
            vec![
                LifecycleStage::Created,
                LifecycleStage::DwsReceived,
                LifecycleStage::ChuteAssigned
            ]
        );
    }

    #[tokio::test]
    async fn test_scan_without_waiting_parcel_is_dropped() {
        let h = harness(vec![rule("default", 1, "true", "CH1")]);

        assert!(h.service.handle_scan(scan("ABC", 1.0)).await.unwrap().is_none());
        assert!(h.sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_detection_is_ignored() {
        let h = harness(vec![]);

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        h.service.handle_parcel_detected(detected("P1")).unwrap();

        assert_eq!(h.service.queue_len(), 1);
        assert_eq!(h.service.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_parcel_id_is_rejected() {
        let h = harness(vec![]);

        assert!(matches!(
            h.service.handle_parcel_detected(detected(" ")),
            Err(DomainError::InvalidParcelId(_))
        ));
        assert_eq!(h.service.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_no_rule_falls_back_to_exception_chute() {
        let h = harness(vec![rule("heavy", 1, "weight > 10.0", "CH-HEAVY")]);

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        let assignment = h
            .service
            .handle_scan(scan("ABC", 1.0))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(assignment.chute_id, "EXCEPTION");
        assert_eq!(assignment.reason, AssignmentReason::Fallback);
        assert!(assignment.rule_id.is_none());
    }

    #[tokio::test]
    async fn test_wcs_chute_used_when_no_rule_matches() {
        let mut wcs = MockWcsAdapter::new();
        wcs.expect_request_chute()
            .times(1)
            .returning(|_, _, _| Ok(WcsResponse::ok(Some("CH7".to_string()))));

        let h = harness_with(
            vec![],
            TimeoutPolicy::default(),
            Arc::new(wcs),
            ParcelOrchestrationConfig {
                request_chute_from_wcs: true,
                ..Default::default()
            },
        );

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        let assignment = h
            .service
            .handle_scan(scan("ABC", 1.0))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(assignment.chute_id, "CH7");
        assert_eq!(assignment.reason, AssignmentReason::WcsResponse);
    }

    #[tokio::test]
    async fn test_rules_can_read_wcs_response() {
        let mut wcs = MockWcsAdapter::new();
        wcs.expect_request_chute()
            .returning(|_, _, _| Ok(WcsResponse::ok(Some("CH7".to_string()))));

        let h = harness_with(
            vec![rule("wcs-ok", 1, "wcs.success && wcs.chute_id == 'CH7'", "CH-OVERRIDE")],
            TimeoutPolicy::default(),
            Arc::new(wcs),
            ParcelOrchestrationConfig {
                request_chute_from_wcs: true,
                ..Default::default()
            },
        );

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        let assignment = h
            .service
            .handle_scan(scan("ABC", 1.0))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(assignment.chute_id, "CH-OVERRIDE");
        assert_eq!(assignment.reason, AssignmentReason::Rule);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_wcs_falls_back_after_timeout() {
        let h = harness_with(
            vec![],
            TimeoutPolicy::default(),
            Arc::new(SlowWcs),
            ParcelOrchestrationConfig {
                request_chute_from_wcs: true,
                wcs_timeout_ms: 200,
                ..Default::default()
            },
        );

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        let assignment = h
            .service
            .handle_scan(scan("ABC", 1.0))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(assignment.reason, AssignmentReason::Fallback);
        assert_eq!(assignment.chute_id, "EXCEPTION");
    }

    #[tokio::test]
    async fn test_successful_completion_notifies_wcs_landing() {
        let mut wcs = MockWcsAdapter::new();
        wcs.expect_notify_chute_landing()
            .withf(|parcel_id, chute_id, barcode| {
                parcel_id == "P1" && chute_id == "CH1" && barcode == "ABC"
            })
            .times(1)
            .returning(|_, _, _| Ok(WcsResponse::ok(None)));

        let h = harness_with(
            vec![rule("default", 1, "true", "CH1")],
            TimeoutPolicy::default(),
            Arc::new(wcs),
            ParcelOrchestrationConfig::default(),
        );

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        h.service.handle_scan(scan("ABC", 1.0)).await.unwrap();
        h.service
            .handle_sorting_completed(completed("P1", "CH1", true))
            .await
            .unwrap();
        h.service.background().wait_idle().await;

        assert!(h.service.get_parcel("P1").is_none());
        let stored = h.parcels.get_parcel("P1").await.unwrap().unwrap();
        assert_eq!(stored.stage, LifecycleStage::Landed);
        assert_eq!(stored.actual_chute.as_deref(), Some("CH1"));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_completion_skips_landing_notification() {
        let mut wcs = MockWcsAdapter::new();
        wcs.expect_notify_chute_landing().times(0);

        let h = harness_with(
            vec![rule("default", 1, "true", "CH1")],
            TimeoutPolicy::default(),
            Arc::new(wcs),
            ParcelOrchestrationConfig::default(),
        );

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        h.service.handle_scan(scan("ABC", 1.0)).await.unwrap();
        h.service
            .handle_sorting_completed(completed("P1", "CH1", false))
            .await
            .unwrap();
        h.service.background().wait_idle().await;

        let stored = h.parcels.get_parcel("P1").await.unwrap().unwrap();
        assert_eq!(stored.stage, LifecycleStage::Timeout);
        assert_eq!(stored.status, "failed: jam");
    }

    #[tokio::test]
    async fn test_completion_falls_back_to_repository() {
        let h = harness(vec![]);
        let at = Utc::now();
        let mut parcel = Parcel::detected("P9", None, at);
        parcel.advance(LifecycleStage::DwsReceived, at).unwrap();
        parcel.assign_chute("CH2", at).unwrap();
        h.parcels.upsert_parcel(&parcel).await.unwrap();

        h.service
            .handle_sorting_completed(completed("P9", "CH2", true))
            .await
            .unwrap();
        h.service.background().wait_idle().await;

        let stored = h.parcels.get_parcel("P9").await.unwrap().unwrap();
        assert_eq!(stored.stage, LifecycleStage::Landed);
    }

    #[tokio::test]
    async fn test_complete_tracked_leaves_untracked_parcels_to_caller() {
        let h = harness(vec![]);
        h.service.handle_parcel_detected(detected("P1")).unwrap();

        assert!(!h.service.complete_tracked(&completed("P9", "CH2", true)).unwrap());
        assert!(h.service.complete_tracked(&completed("P1", "CH2", true)).unwrap());
        assert!(h.service.get_parcel("P1").is_none());
    }

    #[tokio::test]
    async fn test_completion_for_unknown_parcel_is_not_found() {
        let h = harness(vec![]);

        let result = h
            .service
            .handle_sorting_completed(completed("ghost", "CH1", true))
            .await;

        assert!(matches!(result, Err(DomainError::ParcelNotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_times_out_stalled_parcel() {
        let h = harness_with(
            vec![],
            TimeoutPolicy {
                max_wait_ms: 500,
                exception_chute_id: "EXC".to_string(),
                ..Default::default()
            },
            Arc::new(NoopWcsAdapter),
            ParcelOrchestrationConfig::default(),
        );

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        assert!(h.service.sweep().await.timed_out.is_empty());

        tokio::time::advance(Duration::from_millis(501)).await;
        let report = h.service.sweep().await;

        assert_eq!(report.timed_out.len(), 1);
        assert_eq!(report.timed_out[0].reason, AssignmentReason::Timeout);
        assert_eq!(report.timed_out[0].chute_id, "EXC");
        assert_eq!(h.sink.sent(), report.timed_out);
        assert_eq!(
            h.service.get_parcel("P1").unwrap().stage,
            LifecycleStage::Timeout
        );
        assert_eq!(h.service.queue_len(), 0);

        // a scan arriving now has nothing to bind to
        assert!(h.service.bind_scan(scan("LATE", 1.0)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_after_timeout_only_appends_audit() {
        let h = harness_with(
            vec![],
            TimeoutPolicy {
                max_wait_ms: 100,
                ..Default::default()
            },
            Arc::new(NoopWcsAdapter),
            ParcelOrchestrationConfig::default(),
        );

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        h.service.sweep().await;
        h.service.background().wait_idle().await;
        let before = h.parcels.get_parcel("P1").await.unwrap().unwrap();

        h.service
            .handle_sorting_completed(completed("P1", "EXCEPTION", true))
            .await
            .unwrap();
        h.service.background().wait_idle().await;

        let after = h.parcels.get_parcel("P1").await.unwrap().unwrap();
        assert_eq!(before, after);
        let entries = h.audit.list_entries("P1").await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[2].description.contains("completion reported"));
        assert!(h.service.get_parcel("P1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_disabled_policy_leaves_parcels_waiting() {
        let h = harness_with(
            vec![],
            TimeoutPolicy {
                enabled: false,
                max_wait_ms: 100,
                ..Default::default()
            },
            Arc::new(NoopWcsAdapter),
            ParcelOrchestrationConfig::default(),
        );

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert!(h.service.sweep().await.timed_out.is_empty());
        assert_eq!(h.service.queue_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_past_retention() {
        let h = harness_with(
            vec![rule("default", 1, "true", "CH1")],
            TimeoutPolicy::default(),
            Arc::new(NoopWcsAdapter),
            ParcelOrchestrationConfig {
                registry_retention_ms: 1_000,
                ..Default::default()
            },
        );

        h.service.handle_parcel_detected(detected("P1")).unwrap();
        h.service.handle_scan(scan("ABC", 1.0)).await.unwrap();
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let report = h.service.sweep().await;

        assert_eq!(report.evicted, vec!["P1".to_string()]);
        assert!(h.service.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_memory_state() {
        let mut parcels = MockParcelRepository::new();
        parcels
            .expect_upsert_parcel()
            .returning(|_| Err(DomainError::RepositoryError(anyhow::anyhow!("db down"))));

        let evaluator = Arc::new(RuleEvaluator::new(Arc::new(
            InMemoryRoutingRuleRepository::new(),
        )));
        evaluator.install(vec![rule("default", 1, "true", "CH1")]);
        let sink = Arc::new(RecordingSink::default());
        let service = ParcelOrchestrationService::new(
            evaluator,
            Arc::new(TimeoutPolicyCache::new(TimeoutPolicy::default())),
            sink.clone(),
            Arc::new(parcels),
            Arc::new(InMemoryLifecycleAuditRepository::new()),
            Arc::new(NoopWcsAdapter),
            ParcelOrchestrationConfig::default(),
        );

        service.handle_parcel_detected(detected("P1")).unwrap();
        let assignment = service.handle_scan(scan("ABC", 1.0)).await.unwrap().unwrap();
        service.background().wait_idle().await;

        assert_eq!(assignment.chute_id, "CH1");
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(
            service.get_parcel("P1").unwrap().stage,
            LifecycleStage::ChuteAssigned
        );
    }
}
