use crate::domain::{
    ConfigWatcher, EndpointReloader, ParcelOrchestrationConfig, ParcelOrchestrationService,
    RuleEvaluator, SorterEventGlue, TimeoutPolicyCache, TimeoutSupervisor,
};
use common::domain::{
    EndpointConfig, EndpointConfigRepository, LifecycleAuditRepository, ParcelRepository,
    RoutingRuleRepository, ScanRecord, TimeoutPolicy, TimeoutPolicyRepository, WcsAdapter,
};
use sorter_protocol::{EndpointManager, SorterEndpointFactory};
use sortline_runner::{AppProcess, Closer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Storage the orchestrator reads and writes.
#[derive(Clone)]
pub struct ParcelOrchestratorRepositories {
    pub parcels: Arc<dyn ParcelRepository>,
    pub audit: Arc<dyn LifecycleAuditRepository>,
    pub routing_rules: Arc<dyn RoutingRuleRepository>,
    pub endpoint_config: Arc<dyn EndpointConfigRepository>,
    pub timeout_policy: Arc<dyn TimeoutPolicyRepository>,
}

#[derive(Debug, Clone)]
pub struct ParcelOrchestratorConfig {
    pub orchestration: ParcelOrchestrationConfig,
    /// Used while no endpoint configuration is stored
    pub default_endpoint: EndpointConfig,
    /// Used while no timeout policy is stored
    pub default_timeout_policy: TimeoutPolicy,
    pub event_buffer: usize,
}

/// Processes and shutdown hook handed to the runner.
pub struct ParcelOrchestratorProcesses {
    pub processes: Vec<(&'static str, AppProcess)>,
    pub closer: Closer,
}

/// Wires the sorter endpoint, orchestration service and its loops together.
pub struct ParcelOrchestrator {
    service: Arc<ParcelOrchestrationService>,
    endpoint_manager: Arc<EndpointManager>,
    glue: SorterEventGlue,
    supervisor: TimeoutSupervisor,
    watcher: ConfigWatcher,
    scan_sender: mpsc::Sender<ScanRecord>,
    config: ParcelOrchestratorConfig,
}

impl ParcelOrchestrator {
    pub async fn new(
        repositories: ParcelOrchestratorRepositories,
        wcs_adapter: Arc<dyn WcsAdapter>,
        endpoint_factory: SorterEndpointFactory,
        config: ParcelOrchestratorConfig,
    ) -> anyhow::Result<Self> {
        debug!("initializing parcel orchestrator");

        let endpoint_manager = Arc::new(EndpointManager::new(
            Arc::clone(&repositories.endpoint_config),
            endpoint_factory,
            config.default_endpoint.clone(),
            config.event_buffer,
        ));
        let events = endpoint_manager
            .take_event_receiver()
            .ok_or_else(|| anyhow::anyhow!("sorter event receiver already taken"))?;

        let rule_evaluator = Arc::new(RuleEvaluator::new(Arc::clone(
            &repositories.routing_rules,
        )));
        let timeout_policy = Arc::new(TimeoutPolicyCache::new(
            config.default_timeout_policy.clone(),
        ));

        let endpoint_reloader: Arc<dyn EndpointReloader> = endpoint_manager.clone();
        let mut watcher = ConfigWatcher::new(
            Arc::clone(&repositories.routing_rules),
            Arc::clone(&repositories.timeout_policy),
            Arc::clone(&repositories.endpoint_config),
            Arc::clone(&rule_evaluator),
            Arc::clone(&timeout_policy),
            endpoint_reloader,
            config.default_timeout_policy.clone(),
            config.orchestration.config_poll_interval(),
        );
        let loaded = watcher.prime().await;
        info!(
            rules = rule_evaluator.rule_count(),
            rules_loaded = loaded.rules,
            timeout_policy_loaded = loaded.timeout_policy,
            "runtime configuration loaded"
        );

        let service = Arc::new(ParcelOrchestrationService::new(
            rule_evaluator,
            Arc::clone(&timeout_policy),
            endpoint_manager.clone(),
            repositories.parcels,
            repositories.audit,
            wcs_adapter,
            config.orchestration.clone(),
        ));

        let (scan_sender, scans) = mpsc::channel(config.orchestration.scan_buffer.max(1));
        let glue = SorterEventGlue::new(Arc::clone(&service), events, scans);
        let supervisor = TimeoutSupervisor::new(Arc::clone(&service), timeout_policy);

        Ok(Self {
            service,
            endpoint_manager,
            glue,
            supervisor,
            watcher,
            scan_sender,
            config,
        })
    }

    /// Sender for scans from the DWS reader.
    pub fn scan_sender(&self) -> mpsc::Sender<ScanRecord> {
        self.scan_sender.clone()
    }

    pub fn service(&self) -> Arc<ParcelOrchestrationService> {
        Arc::clone(&self.service)
    }

    pub fn endpoint_manager(&self) -> Arc<EndpointManager> {
        Arc::clone(&self.endpoint_manager)
    }

    pub fn into_runner_processes(self) -> ParcelOrchestratorProcesses {
        // Sorter endpoint: started here so it shares the runner's lifetime
        let sorter_endpoint: AppProcess = {
            let endpoint_manager = Arc::clone(&self.endpoint_manager);
            Box::new(move |ctx| {
                Box::pin(async move {
                    endpoint_manager.start().await?;
                    ctx.cancelled().await;
                    endpoint_manager.stop().await?;
                    Ok::<(), anyhow::Error>(())
                })
            })
        };

        let sorter_event_glue: AppProcess = {
            let glue = self.glue;
            Box::new(move |ctx| Box::pin(async move { glue.run(ctx).await }))
        };

        let timeout_supervisor: AppProcess = {
            let supervisor = self.supervisor;
            Box::new(move |ctx| Box::pin(async move { supervisor.run(ctx).await }))
        };

        let config_watcher: AppProcess = {
            let watcher = self.watcher;
            Box::new(move |ctx| Box::pin(async move { watcher.run(ctx).await }))
        };

        let closer: Closer = {
            let service = self.service;
            let timeout = self.config.orchestration.background_shutdown_timeout();
            Box::new(move || {
                Box::pin(async move {
                    if !service.shutdown(timeout).await {
                        warn!("shutting down with background writes still in flight");
                    }
                    Ok::<(), anyhow::Error>(())
                })
            })
        };

        ParcelOrchestratorProcesses {
            processes: vec![
                ("sorter_endpoint", sorter_endpoint),
                ("sorter_event_glue", sorter_event_glue),
                ("timeout_supervisor", timeout_supervisor),
                ("config_watcher", config_watcher),
            ],
            closer,
        }
    }
}
