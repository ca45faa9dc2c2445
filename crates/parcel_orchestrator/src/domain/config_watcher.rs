use crate::domain::{EndpointReloader, RuleEvaluator, TimeoutPolicyCache};
use common::domain::{
    hash_endpoint_config, hash_routing_rules, hash_timeout_policy, EndpointConfigRepository,
    RoutingRuleRepository, TimeoutPolicy, TimeoutPolicyRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const ABSENT_ENDPOINT_CONFIG: &str = "absent";

/// Which runtime configuration changed during one poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConfigChanges {
    pub rules: bool,
    pub timeout_policy: bool,
    pub endpoint: bool,
}

impl ConfigChanges {
    pub fn any(&self) -> bool {
        self.rules || self.timeout_policy || self.endpoint
    }
}

#[derive(Debug, Default)]
struct WatchState {
    rules_hash: Option<String>,
    policy_hash: Option<String>,
    endpoint_hash: Option<String>,
}

/// Polls the configuration repositories and pushes changes to their consumers.
///
/// Each source is compared by content hash; a failure reading one source does
/// not block the others.
pub struct ConfigWatcher {
    rule_repository: Arc<dyn RoutingRuleRepository>,
    policy_repository: Arc<dyn TimeoutPolicyRepository>,
    endpoint_repository: Arc<dyn EndpointConfigRepository>,
    rule_evaluator: Arc<RuleEvaluator>,
    timeout_policy: Arc<TimeoutPolicyCache>,
    endpoint_reloader: Arc<dyn EndpointReloader>,
    default_policy: TimeoutPolicy,
    poll_interval: Duration,
    state: WatchState,
}

impl ConfigWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule_repository: Arc<dyn RoutingRuleRepository>,
        policy_repository: Arc<dyn TimeoutPolicyRepository>,
        endpoint_repository: Arc<dyn EndpointConfigRepository>,
        rule_evaluator: Arc<RuleEvaluator>,
        timeout_policy: Arc<TimeoutPolicyCache>,
        endpoint_reloader: Arc<dyn EndpointReloader>,
        default_policy: TimeoutPolicy,
        poll_interval: Duration,
    ) -> Self {
        Self {
            rule_repository,
            policy_repository,
            endpoint_repository,
            rule_evaluator,
            timeout_policy,
            endpoint_reloader,
            default_policy,
            poll_interval,
            state: WatchState::default(),
        }
    }

    /// Initial load: install rules and policy, remember the endpoint config
    /// without reloading the endpoint.
    #[instrument(skip(self))]
    pub async fn prime(&mut self) -> ConfigChanges {
        self.poll(false).await
    }

    /// Check every source once and apply what changed.
    pub async fn poll_once(&mut self) -> ConfigChanges {
        self.poll(true).await
    }

    #[instrument(name = "config_watcher", skip_all, fields(poll_interval_ms = self.poll_interval.as_millis() as u64))]
    pub async fn run(mut self, cancel: CancellationToken) -> anyhow::Result<()> {
        info!("starting config watcher");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("config watcher stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let changes = self.poll_once().await;
            if changes.any() {
                info!(
                    rules = changes.rules,
                    timeout_policy = changes.timeout_policy,
                    endpoint = changes.endpoint,
                    "runtime configuration changed"
                );
            }
        }
    }

    async fn poll(&mut self, reload_endpoint: bool) -> ConfigChanges {
        ConfigChanges {
            rules: self.poll_rules().await,
            timeout_policy: self.poll_timeout_policy().await,
            endpoint: self.poll_endpoint(reload_endpoint).await,
        }
    }

    async fn poll_rules(&mut self) -> bool {
        let rules = match self.rule_repository.list_enabled_rules().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(error = %e, "failed to read routing rules, keeping current snapshot");
                return false;
            }
        };

        let hash = hash_routing_rules(&rules);
        if self.state.rules_hash.as_deref() == Some(hash.as_str()) {
            return false;
        }

        self.rule_evaluator.install(rules);
        self.state.rules_hash = Some(hash);
        true
    }

    async fn poll_timeout_policy(&mut self) -> bool {
        let policy = match self.policy_repository.get_timeout_policy().await {
            Ok(Some(policy)) => policy,
            Ok(None) => self.default_policy.clone(),
            Err(e) => {
                warn!(error = %e, "failed to read timeout policy, keeping current policy");
                return false;
            }
        };

        let hash = hash_timeout_policy(&policy);
        if self.state.policy_hash.as_deref() == Some(hash.as_str()) {
            return false;
        }
        self.state.policy_hash = Some(hash);

        if let Err(e) = policy.validate() {
            warn!(error = %e, "ignoring invalid timeout policy");
            return false;
        }

        info!(
            enabled = policy.enabled,
            min_wait_ms = policy.min_wait_ms,
            max_wait_ms = policy.max_wait_ms,
            exception_chute_id = %policy.exception_chute_id,
            check_interval_ms = policy.check_interval_ms,
            "timeout policy installed"
        );
        self.timeout_policy.replace(policy);
        true
    }

    async fn poll_endpoint(&mut self, reload_endpoint: bool) -> bool {
        let stored = match self.endpoint_repository.get_endpoint_config().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "failed to read endpoint configuration");
                return false;
            }
        };

        let hash = stored
            .as_ref()
            .map(hash_endpoint_config)
            .unwrap_or_else(|| ABSENT_ENDPOINT_CONFIG.to_string());
        if self.state.endpoint_hash.as_deref() == Some(hash.as_str()) {
            return false;
        }
        self.state.endpoint_hash = Some(hash);

        if !reload_endpoint {
            debug!("endpoint configuration recorded");
            return true;
        }

        info!("endpoint configuration changed, reloading sorter endpoint");
        if let Err(e) = self.endpoint_reloader.reload_endpoint().await {
            warn!(error = %e, "endpoint reload failed, will retry on next poll");
            // forget the hash so the next poll retries
            self.state.endpoint_hash = None;
        }
        true
    }
}
