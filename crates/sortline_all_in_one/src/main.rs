mod config;

use common::domain::{
    EndpointConfig, EndpointConfigRepository, NoopWcsAdapter, TimeoutPolicy,
    TimeoutPolicyRepository,
};
use common::memory::{
    InMemoryEndpointConfigRepository, InMemoryLifecycleAuditRepository, InMemoryParcelRepository,
    InMemoryRoutingRuleRepository, InMemoryTimeoutPolicyRepository,
};
use common::postgres::{
    PostgresClient, PostgresEndpointConfigRepository, PostgresLifecycleAuditRepository,
    PostgresParcelRepository, PostgresRoutingRuleRepository, PostgresTimeoutPolicyRepository,
};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::{ServiceConfig, StorageBackend};
use dws_ingest::{DwsReader, ScanParser};
use parcel_orchestrator::{
    ParcelOrchestrator, ParcelOrchestratorConfig, ParcelOrchestratorRepositories,
};
use sorter_protocol::SorterEndpointFactory;
use sortline_runner::Runner;
use std::sync::Arc;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    // Initialize configuration and tracing
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(provider) => provider,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        storage_backend = %config.storage_backend,
        dws_enabled = config.dws_enabled,
        otel_enabled = config.otel_enabled,
        "Starting sortline service"
    );
    debug!("Configuration: {:?}", config);

    let runner = match build_runner(&config).await {
        Ok(runner) => runner,
        Err(e) => {
            error!("Failed to initialize sortline: {:#}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    runner
        .with_closer(move || {
            Box::pin(async move {
                // Flush pending traces and logs
                shutdown_telemetry(telemetry_providers);
                Ok(())
            })
        })
        .with_closer_timeout(config.closer_timeout())
        .run()
        .await;
}

async fn build_runner(config: &ServiceConfig) -> anyhow::Result<Runner> {
    let default_endpoint = config.endpoint_seed()?;
    let default_timeout_policy = config.timeout_policy_seed()?;

    let repositories = initialize_repositories(config).await?;
    seed_runtime_config(&repositories, &default_endpoint, &default_timeout_policy).await?;

    let orchestrator = ParcelOrchestrator::new(
        repositories,
        Arc::new(NoopWcsAdapter),
        SorterEndpointFactory::with_tcp_endpoints(),
        ParcelOrchestratorConfig {
            orchestration: config.orchestration(),
            default_endpoint,
            default_timeout_policy,
            event_buffer: config.sorter_event_buffer,
        },
    )
    .await?;

    let mut runner = Runner::new();

    // DWS reader feeds scans straight into the orchestrator
    if config.dws_enabled {
        let parser = ScanParser::new(&config.scan_format()?)?;
        let reader = DwsReader::new(config.dws_reader(), parser, orchestrator.scan_sender());
        runner = runner.with_named_process("dws_reader", move |ctx| async move {
            reader.run(ctx).await
        });
    } else {
        info!("DWS reader disabled; parcels will only bind scans sent by other producers");
    }

    let parts = orchestrator.into_runner_processes();
    for (name, process) in parts.processes {
        runner = runner.with_named_process(name, process);
    }

    Ok(runner.with_closer(parts.closer))
}

async fn initialize_repositories(
    config: &ServiceConfig,
) -> anyhow::Result<ParcelOrchestratorRepositories> {
    match config.storage()? {
        StorageBackend::Postgres => {
            info!("Initializing PostgreSQL...");
            let client = PostgresClient::from_config(&config.postgres())?;
            client.ping().await?;
            if config.postgres_apply_schema {
                client.apply_schema().await?;
            }

            Ok(ParcelOrchestratorRepositories {
                parcels: Arc::new(PostgresParcelRepository::new(client.clone())),
                audit: Arc::new(PostgresLifecycleAuditRepository::new(client.clone())),
                routing_rules: Arc::new(PostgresRoutingRuleRepository::new(client.clone())),
                endpoint_config: Arc::new(PostgresEndpointConfigRepository::new(client.clone())),
                timeout_policy: Arc::new(PostgresTimeoutPolicyRepository::new(client)),
            })
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage; nothing survives a restart");
            Ok(ParcelOrchestratorRepositories {
                parcels: Arc::new(InMemoryParcelRepository::new()),
                audit: Arc::new(InMemoryLifecycleAuditRepository::new()),
                routing_rules: Arc::new(InMemoryRoutingRuleRepository::new()),
                endpoint_config: Arc::new(InMemoryEndpointConfigRepository::new()),
                timeout_policy: Arc::new(InMemoryTimeoutPolicyRepository::new()),
            })
        }
    }
}

/// Stores the configured seeds when no endpoint or policy row exists yet,
/// so operators have a row to edit.
async fn seed_runtime_config(
    repositories: &ParcelOrchestratorRepositories,
    endpoint: &EndpointConfig,
    timeout_policy: &TimeoutPolicy,
) -> anyhow::Result<()> {
    if repositories.endpoint_config.get_endpoint_config().await?.is_none() {
        repositories
            .endpoint_config
            .upsert_endpoint_config(endpoint)
            .await?;
        info!(mode = %endpoint.mode, address = %endpoint.address(), "seeded endpoint configuration");
    }

    if repositories.timeout_policy.get_timeout_policy().await?.is_none() {
        repositories
            .timeout_policy
            .upsert_timeout_policy(timeout_policy)
            .await?;
        info!(
            max_wait_ms = timeout_policy.max_wait_ms,
            exception_chute = %timeout_policy.exception_chute_id,
            "seeded timeout policy"
        );
    }

    Ok(())
}
