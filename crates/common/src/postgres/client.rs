use crate::postgres::PostgresConfig;
use anyhow::Result;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Tables and indexes for parcels, audit rows, rules, timeout policies and
/// endpoint settings.
pub const SCHEMA_SQL: &str = include_str!("../../../../migrations/postgres/001_init.sql");

/// Pooled handle shared by every sortline repository.
#[derive(Clone)]
pub struct PostgresClient {
    pool: Pool,
}

impl PostgresClient {
    /// Builds the pool lazily; no connection is opened until first use.
    pub fn from_config(settings: &PostgresConfig) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(settings.host.clone());
        cfg.port = Some(settings.port);
        cfg.dbname = Some(settings.database.clone());
        cfg.user = Some(settings.username.clone());
        cfg.password = Some(settings.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
        pool.resize(settings.max_pool_size);

        debug!(
            host = %settings.host,
            port = settings.port,
            database = %settings.database,
            max_pool_size = settings.max_pool_size,
            "parcel store pool created"
        );
        Ok(Self { pool })
    }

    /// Round-trips a trivial query so startup fails fast on a bad DSN.
    pub async fn ping(&self) -> Result<()> {
        self.connection().await?.execute("SELECT 1", &[]).await?;
        debug!("parcel store reachable");
        Ok(())
    }

    pub async fn connection(&self) -> Result<deadpool_postgres::Client> {
        Ok(self.pool.get().await?)
    }

    /// Idempotent; every statement in the schema is `IF NOT EXISTS`.
    pub async fn apply_schema(&self) -> Result<()> {
        self.connection().await?.batch_execute(SCHEMA_SQL).await?;
        info!("parcel store schema applied");
        Ok(())
    }
}
