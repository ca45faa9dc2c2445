use crate::domain::{DomainError, DomainResult, LifecycleStage, Parcel, ParcelRepository};
use crate::postgres::PostgresClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use tracing::debug;

const PARCEL_COLUMNS: &str = "parcel_id, cart_number, barcode, weight, length, width, height, volume, \
     target_chute, actual_chute, stage, status, bag_id, created_at, updated_at, completed_at";

/// Parcel row as stored in PostgreSQL
#[derive(Debug, Clone)]
struct ParcelRow {
    parcel_id: String,
    cart_number: Option<String>,
    barcode: Option<String>,
    weight: Option<f64>,
    length: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
    volume: Option<f64>,
    target_chute: Option<String>,
    actual_chute: Option<String>,
    stage: String,
    status: String,
    bag_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl From<&Row> for ParcelRow {
    fn from(row: &Row) -> Self {
        Self {
            parcel_id: row.get(0),
            cart_number: row.get(1),
            barcode: row.get(2),
            weight: row.get(3),
            length: row.get(4),
            width: row.get(5),
            height: row.get(6),
            volume: row.get(7),
            target_chute: row.get(8),
            actual_chute: row.get(9),
            stage: row.get(10),
            status: row.get(11),
            bag_id: row.get(12),
            created_at: row.get(13),
            updated_at: row.get(14),
            completed_at: row.get(15),
        }
    }
}

impl TryFrom<ParcelRow> for Parcel {
    type Error = DomainError;

    fn try_from(row: ParcelRow) -> Result<Self, Self::Error> {
        let stage = row
            .stage
            .parse::<LifecycleStage>()
            .map_err(|e| DomainError::RepositoryError(anyhow::anyhow!(e)))?;

        Ok(Parcel {
            parcel_id: row.parcel_id,
            cart_number: row.cart_number,
            barcode: row.barcode,
            weight: row.weight,
            length: row.length,
            width: row.width,
            height: row.height,
            volume: row.volume,
            target_chute: row.target_chute,
            actual_chute: row.actual_chute,
            stage,
            status: row.status,
            bag_id: row.bag_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Clone)]
pub struct PostgresParcelRepository {
    client: PostgresClient,
}

impl PostgresParcelRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ParcelRepository for PostgresParcelRepository {
    async fn get_parcel(&self, parcel_id: &str) -> DomainResult<Option<Parcel>> {
        debug!(parcel_id = %parcel_id, "getting parcel from database");

        let conn = self
            .client
            .connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                &format!("SELECT {} FROM parcels WHERE parcel_id = $1", PARCEL_COLUMNS),
                &[&parcel_id],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        row.map(|row| Parcel::try_from(ParcelRow::from(&row)))
            .transpose()
    }

    async fn upsert_parcel(&self, parcel: &Parcel) -> DomainResult<()> {
        debug!(parcel_id = %parcel.parcel_id, stage = %parcel.stage, "upserting parcel");

        let conn = self
            .client
            .connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let stage = parcel.stage.as_str();

        conn.execute(
            &format!(
                "INSERT INTO parcels ({})
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                 ON CONFLICT (parcel_id) DO UPDATE SET
                    cart_number = EXCLUDED.cart_number,
                    barcode = EXCLUDED.barcode,
                    weight = EXCLUDED.weight,
                    length = EXCLUDED.length,
                    width = EXCLUDED.width,
                    height = EXCLUDED.height,
                    volume = EXCLUDED.volume,
                    target_chute = EXCLUDED.target_chute,
                    actual_chute = EXCLUDED.actual_chute,
                    stage = EXCLUDED.stage,
                    status = EXCLUDED.status,
                    bag_id = EXCLUDED.bag_id,
                    updated_at = EXCLUDED.updated_at,
                    completed_at = EXCLUDED.completed_at
                 WHERE parcels.updated_at <= EXCLUDED.updated_at",
                PARCEL_COLUMNS
            ),
            &[
                &parcel.parcel_id,
                &parcel.cart_number,
                &parcel.barcode,
                &parcel.weight,
                &parcel.length,
                &parcel.width,
                &parcel.height,
                &parcel.volume,
                &parcel.target_chute,
                &parcel.actual_chute,
                &stage,
                &parcel.status,
                &parcel.bag_id,
                &parcel.created_at,
                &parcel.updated_at,
                &parcel.completed_at,
            ],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

        Ok(())
    }
}
