use crate::domain::result::DomainResult;
use crate::domain::{DomainError, ScanRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage of a parcel on the sorter.
///
/// Stages only move forward: `Created -> DwsReceived -> ChuteAssigned`,
/// with `Landed` and `Timeout` as terminal stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleStage {
    Created,
    DwsReceived,
    ChuteAssigned,
    Landed,
    Timeout,
}

impl LifecycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::DwsReceived => "dws_received",
            Self::ChuteAssigned => "chute_assigned",
            Self::Landed => "landed",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Landed | Self::Timeout)
    }

    /// Whether `self -> next` is one of the allowed lifecycle edges.
    pub fn can_advance_to(&self, next: LifecycleStage) -> bool {
        match (self, next) {
            (Self::Created, Self::DwsReceived) => true,
            (Self::DwsReceived, Self::ChuteAssigned) => true,
            (from, Self::Landed | Self::Timeout) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LifecycleStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "dws_received" | "dwsreceived" => Ok(Self::DwsReceived),
            "chute_assigned" | "chuteassigned" => Ok(Self::ChuteAssigned),
            "landed" => Ok(Self::Landed),
            "timeout" => Ok(Self::Timeout),
            other => Err(format!("unknown lifecycle stage '{}'", other)),
        }
    }
}

/// A physical parcel being routed through the sorter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub parcel_id: String,
    pub cart_number: Option<String>,
    pub barcode: Option<String>,
    pub weight: Option<f64>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub volume: Option<f64>,
    pub target_chute: Option<String>,
    pub actual_chute: Option<String>,
    pub stage: LifecycleStage,
    pub status: String,
    pub bag_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Parcel {
    /// New parcel in the `Created` stage, as produced by a detection event.
    pub fn detected(parcel_id: impl Into<String>, cart_number: Option<String>, at: DateTime<Utc>) -> Self {
        Self {
            parcel_id: parcel_id.into(),
            cart_number,
            barcode: None,
            weight: None,
            length: None,
            width: None,
            height: None,
            volume: None,
            target_chute: None,
            actual_chute: None,
            stage: LifecycleStage::Created,
            status: "detected".to_string(),
            bag_id: None,
            created_at: at,
            updated_at: at,
            completed_at: None,
        }
    }

    /// Move to `next`, rejecting edges that are not part of the lifecycle.
    pub fn advance(&mut self, next: LifecycleStage, at: DateTime<Utc>) -> DomainResult<()> {
        if !self.stage.can_advance_to(next) {
            return Err(DomainError::InvalidStageTransition {
                parcel_id: self.parcel_id.clone(),
                from: self.stage.to_string(),
                to: next.to_string(),
            });
        }
        self.stage = next;
        self.status = next.as_str().to_string();
        self.updated_at = at;
        Ok(())
    }

    /// Record the routing decision and move to `ChuteAssigned`.
    pub fn assign_chute(&mut self, chute_id: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        self.advance(LifecycleStage::ChuteAssigned, at)?;
        self.target_chute = Some(chute_id.into());
        Ok(())
    }

    /// Force a parcel that never got a scan onto the exception chute.
    pub fn time_out(&mut self, exception_chute_id: impl Into<String>, at: DateTime<Utc>) -> DomainResult<()> {
        self.advance(LifecycleStage::Timeout, at)?;
        self.target_chute = Some(exception_chute_id.into());
        self.status = "timeout: no scan received".to_string();
        Ok(())
    }

    /// Apply the sorter's completion report: `Landed` on success, `Timeout`
    /// otherwise.
    pub fn complete(
        &mut self,
        actual_chute: impl Into<String>,
        success: bool,
        failure_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let next = if success {
            LifecycleStage::Landed
        } else {
            LifecycleStage::Timeout
        };
        self.advance(next, at)?;
        self.actual_chute = Some(actual_chute.into());
        self.completed_at = Some(at);
        if !success {
            self.status = format!("failed: {}", failure_reason.unwrap_or("unknown"));
        }
        Ok(())
    }

    /// Copy the scan measurements onto the parcel.
    pub fn bind_scan(&mut self, scan: &ScanRecord) {
        self.barcode = Some(scan.barcode.clone());
        self.weight = scan.weight;
        self.length = scan.length;
        self.width = scan.width;
        self.height = scan.height;
        self.volume = scan.volume;
    }

    pub fn is_bound(&self) -> bool {
        self.barcode.is_some()
    }
}

/// Repository trait for parcel persistence.
///
/// Writes are idempotent upserts keyed by `parcel_id`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ParcelRepository: Send + Sync {
    /// Get a parcel by ID
    async fn get_parcel(&self, parcel_id: &str) -> DomainResult<Option<Parcel>>;

    /// Insert or replace a parcel
    async fn upsert_parcel(&self, parcel: &Parcel) -> DomainResult<()>;
}
