use crate::domain::result::DomainResult;
use crate::domain::ScanRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Response from the warehouse control system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WcsResponse {
    pub success: bool,
    pub chute_id: Option<String>,
    pub code: String,
    pub message: String,
}

impl WcsResponse {
    pub fn ok(chute_id: Option<String>) -> Self {
        Self {
            success: true,
            chute_id,
            code: "OK".to_string(),
            message: String::new(),
        }
    }

    pub fn not_configured() -> Self {
        Self {
            success: false,
            chute_id: None,
            code: "NOT_CONFIGURED".to_string(),
            message: "no WCS adapter configured".to_string(),
        }
    }
}

/// Contract consumed from the external WCS/ERP adapter.
///
/// Implementations own their own retry strategy; callers log failures and
/// move on.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait WcsAdapter: Send + Sync {
    /// Ask the WCS for a destination chute for a scanned parcel
    async fn request_chute(
        &self,
        parcel_id: &str,
        scan: &ScanRecord,
        ocr: Option<String>,
    ) -> DomainResult<WcsResponse>;

    /// Report that a parcel landed in a chute
    async fn notify_chute_landing(
        &self,
        parcel_id: &str,
        chute_id: &str,
        barcode: &str,
    ) -> DomainResult<WcsResponse>;

    /// Report a barcode scan
    async fn scan_parcel(&self, barcode: &str) -> DomainResult<WcsResponse>;
}

/// Adapter used when no WCS integration is configured.
#[derive(Debug, Default, Clone)]
pub struct NoopWcsAdapter;

#[async_trait]
impl WcsAdapter for NoopWcsAdapter {
    async fn request_chute(
        &self,
        parcel_id: &str,
        _scan: &ScanRecord,
        _ocr: Option<String>,
    ) -> DomainResult<WcsResponse> {
        debug!(parcel_id = %parcel_id, "no WCS adapter configured, skipping chute request");
        Ok(WcsResponse::not_configured())
    }

    async fn notify_chute_landing(
        &self,
        parcel_id: &str,
        chute_id: &str,
        _barcode: &str,
    ) -> DomainResult<WcsResponse> {
        debug!(parcel_id = %parcel_id, chute_id = %chute_id, "no WCS adapter configured, skipping landing notification");
        Ok(WcsResponse::not_configured())
    }

    async fn scan_parcel(&self, barcode: &str) -> DomainResult<WcsResponse> {
        debug!(barcode = %barcode, "no WCS adapter configured, skipping scan notification");
        Ok(WcsResponse::not_configured())
    }
}
