use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dimension/weight scan produced by the DWS device.
///
/// Carries no parcel identity; it only becomes meaningful once the
/// orchestrator binds it to a waiting parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub barcode: String,
    pub weight: Option<f64>,
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub volume: Option<f64>,
    pub scanned_at: DateTime<Utc>,
    pub image_refs: Vec<String>,
}

impl ScanRecord {
    pub fn new(barcode: impl Into<String>, scanned_at: DateTime<Utc>) -> Self {
        Self {
            barcode: barcode.into(),
            weight: None,
            length: None,
            width: None,
            height: None,
            volume: None,
            scanned_at,
            image_refs: Vec::new(),
        }
    }
}
