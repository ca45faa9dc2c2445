use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a chute was chosen for a parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentReason {
    /// A routing rule matched
    Rule,
    /// No rule matched; the WCS response supplied the chute
    WcsResponse,
    /// No rule matched and no WCS chute; exception chute used
    Fallback,
    /// No scan arrived in time; exception chute used
    Timeout,
}

impl fmt::Display for AssignmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule => write!(f, "rule"),
            Self::WcsResponse => write!(f, "wcs_response"),
            Self::Fallback => write!(f, "fallback"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Decision pushed to the sorter for one parcel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChuteAssignment {
    pub parcel_id: String,
    pub chute_id: String,
    pub reason: AssignmentReason,
    pub rule_id: Option<String>,
    pub barcode: Option<String>,
    pub assigned_at: DateTime<Utc>,
}
