//! Newline-delimited JSON envelopes exchanged with the sorter.
//!
//! Every line is one JSON object whose `Type` field selects the message:
//!
//! ```text
//! {"Type":"ParcelDetected","ParcelId":"1001","ClientId":"sorter-a","Timestamp":"2024-05-01T08:00:00Z"}
//! {"Type":"SortingCompleted","ParcelId":1001,"ActualChuteId":"CH3","IsSuccess":true,"FailureReason":null,"CompletedAt":"..."}
//! {"Type":"ChuteAssignment","ParcelId":"1001","ChuteId":"CH3","Reason":"Rule","RuleId":"R2","Barcode":"SF1","AssignedAt":"..."}
//! {"Type":"Heartbeat"}
//! ```

use crate::domain::{ParcelDetectedEvent, SortingCompletedEvent};
use chrono::{DateTime, Utc};
use common::domain::{AssignmentReason, ChuteAssignment};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Max accepted line length; longer lines are discarded by the codec.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("empty line")]
    Empty,

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Identifiers arrive as strings from some sorters and as numbers from others.
#[derive(Deserialize)]
#[serde(untagged)]
enum FlexibleId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

impl From<FlexibleId> for String {
    fn from(id: FlexibleId) -> Self {
        match id {
            FlexibleId::Text(s) => s,
            FlexibleId::Signed(n) => n.to_string(),
            FlexibleId::Unsigned(n) => n.to_string(),
            FlexibleId::Float(n) => n.to_string(),
        }
    }
}

fn flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    FlexibleId::deserialize(deserializer).map(String::from)
}

fn optional_flexible_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<FlexibleId>::deserialize(deserializer).map(|id| id.map(String::from))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParcelDetectedMessage {
    #[serde(deserialize_with = "flexible_id")]
    pub parcel_id: String,
    #[serde(default, deserialize_with = "optional_flexible_id")]
    pub client_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_flexible_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub cart_number: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ParcelDetectedMessage {
    pub fn into_event(self, received_at: DateTime<Utc>) -> ParcelDetectedEvent {
        ParcelDetectedEvent {
            parcel_id: self.parcel_id,
            source_id: self.client_id,
            cart_number: self.cart_number,
            detected_at: self.timestamp.unwrap_or(received_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SortingCompletedMessage {
    #[serde(deserialize_with = "flexible_id")]
    pub parcel_id: String,
    #[serde(deserialize_with = "flexible_id")]
    pub actual_chute_id: String,
    pub is_success: bool,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl SortingCompletedMessage {
    pub fn into_event(self, received_at: DateTime<Utc>) -> SortingCompletedEvent {
        SortingCompletedEvent {
            parcel_id: self.parcel_id,
            actual_chute: self.actual_chute_id,
            success: self.is_success,
            failure_reason: self.failure_reason.filter(|reason| !reason.is_empty()),
            completed_at: self.completed_at.unwrap_or(received_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChuteAssignmentMessage {
    pub parcel_id: String,
    pub chute_id: String,
    pub reason: AssignmentReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    pub assigned_at: DateTime<Utc>,
}

impl From<&ChuteAssignment> for ChuteAssignmentMessage {
    fn from(assignment: &ChuteAssignment) -> Self {
        Self {
            parcel_id: assignment.parcel_id.clone(),
            chute_id: assignment.chute_id.clone(),
            reason: assignment.reason,
            rule_id: assignment.rule_id.clone(),
            barcode: assignment.barcode.clone(),
            assigned_at: assignment.assigned_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum WireMessage {
    ParcelDetected(ParcelDetectedMessage),
    SortingCompleted(SortingCompletedMessage),
    ChuteAssignment(ChuteAssignmentMessage),
    Heartbeat,
}

impl WireMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ParcelDetected(_) => "ParcelDetected",
            Self::SortingCompleted(_) => "SortingCompleted",
            Self::ChuteAssignment(_) => "ChuteAssignment",
            Self::Heartbeat => "Heartbeat",
        }
    }
}

/// Decode one line (without its terminator).
pub fn decode_line(line: &str) -> Result<WireMessage, WireError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(WireError::Empty);
    }
    Ok(serde_json::from_str(line)?)
}

/// Encode a message as a single line (without terminator).
pub fn encode_line(message: &WireMessage) -> Result<String, WireError> {
    Ok(serde_json::to_string(message)?)
}
