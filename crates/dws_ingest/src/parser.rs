//! Turns raw DWS device lines into [`ScanRecord`]s.
//!
//! Two input styles are supported:
//!
//! - delimited lines described by a template of named placeholders, e.g.
//!   `{Code},{Weight},{Length},{Width},{Height},{Volume}` split on `,`
//! - one JSON object per line using the same names as keys
//!
//! Placeholder and key names are case-insensitive. Recognized names are
//! `Code`/`Barcode`, `Weight`, `Length`, `Width`, `Height`, `Volume`,
//! `Timestamp`/`ScannedAt` and `Image`/`ImageUrl`; any other placeholder
//! consumes its column and is ignored.

use chrono::{DateTime, TimeZone, Utc};
use common::domain::ScanRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ScanParseError {
    #[error("invalid scan template: {0}")]
    InvalidTemplate(String),

    #[error("empty scan line")]
    EmptyLine,

    #[error("expected at least {expected} fields, got {actual}")]
    TooFewFields { expected: usize, actual: usize },

    #[error("scan has no barcode")]
    MissingBarcode,

    #[error("field {field} is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("invalid JSON scan: {0}")]
    InvalidJson(String),
}

/// How DWS lines are laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ScanFormat {
    Delimited { template: String, delimiter: String },
    Json,
}

impl Default for ScanFormat {
    fn default() -> Self {
        Self::Delimited {
            template: "{Code},{Weight},{Length},{Width},{Height},{Volume}".to_string(),
            delimiter: ",".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanField {
    Barcode,
    Weight,
    Length,
    Width,
    Height,
    Volume,
    Timestamp,
    Image,
    Ignored,
}

impl ScanField {
    fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "code" | "barcode" => Self::Barcode,
            "weight" => Self::Weight,
            "length" => Self::Length,
            "width" => Self::Width,
            "height" => Self::Height,
            "volume" => Self::Volume,
            "timestamp" | "scannedat" | "scanned_at" => Self::Timestamp,
            "image" | "imageurl" | "image_url" | "images" => Self::Image,
            _ => Self::Ignored,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Barcode => "barcode",
            Self::Weight => "weight",
            Self::Length => "length",
            Self::Width => "width",
            Self::Height => "height",
            Self::Volume => "volume",
            Self::Timestamp => "timestamp",
            Self::Image => "image",
            Self::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone)]
enum ParserMode {
    Delimited {
        fields: Vec<ScanField>,
        delimiter: String,
    },
    Json,
}

/// Validated scan parser; build once and reuse for every line.
#[derive(Debug, Clone)]
pub struct ScanParser {
    mode: ParserMode,
}

fn parse_number(field: ScanField, raw: &str) -> Result<Option<f64>, ScanParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .map(Some)
        .ok_or_else(|| ScanParseError::InvalidNumber {
            field: field.label(),
            value: raw.to_string(),
        })
}

/// RFC 3339 text or epoch milliseconds.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ScanParseError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .ok_or_else(|| ScanParseError::InvalidTimestamp(raw.to_string()))
}

fn apply_field(
    record: &mut ScanRecord,
    field: ScanField,
    raw: &str,
) -> Result<(), ScanParseError> {
    match field {
        ScanField::Barcode => {
            let barcode = raw.trim();
            if barcode.is_empty() {
                return Err(ScanParseError::MissingBarcode);
            }
            record.barcode = barcode.to_string();
        }
        ScanField::Weight => record.weight = parse_number(field, raw)?,
        ScanField::Length => record.length = parse_number(field, raw)?,
        ScanField::Width => record.width = parse_number(field, raw)?,
        ScanField::Height => record.height = parse_number(field, raw)?,
        ScanField::Volume => record.volume = parse_number(field, raw)?,
        ScanField::Timestamp => {
            if !raw.trim().is_empty() {
                record.scanned_at = parse_timestamp(raw)?;
            }
        }
        ScanField::Image => {
            let image = raw.trim();
            if !image.is_empty() {
                record.image_refs.push(image.to_string());
            }
        }
        ScanField::Ignored => {}
    }
    Ok(())
}

impl ScanParser {
    pub fn new(format: &ScanFormat) -> Result<Self, ScanParseError> {
        match format {
            ScanFormat::Delimited {
                template,
                delimiter,
            } => Self::delimited(template, delimiter),
            ScanFormat::Json => Ok(Self::json()),
        }
    }

    /// Parser for delimited lines.
    ///
    /// Every template segment between delimiters must be a `{Name}`
    /// placeholder and one of them must name the barcode.
    pub fn delimited(template: &str, delimiter: &str) -> Result<Self, ScanParseError> {
        if delimiter.is_empty() {
            return Err(ScanParseError::InvalidTemplate(
                "delimiter must not be empty".to_string(),
            ));
        }
        if template.trim().is_empty() {
            return Err(ScanParseError::InvalidTemplate(
                "template must not be empty".to_string(),
            ));
        }

        let fields = template
            .split(delimiter)
            .map(|segment| {
                let segment = segment.trim();
                segment
                    .strip_prefix('{')
                    .and_then(|rest| rest.strip_suffix('}'))
                    .filter(|name| !name.trim().is_empty())
                    .map(ScanField::from_name)
                    .ok_or_else(|| {
                        ScanParseError::InvalidTemplate(format!(
                            "segment {:?} is not a {{Name}} placeholder",
                            segment
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if !fields.contains(&ScanField::Barcode) {
            return Err(ScanParseError::InvalidTemplate(
                "template needs a {Code} or {Barcode} placeholder".to_string(),
            ));
        }

        Ok(Self {
            mode: ParserMode::Delimited {
                fields,
                delimiter: delimiter.to_string(),
            },
        })
    }

    /// Parser for one JSON object per line.
    pub fn json() -> Self {
        Self {
            mode: ParserMode::Json,
        }
    }

    /// Parse a line, stamping it with the current time unless it carries a
    /// timestamp of its own.
    pub fn parse(&self, line: &str) -> Result<ScanRecord, ScanParseError> {
        self.parse_at(line, Utc::now())
    }

    pub fn parse_at(
        &self,
        line: &str,
        received_at: DateTime<Utc>,
    ) -> Result<ScanRecord, ScanParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ScanParseError::EmptyLine);
        }

        match &self.mode {
            ParserMode::Delimited { fields, delimiter } => {
                Self::parse_delimited(fields, delimiter, line, received_at)
            }
            ParserMode::Json => Self::parse_json(line, received_at),
        }
    }

    fn parse_delimited(
        fields: &[ScanField],
        delimiter: &str,
        line: &str,
        received_at: DateTime<Utc>,
    ) -> Result<ScanRecord, ScanParseError> {
        let values: Vec<&str> = line.split(delimiter).collect();
        if values.len() < fields.len() {
            return Err(ScanParseError::TooFewFields {
                expected: fields.len(),
                actual: values.len(),
            });
        }

        let mut record = ScanRecord::new(String::new(), received_at);
        // Trailing extra values are ignored
        for (field, raw) in fields.iter().zip(values) {
            apply_field(&mut record, *field, raw)?;
        }
        Ok(record)
    }

    fn parse_json(line: &str, received_at: DateTime<Utc>) -> Result<ScanRecord, ScanParseError> {
        let value: JsonValue = serde_json::from_str(line)
            .map_err(|e| ScanParseError::InvalidJson(e.to_string()))?;
        let JsonValue::Object(object) = value else {
            return Err(ScanParseError::InvalidJson(
                "expected a JSON object".to_string(),
            ));
        };

        let mut record = ScanRecord::new(String::new(), received_at);
        for (key, value) in &object {
            let field = ScanField::from_name(key);
            match (field, value) {
                (ScanField::Ignored, _) | (_, JsonValue::Null) => {}
                (ScanField::Image, JsonValue::Array(images)) => {
                    record.image_refs.extend(
                        images
                            .iter()
                            .filter_map(JsonValue::as_str)
                            .filter(|image| !image.trim().is_empty())
                            .map(str::to_string),
                    );
                }
                (_, JsonValue::String(raw)) => apply_field(&mut record, field, raw)?,
                (_, JsonValue::Number(number)) => {
                    apply_field(&mut record, field, &number.to_string())?
                }
                (_, other) => {
                    return Err(ScanParseError::InvalidJson(format!(
                        "unsupported value for {}: {}",
                        key, other
                    )))
                }
            }
        }

        if record.barcode.is_empty() {
            return Err(ScanParseError::MissingBarcode);
        }
        Ok(record)
    }
}
