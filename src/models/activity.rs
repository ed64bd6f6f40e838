//! Activity records: the normalized input the engine consumes.
//!
//! Upstream producers (bank sync, CSV import, document extraction, manual
//! entry) submit these through the intake interface. The engine treats them
//! as append-only.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which collaborator produced the activity record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    BankSync,
    CsvImport,
    DocumentExtraction,
    MeterReading,
    Manual,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BankSync => "bank_sync",
            Self::CsvImport => "csv_import",
            Self::DocumentExtraction => "document_extraction",
            Self::MeterReading => "meter_reading",
            Self::Manual => "manual",
        }
    }
}

/// Quality tier of the underlying activity data, driving the uncertainty
/// multiplier applied on top of the factor's declared uncertainty
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Measured,
    Calculated,
    Estimated,
}

impl DataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Measured => "measured",
            Self::Calculated => "calculated",
            Self::Estimated => "estimated",
        }
    }
}

impl std::fmt::Display for DataQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized activity record, ready for factor resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub assessment_id: Uuid,
    pub category_id: Uuid,
    pub country: Option<String>,
    /// Effective date of the activity, used for factor validity
    pub date: NaiveDate,
    pub quantity: Decimal,
    pub unit: String,
    pub source_type: SourceType,
    pub data_quality: DataQuality,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub submitted_at: DateTime<Utc>,
}

/// Intake request for a new activity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewActivityRecord {
    pub organization_id: Uuid,
    pub assessment_id: Uuid,
    pub category_id: Uuid,
    pub country: Option<String>,
    pub date: NaiveDate,
    pub quantity: Decimal,
    pub unit: String,
    pub source_type: SourceType,
    pub data_quality: DataQuality,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Per-record calculation failure, kept so sibling records keep processing
/// while this one retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculationFailure {
    pub activity_id: Uuid,
    pub error: String,
    pub attempts: u32,
    pub last_attempt_at: DateTime<Utc>,
}
