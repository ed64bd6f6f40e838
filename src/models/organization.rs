//! Organizations and their frozen baseline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::category::Scope;

/// A tenant of the accounting platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// ISO country code, the default country for factor resolution
    pub country: String,
    /// Override of the configured recalculation significance threshold
    pub recalculation_threshold_percent: Option<f64>,
    /// Declared base year; mutated only via an approved recalculation event
    pub baseline: Option<BaselineSnapshot>,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>, country: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            country: country.into(),
            recalculation_threshold_percent: None,
            baseline: None,
            created_at: now,
        }
    }
}

/// The frozen base-year figure reduction targets are measured against.
///
/// Captured from the aggregator's output at declaration time and never
/// silently refreshed; a refresh requires a base-year-change recalculation
/// event, recorded here for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    pub base_year: i32,
    pub total_emissions_tonnes: Decimal,
    pub by_scope_tonnes: BTreeMap<Scope, Decimal>,
    pub justification: String,
    pub declared_at: DateTime<Utc>,
    /// Set when the baseline was (re)established through a recalculation event
    pub recalculation_event_id: Option<Uuid>,
}
