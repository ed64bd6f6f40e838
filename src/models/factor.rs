//! Emission factors and the frozen snapshot embedded in calculated records.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A versioned emission-factor row.
///
/// Immutable after publication except for deactivation; corrections are new
/// rows linked back through `corrects`. Validity is half-open:
/// `[valid_from, valid_until)`, with `valid_until = None` open-ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionFactor {
    pub id: Uuid,
    pub category_id: Uuid,
    pub name: String,
    /// Provenance, e.g. "ademe", "uba", "defra", "direct_measurement"
    pub source: String,
    /// Identifier within the source dataset
    pub source_id: Option<String>,
    /// Unit of the activity quantity this factor multiplies
    pub unit: String,
    /// kg CO2e per unit; may carry its own GWP vintage
    pub co2e_per_unit: Decimal,
    pub co2_per_unit: Option<Decimal>,
    pub ch4_per_unit: Option<Decimal>,
    pub n2o_per_unit: Option<Decimal>,
    /// Declared uncertainty at 95% confidence, in percent
    pub uncertainty_percent: Decimal,
    /// None means globally applicable
    pub country: Option<String>,
    pub valid_from: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    pub is_active: bool,
    /// The factor row this one corrects, if any
    pub corrects: Option<Uuid>,
    pub published_at: DateTime<Utc>,
}

impl EmissionFactor {
    /// Validity check over the half-open window
    pub fn is_valid_at(&self, date: NaiveDate) -> bool {
        if date < self.valid_from {
            return false;
        }
        match self.valid_until {
            Some(until) => date < until,
            None => true,
        }
    }

    /// True when the factor applies for the given country: a country-bound
    /// factor matches only its own country, a global factor matches any.
    pub fn applies_to_country(&self, country: Option<&str>) -> bool {
        match (&self.country, country) {
            (None, _) => true,
            (Some(own), Some(asked)) => own.eq_ignore_ascii_case(asked),
            (Some(_), None) => false,
        }
    }

    /// Snapshot of this factor for embedding into a calculated record
    pub fn snapshot(&self) -> FactorSnapshot {
        FactorSnapshot {
            factor_id: self.id,
            name: self.name.clone(),
            source: self.source.clone(),
            source_id: self.source_id.clone(),
            unit: self.unit.clone(),
            co2e_per_unit: self.co2e_per_unit,
            co2_per_unit: self.co2_per_unit,
            ch4_per_unit: self.ch4_per_unit,
            n2o_per_unit: self.n2o_per_unit,
            uncertainty_percent: self.uncertainty_percent,
            country: self.country.clone(),
            valid_from: self.valid_from,
            valid_until: self.valid_until,
        }
    }
}

/// Request to publish a new factor row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmissionFactor {
    pub category_id: Uuid,
    pub name: String,
    pub source: String,
    pub source_id: Option<String>,
    pub unit: String,
    pub co2e_per_unit: Decimal,
    pub co2_per_unit: Option<Decimal>,
    pub ch4_per_unit: Option<Decimal>,
    pub n2o_per_unit: Option<Decimal>,
    pub uncertainty_percent: Decimal,
    pub country: Option<String>,
    pub valid_from: NaiveDate,
    pub valid_until: Option<NaiveDate>,
    /// Publish as a correction of an existing factor row
    pub corrects: Option<Uuid>,
}

/// Immutable copy of a factor taken at calculation time.
///
/// The source of truth for historical display: later deactivation or
/// correction of the factor row never changes what a calculated record shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSnapshot {
    pub factor_id: Uuid,
    pub name: String,
    pub source: String,
    pub source_id: Option<String>,
    pub unit: String,
    pub co2e_per_unit: Decimal,
    pub co2_per_unit: Option<Decimal>,
    pub ch4_per_unit: Option<Decimal>,
    pub n2o_per_unit: Option<Decimal>,
    pub uncertainty_percent: Decimal,
    pub country: Option<String>,
    pub valid_from: NaiveDate,
    pub valid_until: Option<NaiveDate>,
}
