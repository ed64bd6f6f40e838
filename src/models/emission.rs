//! Calculated emission records.
//!
//! Records are append-only: recalculation supersedes a record and inserts a
//! replacement with a higher generation, it never mutates in place. The
//! `superseded_by` link keeps the audit trail walkable in both directions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::activity::DataQuality;
use super::category::{CalculationMethod, Scope};
use super::factor::FactorSnapshot;

/// Namespace for deterministic record ids (v5 over activity, factor,
/// generation) so replaying a calculation yields byte-identical output
const RECORD_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x14, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30,
    0xc8,
]);

/// The computed artifact: one activity record multiplied through one factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionRecord {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub organization_id: Uuid,
    pub assessment_id: Uuid,
    pub category_id: Uuid,
    pub scope: Scope,
    pub scope3_category: Option<u8>,
    /// Quantity as submitted, in the activity's unit
    pub quantity: Decimal,
    pub unit: String,
    /// Quantity after conversion into the factor's unit
    pub quantity_in_factor_unit: Decimal,
    pub factor_id: Uuid,
    /// Frozen copy of the factor at calculation time
    pub factor_snapshot: FactorSnapshot,
    pub co2_kg: Option<Decimal>,
    pub ch4_kg: Option<Decimal>,
    pub n2o_kg: Option<Decimal>,
    pub co2e_kg: Decimal,
    pub uncertainty_percent: Decimal,
    pub uncertainty_low_kg: Decimal,
    pub uncertainty_high_kg: Decimal,
    pub calculation_method: CalculationMethod,
    pub data_quality: DataQuality,
    pub calculated_at: DateTime<Utc>,
    /// Supersession generation, 0 for the first calculation
    pub generation: u32,
    pub superseded_by: Option<Uuid>,
    pub superseded_at: Option<DateTime<Utc>>,
    /// The recalculation event that produced this version, if any
    pub recalculation_event_id: Option<Uuid>,
}

impl EmissionRecord {
    /// Deterministic record id for a given (activity, factor, generation)
    pub fn deterministic_id(activity_id: Uuid, factor_id: Uuid, generation: u32) -> Uuid {
        let name = format!("{activity_id}:{factor_id}:{generation}");
        Uuid::new_v5(&RECORD_ID_NAMESPACE, name.as_bytes())
    }

    /// A record is current until a replacement supersedes it
    pub fn is_current(&self) -> bool {
        self.superseded_by.is_none()
    }

    pub fn co2e_tonnes(&self) -> Decimal {
        self.co2e_kg / Decimal::new(1000, 0)
    }

    /// Sum of the per-gas components, when all are present.
    ///
    /// Components and co2e may be sourced with different GWP vintages, so
    /// this sum is NOT expected to equal `co2e_kg`; the discrepancy is
    /// preserved and surfaced, never reconciled.
    pub fn component_sum_kg(&self) -> Option<Decimal> {
        match (self.co2_kg, self.ch4_kg, self.n2o_kg) {
            (Some(co2), Some(ch4), Some(n2o)) => Some(co2 + ch4 + n2o),
            _ => None,
        }
    }

    /// Mark this record superseded by a replacement
    pub fn supersede(&mut self, replacement_id: Uuid, at: DateTime<Utc>) {
        self.superseded_by = Some(replacement_id);
        self.superseded_at = Some(at);
    }
}
