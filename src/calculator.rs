//! Emission calculation.
//!
//! Converts an activity quantity and a resolved factor into a multi-gas
//! emission record with a frozen factor snapshot. The calculation is a pure
//! function of its inputs: the caller supplies the clock, and record ids are
//! derived deterministically, so replaying the same inputs yields
//! byte-identical output.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::config::UncertaintyConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{ActivityRecord, Category, EmissionFactor, EmissionRecord};
use crate::uncertainty::UncertaintyEstimator;
use crate::units;

/// Pure calculator: activity × factor → emission record
#[derive(Debug, Clone)]
pub struct EmissionCalculator {
    estimator: UncertaintyEstimator,
}

impl EmissionCalculator {
    pub fn new(uncertainty: UncertaintyConfig) -> Self {
        Self {
            estimator: UncertaintyEstimator::new(uncertainty),
        }
    }

    /// Calculate one emission record.
    ///
    /// `generation` is 0 for a first calculation and `previous + 1` for a
    /// recalculation replacement; `recalculation_event_id` links replacements
    /// to the event that sanctioned them.
    ///
    /// Gas components are computed independently of co2e and are NOT
    /// reconciled against it: the factor's co2e may carry a different GWP
    /// vintage than its per-gas breakdown, and that discrepancy is preserved.
    pub fn calculate(
        &self,
        activity: &ActivityRecord,
        category: &Category,
        factor: &EmissionFactor,
        generation: u32,
        recalculation_event_id: Option<Uuid>,
        calculated_at: DateTime<Utc>,
    ) -> EngineResult<EmissionRecord> {
        let multiplier = units::multiplier(&activity.unit, &factor.unit).ok_or_else(|| {
            EngineError::UnitMismatch {
                from: activity.unit.clone(),
                to: factor.unit.clone(),
            }
        })?;

        let quantity_in_factor_unit = activity.quantity * multiplier;
        let co2e_kg = quantity_in_factor_unit * factor.co2e_per_unit;
        let co2_kg = factor.co2_per_unit.map(|c| quantity_in_factor_unit * c);
        let ch4_kg = factor.ch4_per_unit.map(|c| quantity_in_factor_unit * c);
        let n2o_kg = factor.n2o_per_unit.map(|c| quantity_in_factor_unit * c);

        let uncertainty_percent = self
            .estimator
            .record_percent(factor.uncertainty_percent, activity.data_quality);
        let (uncertainty_low_kg, uncertainty_high_kg) =
            UncertaintyEstimator::bounds(co2e_kg, uncertainty_percent);

        let record = EmissionRecord {
            id: EmissionRecord::deterministic_id(activity.id, factor.id, generation),
            activity_id: activity.id,
            organization_id: activity.organization_id,
            assessment_id: activity.assessment_id,
            category_id: category.id,
            scope: category.scope,
            scope3_category: category.scope3_category,
            quantity: activity.quantity,
            unit: activity.unit.clone(),
            quantity_in_factor_unit,
            factor_id: factor.id,
            factor_snapshot: factor.snapshot(),
            co2_kg,
            ch4_kg,
            n2o_kg,
            co2e_kg,
            uncertainty_percent,
            uncertainty_low_kg,
            uncertainty_high_kg,
            calculation_method: category.calculation_method,
            data_quality: activity.data_quality,
            calculated_at,
            generation,
            superseded_by: None,
            superseded_at: None,
            recalculation_event_id,
        };

        debug!(
            activity_id = %activity.id,
            factor_id = %factor.id,
            co2e_kg = %co2e_kg,
            generation,
            "calculated emission record"
        );
        Ok(record)
    }
}
