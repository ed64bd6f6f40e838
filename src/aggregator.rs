//! Scope and category rollups over current emission records.
//!
//! The rollup is a pure function of the current record set, the removals, and
//! the organization's baseline; `refresh` runs it against the store and
//! writes the result back into the assessment's cached columns together with
//! an `aggregated_at` watermark.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::models::{
    Assessment, BaselineSnapshot, BaseYearComparison, CategoryBreakdown, EmissionRecord,
    GhgRemoval, ScopeBreakdown, ScopeTotals,
};
use crate::store::EmissionStore;
use crate::uncertainty::UncertaintyEstimator;

const KG_PER_TONNE: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);

/// Rolls current records up into per-scope and per-category totals
#[derive(Debug, Clone)]
pub struct ScopeAggregator {
    estimator: UncertaintyEstimator,
}

impl ScopeAggregator {
    pub fn new(estimator: UncertaintyEstimator) -> Self {
        Self { estimator }
    }

    /// Pure rollup over an already-fetched record set
    pub fn aggregate(
        &self,
        assessment: &Assessment,
        records: &[EmissionRecord],
        removals: &[GhgRemoval],
        baseline: Option<&BaselineSnapshot>,
        now: DateTime<Utc>,
    ) -> ScopeTotals {
        let mut by_scope = std::collections::BTreeMap::new();
        let mut by_category = std::collections::BTreeMap::new();
        let mut total_co2e_kg = Decimal::ZERO;

        for record in records {
            total_co2e_kg += record.co2e_kg;

            let scope: &mut ScopeBreakdown = by_scope.entry(record.scope).or_default();
            scope.co2e_kg += record.co2e_kg;
            scope.tonnes = scope.co2e_kg / KG_PER_TONNE;
            scope.record_count += 1;

            let category: &mut CategoryBreakdown =
                by_category.entry(record.category_id).or_default();
            category.co2e_kg += record.co2e_kg;
            category.tonnes = category.co2e_kg / KG_PER_TONNE;
            category.record_count += 1;
        }

        let total_tonnes = total_co2e_kg / KG_PER_TONNE;
        let total_removals_tonnes: Decimal = removals
            .iter()
            .filter(|r| r.verified)
            .map(|r| r.quantity_tonnes)
            .sum();
        let net_emissions_tonnes = total_tonnes - total_removals_tonnes;

        let uncertainty = self.estimator.aggregate(records);

        let base_year_comparison = baseline
            .filter(|b| b.base_year != assessment.year)
            .map(|b| {
                let change_tonnes = total_tonnes - b.total_emissions_tonnes;
                let change_percent = if b.total_emissions_tonnes.is_zero() {
                    None
                } else {
                    (change_tonnes / b.total_emissions_tonnes)
                        .to_f64()
                        .map(|fraction| fraction * 100.0)
                };
                BaseYearComparison {
                    base_year: b.base_year,
                    base_year_tonnes: b.total_emissions_tonnes,
                    change_tonnes,
                    change_percent,
                }
            });

        ScopeTotals {
            assessment_id: assessment.id,
            organization_id: assessment.organization_id,
            year: assessment.year,
            by_scope,
            by_category,
            total_co2e_kg,
            total_tonnes,
            total_removals_tonnes,
            net_emissions_tonnes,
            overall_uncertainty_percent: uncertainty.percent,
            uncertainty_low_kg: uncertainty.low_kg,
            uncertainty_high_kg: uncertainty.high_kg,
            base_year_comparison,
            record_count: records.len(),
            aggregated_at: now,
        }
    }

    /// Re-aggregate from the store and write the cached columns back
    pub async fn refresh(
        &self,
        store: &EmissionStore,
        assessment_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<ScopeTotals> {
        let assessment = store.assessment(assessment_id).await?;
        let organization = store.organization(assessment.organization_id).await?;
        let records = store.current_records(assessment_id).await;
        let removals = store.removals(assessment_id).await;

        let totals = self.aggregate(
            &assessment,
            &records,
            &removals,
            organization.baseline.as_ref(),
            now,
        );
        store.cache_totals(&totals).await?;

        debug!(
            assessment_id = %assessment_id,
            total_tonnes = %totals.total_tonnes,
            records = totals.record_count,
            "aggregated assessment totals"
        );
        Ok(totals)
    }
}
