//! Reduction targets and progress against the frozen baseline.
//!
//! Targets are user-declared; the engine only reads them to compute progress
//! and never mutates them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::assessment::ScopeTotals;
use super::category::Scope;
use super::organization::BaselineSnapshot;

/// A declared emissions-reduction target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReductionTarget {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub baseline_year: i32,
    pub target_year: i32,
    /// Overall reduction commitment relative to the baseline, in percent
    pub overall_reduction_percent: Decimal,
    /// Optional per-scope commitments
    pub scope_reduction_percent: BTreeMap<Scope, Decimal>,
    /// Whether the target follows an SBTi-validated trajectory
    pub sbti_aligned: bool,
    pub created_at: DateTime<Utc>,
}

/// Progress of one dimension (overall or per scope) toward its commitment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionProgress {
    /// Committed reduction at target year, percent
    pub committed_percent: Decimal,
    /// Reduction expected by now on a linear trajectory, percent
    pub expected_percent: f64,
    /// Reduction achieved against the baseline, percent (negative = increase)
    pub achieved_percent: Option<f64>,
    pub on_track: bool,
}

/// Progress report for a reduction target at a given reporting year
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetProgress {
    pub target_id: Uuid,
    pub as_of_year: i32,
    pub overall: DimensionProgress,
    pub by_scope: BTreeMap<Scope, DimensionProgress>,
    pub sbti_aligned: bool,
}

impl ReductionTarget {
    /// Compute progress against the baseline using current aggregated totals
    pub fn progress(&self, baseline: &BaselineSnapshot, current: &ScopeTotals) -> TargetProgress {
        let as_of_year = current.year;
        let overall = dimension_progress(
            self.overall_reduction_percent,
            baseline.total_emissions_tonnes,
            current.total_tonnes,
            self.baseline_year,
            self.target_year,
            as_of_year,
        );

        let by_scope = self
            .scope_reduction_percent
            .iter()
            .map(|(scope, committed)| {
                let base = baseline
                    .by_scope_tonnes
                    .get(scope)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                let progress = dimension_progress(
                    *committed,
                    base,
                    current.scope_tonnes(*scope),
                    self.baseline_year,
                    self.target_year,
                    as_of_year,
                );
                (*scope, progress)
            })
            .collect();

        TargetProgress {
            target_id: self.id,
            as_of_year,
            overall,
            by_scope,
            sbti_aligned: self.sbti_aligned,
        }
    }
}

fn dimension_progress(
    committed: Decimal,
    baseline_tonnes: Decimal,
    current_tonnes: Decimal,
    baseline_year: i32,
    target_year: i32,
    as_of_year: i32,
) -> DimensionProgress {
    let span = (target_year - baseline_year).max(1) as f64;
    let elapsed = (as_of_year - baseline_year).clamp(0, target_year - baseline_year) as f64;
    let expected = committed.to_f64().unwrap_or(0.0) * elapsed / span;

    let achieved = if baseline_tonnes > Decimal::ZERO {
        let change = (baseline_tonnes - current_tonnes) / baseline_tonnes * Decimal::new(100, 0);
        change.to_f64()
    } else {
        None
    };

    DimensionProgress {
        committed_percent: committed,
        expected_percent: expected,
        achieved_percent: achieved,
        on_track: achieved.map(|a| a >= expected).unwrap_or(false),
    }
}
