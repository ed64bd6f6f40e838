//! Assessments: one reporting year per organization, with cached totals.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::category::Scope;
use super::verification::VerificationState;

/// Annual carbon assessment for one organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub year: i32,
    /// Cached columns, written only by the aggregator
    pub total_emissions_tonnes: Decimal,
    pub total_removals_tonnes: Decimal,
    pub net_emissions_tonnes: Decimal,
    pub overall_uncertainty_percent: Option<f64>,
    pub is_base_year: bool,
    pub verification_status: VerificationState,
    /// Watermark of the last aggregator run, used for staleness checks
    pub aggregated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Assessment {
    pub fn new(organization_id: Uuid, year: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            year,
            total_emissions_tonnes: Decimal::ZERO,
            total_removals_tonnes: Decimal::ZERO,
            net_emissions_tonnes: Decimal::ZERO,
            overall_uncertainty_percent: None,
            is_base_year: false,
            verification_status: VerificationState::Draft,
            aggregated_at: None,
            created_at: now,
        }
    }
}

/// A verified or declared GHG removal (sink) counted against gross emissions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhgRemoval {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub assessment_id: Uuid,
    pub name: String,
    pub quantity_tonnes: Decimal,
    pub verified: bool,
    pub removal_date: NaiveDate,
}

/// Per-scope rollup inside aggregated totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeBreakdown {
    pub co2e_kg: Decimal,
    pub tonnes: Decimal,
    pub record_count: usize,
}

/// Per-category rollup inside aggregated totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub co2e_kg: Decimal,
    pub tonnes: Decimal,
    pub record_count: usize,
}

/// Current-vs-baseline comparison carried with aggregated totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseYearComparison {
    pub base_year: i32,
    pub base_year_tonnes: Decimal,
    pub change_tonnes: Decimal,
    /// None when the baseline total is zero
    pub change_percent: Option<f64>,
}

/// Output of the aggregator: the full rollup for one assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeTotals {
    pub assessment_id: Uuid,
    pub organization_id: Uuid,
    pub year: i32,
    pub by_scope: BTreeMap<Scope, ScopeBreakdown>,
    pub by_category: BTreeMap<Uuid, CategoryBreakdown>,
    pub total_co2e_kg: Decimal,
    pub total_tonnes: Decimal,
    pub total_removals_tonnes: Decimal,
    pub net_emissions_tonnes: Decimal,
    pub overall_uncertainty_percent: Option<f64>,
    pub uncertainty_low_kg: Decimal,
    pub uncertainty_high_kg: Decimal,
    pub base_year_comparison: Option<BaseYearComparison>,
    pub record_count: usize,
    pub aggregated_at: DateTime<Utc>,
}

impl ScopeTotals {
    pub fn scope_tonnes(&self, scope: Scope) -> Decimal {
        self.by_scope
            .get(&scope)
            .map(|b| b.tonnes)
            .unwrap_or(Decimal::ZERO)
    }
}
