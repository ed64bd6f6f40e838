//! Uncertainty quantification (ISO 14064-1 section 5.3, IPCC tier 1 style).
//!
//! Per-record uncertainty is the factor's declared percentage scaled by a
//! data-quality multiplier. Aggregate uncertainty combines in quadrature,
//! weighted by each record's share of total CO2e, so adding independent
//! records narrows relative uncertainty instead of averaging or inflating it.

use std::collections::BTreeMap;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::UncertaintyConfig;
use crate::models::{DataQuality, EmissionRecord, Scope};

/// Aggregate uncertainty over a set of records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateUncertainty {
    /// Combined relative uncertainty, percent at 95% confidence
    pub percent: Option<f64>,
    pub low_kg: Decimal,
    pub high_kg: Decimal,
    /// Per-scope relative uncertainty
    pub by_scope_percent: BTreeMap<Scope, f64>,
    /// Record counts per data-quality tier
    pub quality_summary: BTreeMap<DataQuality, usize>,
}

/// Computes per-record and aggregate uncertainty bands
#[derive(Debug, Clone)]
pub struct UncertaintyEstimator {
    config: UncertaintyConfig,
}

impl UncertaintyEstimator {
    pub fn new(config: UncertaintyConfig) -> Self {
        Self { config }
    }

    /// Data-quality multiplier for a tier
    pub fn quality_multiplier(&self, quality: DataQuality) -> Decimal {
        match quality {
            DataQuality::Measured => self.config.measured_multiplier,
            DataQuality::Calculated => self.config.calculated_multiplier,
            DataQuality::Estimated => self.config.estimated_multiplier,
        }
    }

    /// Combined uncertainty for one record, percent
    pub fn record_percent(&self, factor_percent: Decimal, quality: DataQuality) -> Decimal {
        factor_percent * self.quality_multiplier(quality)
    }

    /// Absolute bounds around an emission figure for a given percent
    pub fn bounds(co2e_kg: Decimal, percent: Decimal) -> (Decimal, Decimal) {
        let fraction = percent / Decimal::new(100, 0);
        (
            co2e_kg * (Decimal::ONE - fraction),
            co2e_kg * (Decimal::ONE + fraction),
        )
    }

    /// Quadrature aggregation across records:
    /// `percent = sqrt(Σ (w_i · u_i)²)` with `w_i = co2e_i / Σ co2e`.
    pub fn aggregate(&self, records: &[EmissionRecord]) -> AggregateUncertainty {
        let mut quality_summary: BTreeMap<DataQuality, usize> = BTreeMap::new();
        for record in records {
            *quality_summary.entry(record.data_quality).or_default() += 1;
        }

        let total_kg: Decimal = records.iter().map(|r| r.co2e_kg).sum();
        if total_kg <= Decimal::ZERO {
            return AggregateUncertainty {
                percent: None,
                low_kg: Decimal::ZERO,
                high_kg: Decimal::ZERO,
                by_scope_percent: BTreeMap::new(),
                quality_summary,
            };
        }

        let percent = Self::quadrature(records, total_kg);

        let mut by_scope_percent = BTreeMap::new();
        let mut scopes: Vec<Scope> = records.iter().map(|r| r.scope).collect();
        scopes.sort();
        scopes.dedup();
        for scope in scopes {
            let scoped: Vec<EmissionRecord> = records
                .iter()
                .filter(|r| r.scope == scope)
                .cloned()
                .collect();
            let scope_total: Decimal = scoped.iter().map(|r| r.co2e_kg).sum();
            if scope_total > Decimal::ZERO {
                by_scope_percent.insert(scope, Self::quadrature(&scoped, scope_total));
            }
        }

        let fraction = Decimal::from_f64(percent / 100.0).unwrap_or(Decimal::ZERO);
        AggregateUncertainty {
            percent: Some(percent),
            low_kg: total_kg * (Decimal::ONE - fraction),
            high_kg: total_kg * (Decimal::ONE + fraction),
            by_scope_percent,
            quality_summary,
        }
    }

    fn quadrature(records: &[EmissionRecord], total_kg: Decimal) -> f64 {
        let total = total_kg.to_f64().unwrap_or(0.0);
        if total == 0.0 {
            return 0.0;
        }
        let sum_of_squares: f64 = records
            .iter()
            .map(|r| {
                let weight = r.co2e_kg.to_f64().unwrap_or(0.0) / total;
                let u = r.uncertainty_percent.to_f64().unwrap_or(0.0);
                (weight * u).powi(2)
            })
            .sum();
        sum_of_squares.sqrt()
    }
}
