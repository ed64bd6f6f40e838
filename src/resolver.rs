//! Factor resolution.
//!
//! Given a category, country, unit, and effective date, selects the single
//! applicable factor. Resolution is explicit about failure: no candidate
//! means `FactorNotFound`, an unresolvable tie means `AmbiguousFactor`.
//! A wrong factor is worse than a missing one, so nothing defaults.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::catalog::FactorCatalog;
use crate::error::{EngineError, EngineResult};
use crate::models::EmissionFactor;
use crate::units;

/// Stateless factor resolver. Read-only over the catalog, safe to call with
/// unbounded parallelism.
#[derive(Debug, Default, Clone, Copy)]
pub struct FactorResolver;

impl FactorResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the applicable factor for (category, country, unit) at a date.
    ///
    /// Tie-break order: exact country beats global, then most recent
    /// `valid_from`, then lowest declared uncertainty. A tie after all three
    /// fails with `AmbiguousFactor` rather than guessing.
    pub async fn resolve(
        &self,
        catalog: &FactorCatalog,
        category_id: Uuid,
        country: Option<&str>,
        unit: &str,
        as_of: NaiveDate,
    ) -> EngineResult<EmissionFactor> {
        let candidates = catalog.candidates_for(category_id).await;

        let mut viable: Vec<EmissionFactor> = candidates
            .into_iter()
            .filter(|f| f.is_active)
            .filter(|f| f.is_valid_at(as_of))
            .filter(|f| f.applies_to_country(country))
            .filter(|f| units::convertible(unit, &f.unit))
            .collect();

        if viable.is_empty() {
            return Err(EngineError::FactorNotFound {
                category_id,
                unit: unit.to_string(),
                country: country.map(str::to_string),
                as_of,
            });
        }

        // (1) exact country match beats global
        if country.is_some() && viable.iter().any(|f| f.country.is_some()) {
            viable.retain(|f| f.country.is_some());
        }

        // (2) most recent valid_from wins
        if let Some(latest) = viable.iter().map(|f| f.valid_from).max() {
            viable.retain(|f| f.valid_from == latest);
        }

        // (3) tightest declared uncertainty wins
        if let Some(tightest) = viable.iter().map(|f| f.uncertainty_percent).min() {
            viable.retain(|f| f.uncertainty_percent == tightest);
        }

        if viable.len() > 1 {
            return Err(EngineError::AmbiguousFactor {
                category_id,
                candidates: viable.iter().map(|f| f.id).collect(),
            });
        }

        let factor = viable.remove(0);
        debug!(
            category_id = %category_id,
            factor_id = %factor.id,
            unit = %unit,
            as_of = %as_of,
            "resolved emission factor"
        );
        Ok(factor)
    }

    /// Multiplier converting the activity unit into the factor unit
    pub fn conversion_multiplier(
        &self,
        activity_unit: &str,
        factor: &EmissionFactor,
    ) -> EngineResult<Decimal> {
        units::multiplier(activity_unit, &factor.unit).ok_or_else(|| EngineError::UnitMismatch {
            from: activity_unit.to_string(),
            to: factor.unit.clone(),
        })
    }
}
