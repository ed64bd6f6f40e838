//! In-memory indexed store of emission-factor versions.
//!
//! Factors are append-only: a correction is a new row that deactivates the
//! row it corrects. Nothing is ever deleted, so superseded vintages stay
//! available for audit.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{EmissionFactor, NewEmissionFactor};

#[derive(Default)]
struct CatalogInner {
    factors: HashMap<Uuid, EmissionFactor>,
    by_category: HashMap<Uuid, Vec<Uuid>>,
}

/// Shared factor catalog, safe for unbounded concurrent reads
#[derive(Default)]
pub struct FactorCatalog {
    inner: RwLock<CatalogInner>,
}

impl FactorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new factor row. When `corrects` is set, the corrected row
    /// is deactivated (never deleted) and the returned factor supersedes it
    /// for future resolutions.
    pub async fn publish(
        &self,
        new: NewEmissionFactor,
        now: DateTime<Utc>,
    ) -> EngineResult<EmissionFactor> {
        let mut inner = self.inner.write().await;

        if let Some(corrected_id) = new.corrects {
            let corrected = inner
                .factors
                .get_mut(&corrected_id)
                .ok_or(EngineError::UnknownFactor(corrected_id))?;
            corrected.is_active = false;
            info!(
                factor_id = %corrected_id,
                replacement = %new.name,
                "deactivated corrected factor"
            );
        }

        let factor = EmissionFactor {
            id: Uuid::new_v4(),
            category_id: new.category_id,
            name: new.name,
            source: new.source,
            source_id: new.source_id,
            unit: new.unit,
            co2e_per_unit: new.co2e_per_unit,
            co2_per_unit: new.co2_per_unit,
            ch4_per_unit: new.ch4_per_unit,
            n2o_per_unit: new.n2o_per_unit,
            uncertainty_percent: new.uncertainty_percent,
            country: new.country,
            valid_from: new.valid_from,
            valid_until: new.valid_until,
            is_active: true,
            corrects: new.corrects,
            published_at: now,
        };

        inner
            .by_category
            .entry(factor.category_id)
            .or_default()
            .push(factor.id);
        debug!(factor_id = %factor.id, category_id = %factor.category_id, source = %factor.source, "published factor");
        inner.factors.insert(factor.id, factor.clone());

        Ok(factor)
    }

    /// Deactivate a factor: the only sanctioned mutation after publication
    pub async fn deactivate(&self, factor_id: Uuid) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        let factor = inner
            .factors
            .get_mut(&factor_id)
            .ok_or(EngineError::UnknownFactor(factor_id))?;
        factor.is_active = false;
        info!(factor_id = %factor_id, "deactivated factor");
        Ok(())
    }

    pub async fn get(&self, factor_id: Uuid) -> EngineResult<EmissionFactor> {
        let inner = self.inner.read().await;
        inner
            .factors
            .get(&factor_id)
            .cloned()
            .ok_or(EngineError::UnknownFactor(factor_id))
    }

    /// All factor rows for a category, active or not
    pub async fn candidates_for(&self, category_id: Uuid) -> Vec<EmissionFactor> {
        let inner = self.inner.read().await;
        inner
            .by_category
            .get(&category_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.factors.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.factors.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
