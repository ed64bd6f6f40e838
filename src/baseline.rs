//! Base-year declaration and the frozen baseline snapshot.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{BaselineSnapshot, Organization, Scope, ScopeTotals};
use crate::store::EmissionStore;

/// Declares and guards the organization's base year
#[derive(Debug, Clone, Default)]
pub struct BaselineManager;

impl BaselineManager {
    pub fn new() -> Self {
        Self
    }

    /// Declare the base year from an assessment's aggregated totals.
    ///
    /// The snapshot freezes the figures as they stand; once set, the baseline
    /// only moves through an approved base-year-change recalculation event.
    pub async fn set_base_year(
        &self,
        store: &EmissionStore,
        organization_id: Uuid,
        totals: &ScopeTotals,
        justification: impl Into<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<BaselineSnapshot> {
        let organization = store.organization(organization_id).await?;
        if let Some(existing) = &organization.baseline {
            return Err(EngineError::BaselineLocked {
                organization_id,
                base_year: existing.base_year,
            });
        }

        let snapshot = Self::snapshot_from_totals(totals, justification.into(), now, None);
        self.install(store, organization_id, totals.assessment_id, snapshot.clone())
            .await?;

        info!(
            organization_id = %organization_id,
            base_year = snapshot.base_year,
            total_tonnes = %snapshot.total_emissions_tonnes,
            "base year declared"
        );
        Ok(snapshot)
    }

    /// Replace the baseline on behalf of an approved recalculation event
    pub async fn replace_baseline(
        &self,
        store: &EmissionStore,
        organization_id: Uuid,
        totals: &ScopeTotals,
        justification: String,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<BaselineSnapshot> {
        let snapshot = Self::snapshot_from_totals(totals, justification, now, Some(event_id));
        self.install(store, organization_id, totals.assessment_id, snapshot.clone())
            .await?;

        info!(
            organization_id = %organization_id,
            base_year = snapshot.base_year,
            event_id = %event_id,
            "baseline replaced by recalculation event"
        );
        Ok(snapshot)
    }

    pub async fn baseline(
        &self,
        store: &EmissionStore,
        organization_id: Uuid,
    ) -> EngineResult<BaselineSnapshot> {
        let organization: Organization = store.organization(organization_id).await?;
        organization
            .baseline
            .ok_or(EngineError::BaselineNotSet { organization_id })
    }

    fn snapshot_from_totals(
        totals: &ScopeTotals,
        justification: String,
        now: DateTime<Utc>,
        event_id: Option<Uuid>,
    ) -> BaselineSnapshot {
        let by_scope_tonnes = [Scope::Scope1, Scope::Scope2, Scope::Scope3]
            .into_iter()
            .map(|scope| (scope, totals.scope_tonnes(scope)))
            .collect();
        BaselineSnapshot {
            base_year: totals.year,
            total_emissions_tonnes: totals.total_tonnes,
            by_scope_tonnes,
            justification,
            declared_at: now,
            recalculation_event_id: event_id,
        }
    }

    async fn install(
        &self,
        store: &EmissionStore,
        organization_id: Uuid,
        assessment_id: Uuid,
        snapshot: BaselineSnapshot,
    ) -> EngineResult<()> {
        store
            .update_organization(organization_id, |organization| {
                organization.baseline = Some(snapshot);
            })
            .await?;
        store
            .update_assessment(assessment_id, |assessment| {
                assessment.is_base_year = true;
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::models::Assessment;

    fn totals_for(assessment: &Assessment, tonnes: Decimal) -> ScopeTotals {
        ScopeTotals {
            assessment_id: assessment.id,
            organization_id: assessment.organization_id,
            year: assessment.year,
            by_scope: Default::default(),
            by_category: Default::default(),
            total_co2e_kg: tonnes * Decimal::new(1000, 0),
            total_tonnes: tonnes,
            total_removals_tonnes: Decimal::ZERO,
            net_emissions_tonnes: tonnes,
            overall_uncertainty_percent: None,
            uncertainty_low_kg: Decimal::ZERO,
            uncertainty_high_kg: Decimal::ZERO,
            base_year_comparison: None,
            record_count: 1,
            aggregated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_set_base_year_freezes_totals() {
        let store = EmissionStore::new();
        let organization = Organization::new("Acme", "FR", Utc::now());
        let organization_id = organization.id;
        let assessment = Assessment::new(organization_id, 2024, Utc::now());
        let assessment_id = assessment.id;
        store.insert_organization(organization).await;
        store.insert_assessment(assessment.clone()).await;

        let manager = BaselineManager::new();
        let totals = totals_for(&assessment, Decimal::new(100, 0));
        let snapshot = manager
            .set_base_year(&store, organization_id, &totals, "first full year", Utc::now())
            .await
            .unwrap();

        assert_eq!(snapshot.base_year, 2024);
        assert_eq!(snapshot.total_emissions_tonnes, Decimal::new(100, 0));
        assert!(store.assessment(assessment_id).await.unwrap().is_base_year);
        assert_eq!(
            manager.baseline(&store, organization_id).await.unwrap().base_year,
            2024
        );
    }

    #[tokio::test]
    async fn test_second_declaration_is_rejected() {
        let store = EmissionStore::new();
        let organization = Organization::new("Acme", "FR", Utc::now());
        let organization_id = organization.id;
        let assessment = Assessment::new(organization_id, 2024, Utc::now());
        store.insert_organization(organization).await;
        store.insert_assessment(assessment.clone()).await;

        let manager = BaselineManager::new();
        let totals = totals_for(&assessment, Decimal::new(100, 0));
        manager
            .set_base_year(&store, organization_id, &totals, "first", Utc::now())
            .await
            .unwrap();

        let err = manager
            .set_base_year(&store, organization_id, &totals, "again", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::BaselineLocked { base_year: 2024, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_baseline() {
        let store = EmissionStore::new();
        let organization = Organization::new("Acme", "FR", Utc::now());
        let organization_id = organization.id;
        store.insert_organization(organization).await;

        let err = BaselineManager::new()
            .baseline(&store, organization_id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BaselineNotSet { .. }));
    }
}
