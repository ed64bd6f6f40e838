//! Append-only engine state store.
//!
//! Emission records are never physically deleted: a recalculation marks the
//! old version superseded (with `superseded_by` linkage) and inserts a
//! replacement in one atomic write, so the aggregator always observes a
//! consistent set of current records. Per-assessment apply locks serialize
//! recalculation without blocking reads or calculation elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    ActivityRecord, Assessment, CalculationFailure, Category, EmissionRecord, GhgRemoval,
    Organization, RecalculationEvent, RecalculationStatus, ReductionTarget, ScopeTotals,
    VerificationRecord,
};

#[derive(Default)]
struct StoreInner {
    organizations: HashMap<Uuid, Organization>,
    assessments: HashMap<Uuid, Assessment>,
    categories: HashMap<Uuid, Category>,
    activities: HashMap<Uuid, ActivityRecord>,
    records: HashMap<Uuid, EmissionRecord>,
    records_by_assessment: HashMap<Uuid, Vec<Uuid>>,
    current_record_by_activity: HashMap<Uuid, Uuid>,
    removals_by_assessment: HashMap<Uuid, Vec<GhgRemoval>>,
    events: HashMap<Uuid, RecalculationEvent>,
    events_by_assessment: HashMap<Uuid, Vec<Uuid>>,
    verifications_by_assessment: HashMap<Uuid, VerificationRecord>,
    targets: HashMap<Uuid, ReductionTarget>,
    failures_by_activity: HashMap<Uuid, CalculationFailure>,
}

/// Shared in-memory store for all engine state
#[derive(Default)]
pub struct EmissionStore {
    inner: RwLock<StoreInner>,
    apply_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl EmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Reference data ──────────────────────────────────────────────────

    pub async fn insert_category(&self, category: Category) {
        let mut inner = self.inner.write().await;
        inner.categories.insert(category.id, category);
    }

    pub async fn category(&self, category_id: Uuid) -> EngineResult<Category> {
        let inner = self.inner.read().await;
        inner
            .categories
            .get(&category_id)
            .cloned()
            .ok_or(EngineError::UnknownCategory(category_id))
    }

    // ── Organizations and assessments ───────────────────────────────────

    pub async fn insert_organization(&self, organization: Organization) {
        let mut inner = self.inner.write().await;
        inner.organizations.insert(organization.id, organization);
    }

    pub async fn organization(&self, organization_id: Uuid) -> EngineResult<Organization> {
        let inner = self.inner.read().await;
        inner
            .organizations
            .get(&organization_id)
            .cloned()
            .ok_or(EngineError::UnknownOrganization(organization_id))
    }

    pub async fn update_organization<F>(&self, organization_id: Uuid, update: F) -> EngineResult<Organization>
    where
        F: FnOnce(&mut Organization),
    {
        let mut inner = self.inner.write().await;
        let organization = inner
            .organizations
            .get_mut(&organization_id)
            .ok_or(EngineError::UnknownOrganization(organization_id))?;
        update(organization);
        Ok(organization.clone())
    }

    pub async fn insert_assessment(&self, assessment: Assessment) {
        let mut inner = self.inner.write().await;
        inner.assessments.insert(assessment.id, assessment);
    }

    pub async fn assessment(&self, assessment_id: Uuid) -> EngineResult<Assessment> {
        let inner = self.inner.read().await;
        inner
            .assessments
            .get(&assessment_id)
            .cloned()
            .ok_or(EngineError::UnknownAssessment(assessment_id))
    }

    pub async fn assessment_for_year(
        &self,
        organization_id: Uuid,
        year: i32,
    ) -> Option<Assessment> {
        let inner = self.inner.read().await;
        inner
            .assessments
            .values()
            .find(|a| a.organization_id == organization_id && a.year == year)
            .cloned()
    }

    pub async fn update_assessment<F>(&self, assessment_id: Uuid, update: F) -> EngineResult<Assessment>
    where
        F: FnOnce(&mut Assessment),
    {
        let mut inner = self.inner.write().await;
        let assessment = inner
            .assessments
            .get_mut(&assessment_id)
            .ok_or(EngineError::UnknownAssessment(assessment_id))?;
        update(assessment);
        Ok(assessment.clone())
    }

    /// Write the aggregator's output into the assessment's cached columns
    pub async fn cache_totals(&self, totals: &ScopeTotals) -> EngineResult<()> {
        self.update_assessment(totals.assessment_id, |assessment| {
            assessment.total_emissions_tonnes = totals.total_tonnes;
            assessment.total_removals_tonnes = totals.total_removals_tonnes;
            assessment.net_emissions_tonnes = totals.net_emissions_tonnes;
            assessment.overall_uncertainty_percent = totals.overall_uncertainty_percent;
            assessment.aggregated_at = Some(totals.aggregated_at);
        })
        .await?;
        Ok(())
    }

    // ── Activities ──────────────────────────────────────────────────────

    pub async fn insert_activity(&self, activity: ActivityRecord) {
        let mut inner = self.inner.write().await;
        inner.activities.insert(activity.id, activity);
    }

    pub async fn activity(&self, activity_id: Uuid) -> EngineResult<ActivityRecord> {
        let inner = self.inner.read().await;
        inner
            .activities
            .get(&activity_id)
            .cloned()
            .ok_or(EngineError::UnknownActivity(activity_id))
    }

    // ── Emission records (append-only) ──────────────────────────────────

    /// Insert a newly calculated record. Idempotent: re-inserting the same
    /// deterministic id is a no-op.
    pub async fn insert_record(&self, record: EmissionRecord) {
        let mut inner = self.inner.write().await;
        if inner.records.contains_key(&record.id) {
            debug!(record_id = %record.id, "record already present, replay ignored");
            return;
        }
        inner
            .records_by_assessment
            .entry(record.assessment_id)
            .or_default()
            .push(record.id);
        inner
            .current_record_by_activity
            .insert(record.activity_id, record.id);
        inner.records.insert(record.id, record);
    }

    pub async fn record(&self, record_id: Uuid) -> Option<EmissionRecord> {
        self.inner.read().await.records.get(&record_id).cloned()
    }

    pub async fn current_record_for_activity(&self, activity_id: Uuid) -> Option<EmissionRecord> {
        let inner = self.inner.read().await;
        inner
            .current_record_by_activity
            .get(&activity_id)
            .and_then(|id| inner.records.get(id))
            .cloned()
    }

    /// Current (non-superseded) records for an assessment
    pub async fn current_records(&self, assessment_id: Uuid) -> Vec<EmissionRecord> {
        let inner = self.inner.read().await;
        inner
            .records_by_assessment
            .get(&assessment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.records.get(id))
                    .filter(|r| r.is_current())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every record version for an assessment, superseded included
    pub async fn all_records(&self, assessment_id: Uuid) -> Vec<EmissionRecord> {
        let inner = self.inner.read().await;
        inner
            .records_by_assessment
            .get(&assessment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.records.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Assessments with at least one current record referencing the factor
    pub async fn assessments_referencing_factor(&self, factor_id: Uuid) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        let mut ids: Vec<Uuid> = inner
            .records
            .values()
            .filter(|r| r.is_current() && r.factor_id == factor_id)
            .map(|r| r.assessment_id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Atomically supersede old records and insert their replacements.
    ///
    /// The single write section guarantees the aggregator never sees a mixed
    /// set of old and new versions.
    pub async fn supersede_and_replace(
        &self,
        replacements: Vec<(Uuid, EmissionRecord)>,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        let mut inner = self.inner.write().await;

        for (old_id, replacement) in replacements {
            if let Some(old) = inner.records.get_mut(&old_id) {
                old.supersede(replacement.id, at);
            } else {
                warn!(record_id = %old_id, "superseded record missing from store");
            }
            if inner.records.contains_key(&replacement.id) {
                continue;
            }
            inner
                .records_by_assessment
                .entry(replacement.assessment_id)
                .or_default()
                .push(replacement.id);
            inner
                .current_record_by_activity
                .insert(replacement.activity_id, replacement.id);
            inner.records.insert(replacement.id, replacement);
        }

        Ok(())
    }

    // ── Removals ────────────────────────────────────────────────────────

    pub async fn insert_removal(&self, removal: GhgRemoval) {
        let mut inner = self.inner.write().await;
        inner
            .removals_by_assessment
            .entry(removal.assessment_id)
            .or_default()
            .push(removal);
    }

    pub async fn removals(&self, assessment_id: Uuid) -> Vec<GhgRemoval> {
        let inner = self.inner.read().await;
        inner
            .removals_by_assessment
            .get(&assessment_id)
            .cloned()
            .unwrap_or_default()
    }

    // ── Recalculation events ────────────────────────────────────────────

    pub async fn insert_event(&self, event: RecalculationEvent) {
        let mut inner = self.inner.write().await;
        inner
            .events_by_assessment
            .entry(event.assessment_id)
            .or_default()
            .push(event.id);
        inner.events.insert(event.id, event);
    }

    pub async fn event(&self, event_id: Uuid) -> EngineResult<RecalculationEvent> {
        let inner = self.inner.read().await;
        inner
            .events
            .get(&event_id)
            .cloned()
            .ok_or(EngineError::UnknownEvent(event_id))
    }

    pub async fn update_event<F>(&self, event_id: Uuid, update: F) -> EngineResult<RecalculationEvent>
    where
        F: FnOnce(&mut RecalculationEvent),
    {
        let mut inner = self.inner.write().await;
        let event = inner
            .events
            .get_mut(&event_id)
            .ok_or(EngineError::UnknownEvent(event_id))?;
        update(event);
        Ok(event.clone())
    }

    /// First pending event against an assessment, if any
    pub async fn pending_event_for(&self, assessment_id: Uuid) -> Option<RecalculationEvent> {
        let inner = self.inner.read().await;
        inner
            .events_by_assessment
            .get(&assessment_id)?
            .iter()
            .filter_map(|id| inner.events.get(id))
            .find(|e| e.status == RecalculationStatus::Pending)
            .cloned()
    }

    /// Timestamp of the most recently applied event for an assessment
    pub async fn latest_applied_event_at(&self, assessment_id: Uuid) -> Option<DateTime<Utc>> {
        let inner = self.inner.read().await;
        inner
            .events_by_assessment
            .get(&assessment_id)?
            .iter()
            .filter_map(|id| inner.events.get(id))
            .filter_map(|e| e.applied_at)
            .max()
    }

    pub async fn events_for(&self, assessment_id: Uuid) -> Vec<RecalculationEvent> {
        let inner = self.inner.read().await;
        inner
            .events_by_assessment
            .get(&assessment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.events.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Verification ────────────────────────────────────────────────────

    pub async fn insert_verification(&self, record: VerificationRecord) {
        let mut inner = self.inner.write().await;
        inner
            .verifications_by_assessment
            .insert(record.assessment_id, record);
    }

    pub async fn verification_for(&self, assessment_id: Uuid) -> Option<VerificationRecord> {
        let inner = self.inner.read().await;
        inner
            .verifications_by_assessment
            .get(&assessment_id)
            .cloned()
    }

    // ── Reduction targets ───────────────────────────────────────────────

    pub async fn insert_target(&self, target: ReductionTarget) {
        let mut inner = self.inner.write().await;
        inner.targets.insert(target.id, target);
    }

    pub async fn target(&self, target_id: Uuid) -> EngineResult<ReductionTarget> {
        let inner = self.inner.read().await;
        inner
            .targets
            .get(&target_id)
            .cloned()
            .ok_or(EngineError::UnknownTarget(target_id))
    }

    // ── Calculation failures ────────────────────────────────────────────

    pub async fn record_failure(&self, activity_id: Uuid, error: String, at: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        let failure = inner
            .failures_by_activity
            .entry(activity_id)
            .or_insert(CalculationFailure {
                activity_id,
                error: error.clone(),
                attempts: 0,
                last_attempt_at: at,
            });
        failure.attempts += 1;
        failure.error = error;
        failure.last_attempt_at = at;
    }

    pub async fn clear_failure(&self, activity_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.failures_by_activity.remove(&activity_id);
    }

    pub async fn failures(&self) -> Vec<CalculationFailure> {
        let inner = self.inner.read().await;
        inner.failures_by_activity.values().cloned().collect()
    }

    // ── Apply serialization ─────────────────────────────────────────────

    /// Per-assessment lock handle serializing recalculation apply. Other
    /// assessments are unaffected.
    pub async fn apply_lock(&self, assessment_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.apply_locks.lock().await;
        locks.entry(assessment_id).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::models::factor::FactorSnapshot;
    use crate::models::{CalculationMethod, DataQuality, Scope};

    fn record(assessment_id: Uuid, activity_id: Uuid, generation: u32) -> EmissionRecord {
        let factor_id = Uuid::new_v4();
        EmissionRecord {
            id: EmissionRecord::deterministic_id(activity_id, factor_id, generation),
            activity_id,
            organization_id: Uuid::new_v4(),
            assessment_id,
            category_id: Uuid::new_v4(),
            scope: Scope::Scope2,
            scope3_category: None,
            quantity: Decimal::new(100, 0),
            unit: "kWh".to_string(),
            quantity_in_factor_unit: Decimal::new(100, 0),
            factor_id,
            factor_snapshot: FactorSnapshot {
                factor_id,
                name: "test".to_string(),
                source: "ademe".to_string(),
                source_id: None,
                unit: "kWh".to_string(),
                co2e_per_unit: Decimal::ONE,
                co2_per_unit: None,
                ch4_per_unit: None,
                n2o_per_unit: None,
                uncertainty_percent: Decimal::new(10, 0),
                country: None,
                valid_from: "2024-01-01".parse().unwrap(),
                valid_until: None,
            },
            co2_kg: None,
            ch4_kg: None,
            n2o_kg: None,
            co2e_kg: Decimal::new(100, 0),
            uncertainty_percent: Decimal::new(10, 0),
            uncertainty_low_kg: Decimal::new(90, 0),
            uncertainty_high_kg: Decimal::new(110, 0),
            calculation_method: CalculationMethod::ActivityBased,
            data_quality: DataQuality::Measured,
            calculated_at: Utc::now(),
            generation,
            superseded_by: None,
            superseded_at: None,
            recalculation_event_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = EmissionStore::new();
        let assessment_id = Uuid::new_v4();
        let r = record(assessment_id, Uuid::new_v4(), 0);

        store.insert_record(r.clone()).await;
        store.insert_record(r.clone()).await;
        assert_eq!(store.current_records(assessment_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_supersede_and_replace_keeps_audit_trail() {
        let store = EmissionStore::new();
        let assessment_id = Uuid::new_v4();
        let activity_id = Uuid::new_v4();
        let old = record(assessment_id, activity_id, 0);
        store.insert_record(old.clone()).await;

        let replacement = record(assessment_id, activity_id, 1);
        let replacement_id = replacement.id;
        store
            .supersede_and_replace(vec![(old.id, replacement)], Utc::now())
            .await
            .unwrap();

        let current = store.current_records(assessment_id).await;
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, replacement_id);

        let all = store.all_records(assessment_id).await;
        assert_eq!(all.len(), 2);
        let superseded = all.iter().find(|r| r.id == old.id).unwrap();
        assert_eq!(superseded.superseded_by, Some(replacement_id));
        assert!(superseded.superseded_at.is_some());
    }

    #[tokio::test]
    async fn test_current_record_follows_activity() {
        let store = EmissionStore::new();
        let assessment_id = Uuid::new_v4();
        let activity_id = Uuid::new_v4();
        let old = record(assessment_id, activity_id, 0);
        store.insert_record(old.clone()).await;

        let replacement = record(assessment_id, activity_id, 1);
        let replacement_id = replacement.id;
        store
            .supersede_and_replace(vec![(old.id, replacement)], Utc::now())
            .await
            .unwrap();

        let current = store.current_record_for_activity(activity_id).await.unwrap();
        assert_eq!(current.id, replacement_id);
    }

    #[tokio::test]
    async fn test_apply_lock_is_exclusive_per_assessment() {
        let store = EmissionStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let lock_a = store.apply_lock(a).await;
        let guard = lock_a.try_lock();
        assert!(guard.is_ok());

        // Same assessment: second try fails while the guard is held
        let lock_a_again = store.apply_lock(a).await;
        assert!(lock_a_again.try_lock().is_err());

        // Different assessment: unaffected
        let lock_b = store.apply_lock(b).await;
        assert!(lock_b.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_failure_retry_counter() {
        let store = EmissionStore::new();
        let activity_id = Uuid::new_v4();
        store
            .record_failure(activity_id, "no factor".to_string(), Utc::now())
            .await;
        store
            .record_failure(activity_id, "no factor".to_string(), Utc::now())
            .await;

        let failures = store.failures().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 2);

        store.clear_failure(activity_id).await;
        assert!(store.failures().await.is_empty());
    }
}
