//! Recalculation proposal, approval, and apply.
//!
//! Historical numbers only change through an approved recalculation event.
//! Factor corrections are screened against the significance threshold with a
//! dry-run preview; declared changes (methodology, boundary, structural,
//! base year) are material by declaration. Apply holds the assessment's
//! exclusive lock, supersedes the affected records atomically, then
//! re-aggregates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregator::ScopeAggregator;
use crate::baseline::BaselineManager;
use crate::calculator::EmissionCalculator;
use crate::catalog::FactorCatalog;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::models::{
    EmissionRecord, RecalculationEvent, RecalculationStatus, RecalculationTrigger,
};
use crate::resolver::FactorResolver;
use crate::store::EmissionStore;

/// Proposes, decides, and applies recalculation events
pub struct RecalculationAuditor {
    store: Arc<EmissionStore>,
    catalog: Arc<FactorCatalog>,
    calculator: EmissionCalculator,
    aggregator: ScopeAggregator,
    baseline: BaselineManager,
    resolver: FactorResolver,
    bus: EventBus,
    default_threshold_percent: f64,
}

impl RecalculationAuditor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<EmissionStore>,
        catalog: Arc<FactorCatalog>,
        calculator: EmissionCalculator,
        aggregator: ScopeAggregator,
        baseline: BaselineManager,
        bus: EventBus,
        default_threshold_percent: f64,
    ) -> Self {
        Self {
            store,
            catalog,
            calculator,
            aggregator,
            baseline,
            resolver: FactorResolver::new(),
            bus,
            default_threshold_percent,
        }
    }

    /// Screen a published factor correction against every assessment that
    /// references the corrected factor.
    ///
    /// Each affected assessment gets a dry-run preview; a pending event is
    /// raised only where the change clears the organization's significance
    /// threshold. No record is touched here.
    pub async fn on_factor_correction(
        &self,
        old_factor_id: Uuid,
        new_factor_id: Uuid,
        justification: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<RecalculationEvent>> {
        let new_factor = self.catalog.get(new_factor_id).await?;
        let affected = self.store.assessments_referencing_factor(old_factor_id).await;
        let mut raised = Vec::new();

        for assessment_id in affected {
            let assessment = self.store.assessment(assessment_id).await?;
            let organization = self.store.organization(assessment.organization_id).await?;
            let threshold = organization
                .recalculation_threshold_percent
                .unwrap_or(self.default_threshold_percent);

            let records = self.store.current_records(assessment_id).await;
            let previous_kg: Decimal = records.iter().map(|r| r.co2e_kg).sum();
            let mut preview_kg = Decimal::ZERO;
            for record in &records {
                if record.factor_id == old_factor_id {
                    let replacement = self
                        .recalculate_record(record, &new_factor, record.generation + 1, None, now)
                        .await?;
                    preview_kg += replacement.co2e_kg;
                } else {
                    preview_kg += record.co2e_kg;
                }
            }

            let change_percent = change_percent(previous_kg, preview_kg);
            if change_percent.abs() < threshold {
                info!(
                    assessment_id = %assessment_id,
                    change_percent,
                    threshold,
                    "factor correction below significance threshold, no event raised"
                );
                continue;
            }

            let event = RecalculationEvent {
                id: Uuid::new_v4(),
                organization_id: assessment.organization_id,
                assessment_id,
                trigger: RecalculationTrigger::FactorCorrection {
                    old_factor_id,
                    new_factor_id,
                },
                affected_year_start: assessment.year,
                affected_year_end: assessment.year,
                justification: justification.to_string(),
                previous_emissions_tco2e: previous_kg / Decimal::new(1000, 0),
                recalculated_emissions_tco2e: preview_kg / Decimal::new(1000, 0),
                change_percent,
                status: RecalculationStatus::Pending,
                created_at: now,
                decided_by: None,
                decided_at: None,
                applied_at: None,
            };
            info!(
                event_id = %event.id,
                assessment_id = %assessment_id,
                change_percent,
                "recalculation event raised for factor correction"
            );
            self.bus.publish(EngineEvent::RecalculationProposed {
                event_id: event.id,
                assessment_id,
                change_percent,
                previous_tco2e: event.previous_emissions_tco2e,
                recalculated_tco2e: event.recalculated_emissions_tco2e,
            });
            self.store.insert_event(event.clone()).await;
            raised.push(event);
        }

        Ok(raised)
    }

    /// Declare a methodology, boundary, structural, error, or base-year
    /// change. Declared changes are material by definition and always raise
    /// a pending event.
    pub async fn declare_change(
        &self,
        organization_id: Uuid,
        assessment_id: Uuid,
        trigger: RecalculationTrigger,
        justification: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RecalculationEvent> {
        let assessment = self.store.assessment(assessment_id).await?;
        if assessment.organization_id != organization_id {
            return Err(EngineError::UnknownAssessment(assessment_id));
        }

        let records = self.store.current_records(assessment_id).await;
        let previous_kg: Decimal = records.iter().map(|r| r.co2e_kg).sum();

        // Dry-run preview: re-resolve the affected records against today's
        // catalog. Base-year changes restate the baseline, not the records.
        let preview_kg = if matches!(trigger, RecalculationTrigger::BaseYearChange { .. }) {
            previous_kg
        } else {
            let replacements = self.reresolved_replacements(assessment_id, None, now).await?;
            let mut preview = previous_kg;
            for (old_id, replacement) in &replacements {
                if let Some(old) = records.iter().find(|r| r.id == *old_id) {
                    preview -= old.co2e_kg;
                }
                preview += replacement.co2e_kg;
            }
            preview
        };
        let change = change_percent(previous_kg, preview_kg);

        let event = RecalculationEvent {
            id: Uuid::new_v4(),
            organization_id,
            assessment_id,
            trigger,
            affected_year_start: assessment.year,
            affected_year_end: assessment.year,
            justification: justification.to_string(),
            previous_emissions_tco2e: previous_kg / Decimal::new(1000, 0),
            recalculated_emissions_tco2e: preview_kg / Decimal::new(1000, 0),
            change_percent: change,
            status: RecalculationStatus::Pending,
            created_at: now,
            decided_by: None,
            decided_at: None,
            applied_at: None,
        };
        info!(
            event_id = %event.id,
            assessment_id = %assessment_id,
            trigger = event.trigger.as_str(),
            change_percent = change,
            "recalculation change declared"
        );
        self.bus.publish(EngineEvent::RecalculationProposed {
            event_id: event.id,
            assessment_id,
            change_percent: change,
            previous_tco2e: event.previous_emissions_tco2e,
            recalculated_tco2e: event.recalculated_emissions_tco2e,
        });
        self.store.insert_event(event.clone()).await;
        Ok(event)
    }

    pub async fn approve(
        &self,
        event_id: Uuid,
        decided_by: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RecalculationEvent> {
        self.decide(event_id, decided_by, RecalculationStatus::Approved, now)
            .await
    }

    pub async fn reject(
        &self,
        event_id: Uuid,
        decided_by: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RecalculationEvent> {
        self.decide(event_id, decided_by, RecalculationStatus::Rejected, now)
            .await
    }

    async fn decide(
        &self,
        event_id: Uuid,
        decided_by: &str,
        status: RecalculationStatus,
        now: DateTime<Utc>,
    ) -> EngineResult<RecalculationEvent> {
        let current = self.store.event(event_id).await?;
        if current.status != RecalculationStatus::Pending {
            return Err(EngineError::EventNotPending {
                event_id,
                status: current.status.to_string(),
            });
        }

        let updated = self
            .store
            .update_event(event_id, |event| {
                event.status = status;
                event.decided_by = Some(decided_by.to_string());
                event.decided_at = Some(now);
            })
            .await?;
        info!(event_id = %event_id, status = %status, decided_by, "recalculation event decided");
        self.bus
            .publish(EngineEvent::RecalculationDecided { event_id, status });
        Ok(updated)
    }

    /// Apply an approved event under the assessment's exclusive lock.
    ///
    /// Replacement ids are deterministic over (activity, factor, generation),
    /// so a retry after a crash mid-apply stages the same replacements and
    /// converges instead of duplicating.
    pub async fn apply(&self, event_id: Uuid, now: DateTime<Utc>) -> EngineResult<RecalculationEvent> {
        let event = self.store.event(event_id).await?;
        match event.status {
            RecalculationStatus::Approved => {}
            RecalculationStatus::Applied => return Ok(event),
            other => {
                return Err(EngineError::EventNotApproved {
                    event_id,
                    status: other.to_string(),
                })
            }
        }

        let lock = self.store.apply_lock(event.assessment_id).await;
        let _guard = lock.try_lock().map_err(|_| EngineError::ConcurrentApplyConflict {
            assessment_id: event.assessment_id,
        })?;

        let records_replaced = match &event.trigger {
            RecalculationTrigger::FactorCorrection {
                old_factor_id,
                new_factor_id,
            } => {
                self.apply_factor_correction(&event, *old_factor_id, *new_factor_id, now)
                    .await?
            }
            RecalculationTrigger::BaseYearChange { .. } => 0,
            // Declared changes re-execute the calculation against the
            // current catalog for every affected record
            _ => self.apply_reresolution(&event, now).await?,
        };

        let totals = self
            .aggregator
            .refresh(&self.store, event.assessment_id, now)
            .await?;

        if let RecalculationTrigger::BaseYearChange { new_base_year } = event.trigger {
            self.rebase(&event, new_base_year, now).await?;
        }

        let applied = self
            .store
            .update_event(event_id, |e| {
                e.status = RecalculationStatus::Applied;
                e.applied_at = Some(now);
                e.recalculated_emissions_tco2e = totals.total_tonnes;
            })
            .await?;

        info!(
            event_id = %event_id,
            assessment_id = %event.assessment_id,
            records_replaced,
            total_tonnes = %totals.total_tonnes,
            "recalculation event applied"
        );
        self.bus.publish(EngineEvent::RecalculationApplied {
            event_id,
            assessment_id: event.assessment_id,
            records_replaced,
            previous_tco2e: applied.previous_emissions_tco2e,
            recalculated_tco2e: totals.total_tonnes,
            applied_at: now,
        });
        Ok(applied)
    }

    async fn apply_factor_correction(
        &self,
        event: &RecalculationEvent,
        old_factor_id: Uuid,
        new_factor_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let new_factor = self.catalog.get(new_factor_id).await?;
        let records = self.store.current_records(event.assessment_id).await;

        let mut replacements = Vec::new();
        for record in &records {
            if record.factor_id != old_factor_id {
                continue;
            }
            let replacement = self
                .recalculate_record(record, &new_factor, record.generation + 1, Some(event.id), now)
                .await?;
            replacements.push((record.id, replacement));
        }

        if replacements.is_empty() {
            warn!(event_id = %event.id, "approved factor correction matched no current records");
            return Ok(0);
        }

        let count = replacements.len();
        self.store.supersede_and_replace(replacements, now).await?;
        Ok(count)
    }

    /// Supersede and replace every record whose resolution against the
    /// current catalog now yields a different factor
    async fn apply_reresolution(
        &self,
        event: &RecalculationEvent,
        now: DateTime<Utc>,
    ) -> EngineResult<usize> {
        let replacements = self
            .reresolved_replacements(event.assessment_id, Some(event.id), now)
            .await?;
        if replacements.is_empty() {
            info!(event_id = %event.id, "declared change left every resolution unchanged");
            return Ok(0);
        }

        let count = replacements.len();
        self.store.supersede_and_replace(replacements, now).await?;
        Ok(count)
    }

    /// Re-resolve each current record of an assessment at its activity date.
    ///
    /// Records whose resolution still lands on the same factor are left
    /// alone; records whose category no longer resolves at all keep their
    /// frozen snapshot. An ambiguous catalog aborts the run.
    async fn reresolved_replacements(
        &self,
        assessment_id: Uuid,
        event_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<(Uuid, EmissionRecord)>> {
        let records = self.store.current_records(assessment_id).await;
        let mut replacements = Vec::new();

        for record in &records {
            let activity = self.store.activity(record.activity_id).await?;
            let organization = self.store.organization(activity.organization_id).await?;
            let country = activity
                .country
                .clone()
                .unwrap_or_else(|| organization.country.clone());

            let factor = match self
                .resolver
                .resolve(
                    &self.catalog,
                    activity.category_id,
                    Some(&country),
                    &activity.unit,
                    activity.date,
                )
                .await
            {
                Ok(factor) => factor,
                Err(EngineError::FactorNotFound { .. }) => continue,
                Err(error) => return Err(error),
            };
            if factor.id == record.factor_id {
                continue;
            }

            let replacement = self
                .recalculate_record(record, &factor, record.generation + 1, event_id, now)
                .await?;
            replacements.push((record.id, replacement));
        }

        Ok(replacements)
    }

    async fn recalculate_record(
        &self,
        record: &EmissionRecord,
        factor: &crate::models::EmissionFactor,
        generation: u32,
        event_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> EngineResult<EmissionRecord> {
        let activity = self.store.activity(record.activity_id).await?;
        let category = self.store.category(record.category_id).await?;
        self.calculator
            .calculate(&activity, &category, factor, generation, event_id, now)
    }

    async fn rebase(
        &self,
        event: &RecalculationEvent,
        new_base_year: i32,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let assessment = self
            .store
            .assessment_for_year(event.organization_id, new_base_year)
            .await
            .ok_or(EngineError::NoAssessmentForYear {
                organization_id: event.organization_id,
                year: new_base_year,
            })?;

        let old_base = self
            .store
            .organization(event.organization_id)
            .await?
            .baseline
            .map(|b| b.base_year);
        if let Some(year) = old_base {
            if let Some(old_assessment) = self.store.assessment_for_year(event.organization_id, year).await {
                self.store
                    .update_assessment(old_assessment.id, |a| a.is_base_year = false)
                    .await?;
            }
        }

        let totals = self.aggregator.refresh(&self.store, assessment.id, now).await?;
        self.baseline
            .replace_baseline(
                &self.store,
                event.organization_id,
                &totals,
                event.justification.clone(),
                event.id,
                now,
            )
            .await?;
        self.bus.publish(EngineEvent::BaseYearDeclared {
            organization_id: event.organization_id,
            base_year: new_base_year,
        });
        Ok(())
    }
}

fn change_percent(previous_kg: Decimal, recalculated_kg: Decimal) -> f64 {
    if previous_kg.is_zero() {
        return 0.0;
    }
    ((recalculated_kg - previous_kg) / previous_kg)
        .to_f64()
        .map(|fraction| fraction * 100.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_percent() {
        let previous = Decimal::new(100_000, 0);
        assert!((change_percent(previous, Decimal::new(106_000, 0)) - 6.0).abs() < 1e-9);
        assert!((change_percent(previous, Decimal::new(97_000, 0)) + 3.0).abs() < 1e-9);
        assert_eq!(change_percent(Decimal::ZERO, Decimal::new(100, 0)), 0.0);
    }
}
