//! Engine facade: the single entry point collaborating services go through.
//!
//! Wires the catalog, resolver, calculator, aggregator, auditor, and
//! verification workflow over one shared store. Every operation takes an
//! explicit `now` so a caller replaying inputs gets byte-identical records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregator::ScopeAggregator;
use crate::auditor::RecalculationAuditor;
use crate::baseline::BaselineManager;
use crate::calculator::EmissionCalculator;
use crate::catalog::FactorCatalog;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::models::{
    ActivityRecord, Assessment, AssuranceLevel, BaselineSnapshot, CalculationFailure, Category,
    EmissionFactor, EmissionRecord, GhgRemoval, NewActivityRecord, NewEmissionFactor,
    Organization, RecalculationEvent, RecalculationTrigger, ReductionTarget, Scope, ScopeTotals,
    TargetProgress, VerificationRecord, VerificationState,
};
use crate::resolver::FactorResolver;
use crate::store::EmissionStore;
use crate::verification::VerificationWorkflow;

/// Record query filter
#[derive(Debug, Clone, Default)]
pub struct EmissionFilter {
    pub scope: Option<Scope>,
    pub category_id: Option<Uuid>,
    /// Include superseded versions for audit views
    pub include_superseded: bool,
}

/// Outcome of one intake-queue drain
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub calculated: usize,
    pub failed: usize,
}

/// The emissions calculation and recalculation engine
pub struct EmissionEngine {
    store: Arc<EmissionStore>,
    catalog: Arc<FactorCatalog>,
    resolver: FactorResolver,
    calculator: EmissionCalculator,
    aggregator: ScopeAggregator,
    baseline: BaselineManager,
    auditor: RecalculationAuditor,
    verification: VerificationWorkflow,
    bus: EventBus,
    intake_tx: mpsc::UnboundedSender<Uuid>,
    intake_rx: Mutex<mpsc::UnboundedReceiver<Uuid>>,
}

impl EmissionEngine {
    pub fn new(config: EngineConfig) -> Self {
        let store = Arc::new(EmissionStore::new());
        let catalog = Arc::new(FactorCatalog::new());
        let calculator = EmissionCalculator::new(config.uncertainty.clone());
        let aggregator = ScopeAggregator::new(crate::uncertainty::UncertaintyEstimator::new(
            config.uncertainty.clone(),
        ));
        let baseline = BaselineManager::new();
        let bus = EventBus::new(config.event_channel_capacity);
        let auditor = RecalculationAuditor::new(
            store.clone(),
            catalog.clone(),
            EmissionCalculator::new(config.uncertainty.clone()),
            aggregator.clone(),
            baseline.clone(),
            bus.clone(),
            config.recalculation_threshold_percent,
        );
        let verification = VerificationWorkflow::new(store.clone(), bus.clone());
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();

        Self {
            store,
            catalog,
            resolver: FactorResolver::new(),
            calculator,
            aggregator,
            baseline,
            auditor,
            verification,
            bus,
            intake_tx,
            intake_rx: Mutex::new(intake_rx),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    // ── Reference data ──────────────────────────────────────────────────

    pub async fn register_category(&self, category: Category) -> Uuid {
        let id = category.id;
        self.store.insert_category(category).await;
        id
    }

    /// Publish a factor; when it corrects an existing row, screen every
    /// affected assessment and raise pending recalculation events where the
    /// change is significant.
    pub async fn publish_factor(
        &self,
        new: NewEmissionFactor,
        justification: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<(EmissionFactor, Vec<RecalculationEvent>)> {
        let corrects = new.corrects;
        let factor = self.catalog.publish(new, now).await?;
        self.bus.publish(EngineEvent::FactorPublished {
            factor_id: factor.id,
            category_id: factor.category_id,
            correction: corrects.is_some(),
        });

        let raised = match corrects {
            Some(old_factor_id) => {
                self.auditor
                    .on_factor_correction(old_factor_id, factor.id, justification, now)
                    .await?
            }
            None => Vec::new(),
        };
        Ok((factor, raised))
    }

    pub async fn deactivate_factor(&self, factor_id: Uuid) -> EngineResult<()> {
        self.catalog.deactivate(factor_id).await
    }

    pub async fn factor(&self, factor_id: Uuid) -> EngineResult<EmissionFactor> {
        self.catalog.get(factor_id).await
    }

    // ── Organizations and assessments ───────────────────────────────────

    pub async fn register_organization(
        &self,
        name: impl Into<String>,
        country: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Organization {
        let organization = Organization::new(name, country, now);
        self.store.insert_organization(organization.clone()).await;
        organization
    }

    /// Per-organization override of the recalculation significance threshold
    pub async fn set_recalculation_threshold(
        &self,
        organization_id: Uuid,
        percent: f64,
    ) -> EngineResult<()> {
        self.store
            .update_organization(organization_id, |organization| {
                organization.recalculation_threshold_percent = Some(percent);
            })
            .await?;
        Ok(())
    }

    pub async fn create_assessment(
        &self,
        organization_id: Uuid,
        year: i32,
        now: DateTime<Utc>,
    ) -> EngineResult<Assessment> {
        self.store.organization(organization_id).await?;
        if let Some(existing) = self.store.assessment_for_year(organization_id, year).await {
            return Ok(existing);
        }
        let assessment = Assessment::new(organization_id, year, now);
        self.store.insert_assessment(assessment.clone()).await;
        Ok(assessment)
    }

    pub async fn assessment(&self, assessment_id: Uuid) -> EngineResult<Assessment> {
        self.store.assessment(assessment_id).await
    }

    // ── Activity intake and calculation ─────────────────────────────────

    /// Accept a normalized activity record and queue it for calculation
    pub async fn submit_activity(
        &self,
        new: NewActivityRecord,
        now: DateTime<Utc>,
    ) -> EngineResult<ActivityRecord> {
        if new.quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidActivity {
                reason: format!("quantity {} must be positive", new.quantity),
            });
        }
        if new.unit.trim().is_empty() {
            return Err(EngineError::InvalidActivity {
                reason: "unit must not be empty".to_string(),
            });
        }
        self.store.organization(new.organization_id).await?;
        self.store.assessment(new.assessment_id).await?;
        self.store.category(new.category_id).await?;

        let activity = ActivityRecord {
            id: Uuid::new_v4(),
            organization_id: new.organization_id,
            assessment_id: new.assessment_id,
            category_id: new.category_id,
            country: new.country,
            date: new.date,
            quantity: new.quantity,
            unit: new.unit,
            source_type: new.source_type,
            data_quality: new.data_quality,
            metadata: new.metadata,
            submitted_at: now,
        };
        self.store.insert_activity(activity.clone()).await;
        if self.intake_tx.send(activity.id).is_err() {
            warn!(activity_id = %activity.id, "intake queue closed");
        }
        Ok(activity)
    }

    /// Drain the intake queue. One failing record is logged and retried
    /// later; its siblings keep processing.
    pub async fn process_pending(&self, now: DateTime<Utc>) -> BatchOutcome {
        let mut queue = self.intake_rx.lock().await;
        let mut outcome = BatchOutcome::default();
        let mut touched_assessments = Vec::new();

        while let Ok(activity_id) = queue.try_recv() {
            match self.calculate_activity(activity_id, now).await {
                Ok(record) => {
                    self.store.clear_failure(activity_id).await;
                    if !touched_assessments.contains(&record.assessment_id) {
                        touched_assessments.push(record.assessment_id);
                    }
                    outcome.calculated += 1;
                }
                Err(error) => {
                    let message = error.to_string();
                    warn!(activity_id = %activity_id, error = %message, "calculation failed");
                    self.store.record_failure(activity_id, message.clone(), now).await;
                    let attempts = self
                        .store
                        .failures()
                        .await
                        .into_iter()
                        .find(|f| f.activity_id == activity_id)
                        .map(|f| f.attempts)
                        .unwrap_or(1);
                    self.bus.publish(EngineEvent::CalculationFailed {
                        activity_id,
                        error: message,
                        attempts,
                    });
                    outcome.failed += 1;
                }
            }
        }
        drop(queue);

        for assessment_id in touched_assessments {
            if let Err(error) = self.aggregator.refresh(&self.store, assessment_id, now).await {
                warn!(assessment_id = %assessment_id, error = %error, "re-aggregation failed");
            }
        }
        outcome
    }

    /// Resolve, convert, and calculate one activity record.
    ///
    /// Replaying an already-calculated activity returns the stored record
    /// unchanged.
    pub async fn calculate_activity(
        &self,
        activity_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<EmissionRecord> {
        if let Some(existing) = self.store.current_record_for_activity(activity_id).await {
            return Ok(existing);
        }

        let activity = self.store.activity(activity_id).await?;
        let category = self.store.category(activity.category_id).await?;
        let organization = self.store.organization(activity.organization_id).await?;
        let country = activity
            .country
            .clone()
            .unwrap_or_else(|| organization.country.clone());

        let factor = self
            .resolver
            .resolve(
                &self.catalog,
                activity.category_id,
                Some(&country),
                &activity.unit,
                activity.date,
            )
            .await?;

        let record = self
            .calculator
            .calculate(&activity, &category, &factor, 0, None, now)?;
        self.store.insert_record(record.clone()).await;

        info!(
            activity_id = %activity_id,
            record_id = %record.id,
            co2e_kg = %record.co2e_kg,
            "activity calculated"
        );
        self.bus.publish(EngineEvent::ActivityCalculated {
            activity_id,
            record_id: record.id,
            assessment_id: record.assessment_id,
            co2e_kg: record.co2e_kg,
        });
        Ok(record)
    }

    pub async fn failures(&self) -> Vec<CalculationFailure> {
        self.store.failures().await
    }

    /// Re-queue every failed activity for the next `process_pending` drain
    pub async fn retry_failures(&self) -> usize {
        let failures = self.store.failures().await;
        let mut queued = 0;
        for failure in failures {
            if self.intake_tx.send(failure.activity_id).is_ok() {
                queued += 1;
            }
        }
        queued
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub async fn get_emissions(
        &self,
        assessment_id: Uuid,
        filter: &EmissionFilter,
    ) -> Vec<EmissionRecord> {
        let records = if filter.include_superseded {
            self.store.all_records(assessment_id).await
        } else {
            self.store.current_records(assessment_id).await
        };
        records
            .into_iter()
            .filter(|r| filter.scope.map(|s| r.scope == s).unwrap_or(true))
            .filter(|r| {
                filter
                    .category_id
                    .map(|c| r.category_id == c)
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Re-aggregate and return the assessment's totals
    pub async fn get_totals(
        &self,
        assessment_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<ScopeTotals> {
        let totals = self.aggregator.refresh(&self.store, assessment_id, now).await?;
        self.bus.publish(EngineEvent::TotalsRefreshed {
            assessment_id,
            total_tonnes: totals.total_tonnes,
            aggregated_at: totals.aggregated_at,
        });
        Ok(totals)
    }

    // ── Removals ────────────────────────────────────────────────────────

    pub async fn add_removal(&self, removal: GhgRemoval) -> EngineResult<()> {
        self.store.assessment(removal.assessment_id).await?;
        self.store.insert_removal(removal).await;
        Ok(())
    }

    // ── Recalculation ───────────────────────────────────────────────────

    pub async fn declare_recalculation(
        &self,
        organization_id: Uuid,
        assessment_id: Uuid,
        trigger: RecalculationTrigger,
        justification: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RecalculationEvent> {
        self.auditor
            .declare_change(organization_id, assessment_id, trigger, justification, now)
            .await
    }

    pub async fn approve_recalculation(
        &self,
        event_id: Uuid,
        decided_by: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RecalculationEvent> {
        self.auditor.approve(event_id, decided_by, now).await
    }

    pub async fn reject_recalculation(
        &self,
        event_id: Uuid,
        decided_by: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<RecalculationEvent> {
        self.auditor.reject(event_id, decided_by, now).await
    }

    pub async fn apply_recalculation(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<RecalculationEvent> {
        self.auditor.apply(event_id, now).await
    }

    pub async fn recalculation_events(&self, assessment_id: Uuid) -> Vec<RecalculationEvent> {
        self.store.events_for(assessment_id).await
    }

    // ── Base year and targets ───────────────────────────────────────────

    /// Declare the base year from an assessment's current totals
    pub async fn set_base_year(
        &self,
        organization_id: Uuid,
        assessment_id: Uuid,
        justification: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<BaselineSnapshot> {
        let totals = self.aggregator.refresh(&self.store, assessment_id, now).await?;
        let snapshot = self
            .baseline
            .set_base_year(&self.store, organization_id, &totals, justification, now)
            .await?;
        self.bus.publish(EngineEvent::BaseYearDeclared {
            organization_id,
            base_year: snapshot.base_year,
        });
        Ok(snapshot)
    }

    pub async fn baseline(&self, organization_id: Uuid) -> EngineResult<BaselineSnapshot> {
        self.baseline.baseline(&self.store, organization_id).await
    }

    pub async fn create_target(&self, target: ReductionTarget) -> EngineResult<Uuid> {
        self.store.organization(target.organization_id).await?;
        let id = target.id;
        self.store.insert_target(target).await;
        Ok(id)
    }

    /// Progress of a target against the frozen baseline, using the
    /// assessment's freshly aggregated totals
    pub async fn target_progress(
        &self,
        target_id: Uuid,
        assessment_id: Uuid,
        now: DateTime<Utc>,
    ) -> EngineResult<TargetProgress> {
        let target = self.store.target(target_id).await?;
        let baseline = self.baseline.baseline(&self.store, target.organization_id).await?;
        let totals = self.aggregator.refresh(&self.store, assessment_id, now).await?;
        Ok(target.progress(&baseline, &totals))
    }

    // ── Verification ────────────────────────────────────────────────────

    pub async fn start_verification(
        &self,
        assessment_id: Uuid,
        assurance_level: AssuranceLevel,
        verifier: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<VerificationRecord> {
        self.verification
            .start(assessment_id, assurance_level, verifier, now)
            .await
    }

    pub async fn advance_verification(
        &self,
        assessment_id: Uuid,
        to: VerificationState,
        by: Option<String>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<VerificationRecord> {
        self.verification
            .transition(assessment_id, to, by, reason, now)
            .await
    }

    pub async fn add_verification_finding(
        &self,
        assessment_id: Uuid,
        finding: impl Into<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<VerificationRecord> {
        self.verification.add_finding(assessment_id, finding, now).await
    }

    pub async fn verification_status(
        &self,
        assessment_id: Uuid,
    ) -> EngineResult<VerificationRecord> {
        self.verification.status(assessment_id).await
    }
}
