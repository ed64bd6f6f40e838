//! Assurance workflow orchestration.
//!
//! Transitions into states that assure numbers are blocked while a
//! recalculation event is pending against the assessment, and while the
//! cached totals are older than the last applied recalculation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::models::{AssuranceLevel, VerificationRecord, VerificationState};
use crate::store::EmissionStore;

/// Drives the per-assessment assurance state machine
pub struct VerificationWorkflow {
    store: Arc<EmissionStore>,
    bus: EventBus,
}

impl VerificationWorkflow {
    pub fn new(store: Arc<EmissionStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Open a verification record for an assessment, in Draft
    pub async fn start(
        &self,
        assessment_id: Uuid,
        assurance_level: AssuranceLevel,
        verifier: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<VerificationRecord> {
        let assessment = self.store.assessment(assessment_id).await?;
        if let Some(existing) = self.store.verification_for(assessment_id).await {
            return Ok(existing);
        }

        let mut record = VerificationRecord::new(assessment.organization_id, assessment_id, now);
        record.assurance_level = Some(assurance_level);
        record.verifier = verifier;
        self.store.insert_verification(record.clone()).await;
        info!(assessment_id = %assessment_id, "verification started");
        Ok(record)
    }

    /// Attempt a state transition, enforcing the legality matrix and the
    /// stable-numbers guards.
    pub async fn transition(
        &self,
        assessment_id: Uuid,
        to: VerificationState,
        by: Option<String>,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<VerificationRecord> {
        let mut record = self
            .store
            .verification_for(assessment_id)
            .await
            .ok_or(EngineError::VerificationNotStarted { assessment_id })?;

        if !record.state.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: record.state.to_string(),
                to: to.to_string(),
            });
        }

        if to.requires_stable_numbers() {
            self.ensure_stable(assessment_id).await?;
        }

        let from = record.state;
        record.transition_to(to, by, reason, now);
        self.store.insert_verification(record.clone()).await;
        self.store
            .update_assessment(assessment_id, |assessment| {
                assessment.verification_status = to;
            })
            .await?;

        info!(assessment_id = %assessment_id, from = %from, to = %to, "verification transition");
        self.bus.publish(EngineEvent::VerificationTransition {
            assessment_id,
            from,
            to,
        });
        Ok(record)
    }

    pub async fn add_finding(
        &self,
        assessment_id: Uuid,
        finding: impl Into<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<VerificationRecord> {
        let mut record = self
            .store
            .verification_for(assessment_id)
            .await
            .ok_or(EngineError::VerificationNotStarted { assessment_id })?;
        record.findings.push(finding.into());
        record.updated_at = now;
        self.store.insert_verification(record.clone()).await;
        Ok(record)
    }

    pub async fn status(&self, assessment_id: Uuid) -> EngineResult<VerificationRecord> {
        self.store
            .verification_for(assessment_id)
            .await
            .ok_or(EngineError::VerificationNotStarted { assessment_id })
    }

    /// Numbers are stable when no recalculation event is pending and the
    /// cached totals postdate the last applied event.
    async fn ensure_stable(&self, assessment_id: Uuid) -> EngineResult<()> {
        if let Some(pending) = self.store.pending_event_for(assessment_id).await {
            return Err(EngineError::PendingRecalculation {
                assessment_id,
                event_id: pending.id,
            });
        }

        if let Some(last_applied_at) = self.store.latest_applied_event_at(assessment_id).await {
            let assessment = self.store.assessment(assessment_id).await?;
            let fresh = assessment
                .aggregated_at
                .map(|at| at >= last_applied_at)
                .unwrap_or(false);
            if !fresh {
                return Err(EngineError::StaleAggregation {
                    assessment_id,
                    aggregated_at: assessment.aggregated_at,
                    last_applied_at,
                });
            }
        }
        Ok(())
    }
}
