//! Broadcast notifications for downstream consumers.
//!
//! Fire-and-forget: a lagging or absent subscriber never blocks engine
//! operations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::{RecalculationStatus, VerificationState};

/// Engine lifecycle notifications
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ActivityCalculated {
        activity_id: Uuid,
        record_id: Uuid,
        assessment_id: Uuid,
        co2e_kg: Decimal,
    },
    CalculationFailed {
        activity_id: Uuid,
        error: String,
        attempts: u32,
    },
    FactorPublished {
        factor_id: Uuid,
        category_id: Uuid,
        correction: bool,
    },
    RecalculationProposed {
        event_id: Uuid,
        assessment_id: Uuid,
        change_percent: f64,
        previous_tco2e: Decimal,
        recalculated_tco2e: Decimal,
    },
    RecalculationDecided {
        event_id: Uuid,
        status: RecalculationStatus,
    },
    RecalculationApplied {
        event_id: Uuid,
        assessment_id: Uuid,
        records_replaced: usize,
        previous_tco2e: Decimal,
        recalculated_tco2e: Decimal,
        applied_at: DateTime<Utc>,
    },
    TotalsRefreshed {
        assessment_id: Uuid,
        total_tonnes: Decimal,
        aggregated_at: DateTime<Utc>,
    },
    BaseYearDeclared {
        organization_id: Uuid,
        base_year: i32,
    },
    VerificationTransition {
        assessment_id: Uuid,
        from: VerificationState,
        to: VerificationState,
    },
}

/// Broadcast channel wrapper shared across engine components
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish without caring whether anyone is listening
    pub fn publish(&self, event: EngineEvent) {
        if self.sender.send(event).is_err() {
            debug!("engine event dropped, no subscribers");
        }
    }
}
