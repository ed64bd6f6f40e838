//! Error types for the emissions engine.
//!
//! One taxonomy enum covers resolution, calculation, aggregation, and
//! workflow failures. A wrong factor is worse than a missing one, so
//! resolution failures propagate instead of defaulting.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Main error type for the emissions engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(
        "no emission factor for category {category_id}, unit '{unit}', country {country:?} at {as_of}"
    )]
    FactorNotFound {
        category_id: Uuid,
        unit: String,
        country: Option<String>,
        as_of: NaiveDate,
    },

    #[error("ambiguous emission factor for category {category_id}: candidates {candidates:?} tie after all tie-breaks")]
    AmbiguousFactor {
        category_id: Uuid,
        candidates: Vec<Uuid>,
    },

    #[error("no conversion path from unit '{from}' to '{to}'")]
    UnitMismatch { from: String, to: String },

    #[error("aggregation for assessment {assessment_id} is stale: aggregated at {aggregated_at:?}, last recalculation applied at {last_applied_at}")]
    StaleAggregation {
        assessment_id: Uuid,
        aggregated_at: Option<DateTime<Utc>>,
        last_applied_at: DateTime<Utc>,
    },

    #[error("a recalculation apply is already in flight for assessment {assessment_id}")]
    ConcurrentApplyConflict { assessment_id: Uuid },

    #[error("invalid verification transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("assessment {assessment_id} has pending recalculation event {event_id}; numbers must be stable before assurance")]
    PendingRecalculation {
        assessment_id: Uuid,
        event_id: Uuid,
    },

    #[error("organization {organization_id} already declared base year {base_year}; changing it requires an approved base-year-change recalculation event")]
    BaselineLocked {
        organization_id: Uuid,
        base_year: i32,
    },

    #[error("no baseline declared for organization {organization_id}")]
    BaselineNotSet { organization_id: Uuid },

    #[error("invalid category definition: {reason}")]
    InvalidCategory { reason: String },

    #[error("invalid activity record: {reason}")]
    InvalidActivity { reason: String },

    #[error("recalculation event {event_id} is '{status}', expected 'pending'")]
    EventNotPending { event_id: Uuid, status: String },

    #[error("recalculation event {event_id} is '{status}', expected 'approved'")]
    EventNotApproved { event_id: Uuid, status: String },

    #[error("verification has not been started for assessment {assessment_id}")]
    VerificationNotStarted { assessment_id: Uuid },

    #[error("unknown organization {0}")]
    UnknownOrganization(Uuid),

    #[error("unknown assessment {0}")]
    UnknownAssessment(Uuid),

    #[error("organization {organization_id} has no assessment for year {year}")]
    NoAssessmentForYear { organization_id: Uuid, year: i32 },

    #[error("unknown category {0}")]
    UnknownCategory(Uuid),

    #[error("unknown emission factor {0}")]
    UnknownFactor(Uuid),

    #[error("unknown activity record {0}")]
    UnknownActivity(Uuid),

    #[error("unknown recalculation event {0}")]
    UnknownEvent(Uuid),

    #[error("unknown reduction target {0}")]
    UnknownTarget(Uuid),

    #[error("configuration error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
