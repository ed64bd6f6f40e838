//! Third-party verification state, tracked per assessment.
//!
//! Orthogonal to calculation correctness, but gates publication: numbers
//! must be stable (no pending recalculation, fresh aggregation) before
//! assurance proceeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Assurance workflow states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Draft,
    InternalReview,
    ExternalVerification,
    Verified,
    VerifiedWithComments,
    Published,
    NotVerified,
}

impl VerificationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InternalReview => "internal_review",
            Self::ExternalVerification => "external_verification",
            Self::Verified => "verified",
            Self::VerifiedWithComments => "verified_with_comments",
            Self::Published => "published",
            Self::NotVerified => "not_verified",
        }
    }

    /// Legal transitions of the assurance state machine
    pub fn can_transition_to(&self, to: VerificationState) -> bool {
        use VerificationState::*;
        matches!(
            (self, to),
            (Draft, InternalReview)
                | (InternalReview, ExternalVerification)
                | (InternalReview, Draft)
                | (ExternalVerification, Verified)
                | (ExternalVerification, VerifiedWithComments)
                | (ExternalVerification, NotVerified)
                | (Verified, Published)
                | (VerifiedWithComments, Published)
        )
    }

    /// States past internal review require stable numbers
    pub fn requires_stable_numbers(&self) -> bool {
        use VerificationState::*;
        matches!(
            self,
            ExternalVerification | Verified | VerifiedWithComments | Published
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::NotVerified | Self::Published)
    }
}

impl std::fmt::Display for VerificationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Level of assurance sought from the verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssuranceLevel {
    Limited,
    Reasonable,
}

/// One recorded transition in the assurance workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationTransition {
    pub from: VerificationState,
    pub to: VerificationState,
    pub transitioned_at: DateTime<Utc>,
    pub transitioned_by: Option<String>,
    pub reason: Option<String>,
}

/// Verification record for one assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub assessment_id: Uuid,
    pub state: VerificationState,
    pub assurance_level: Option<AssuranceLevel>,
    /// Verifier organization identity, once engaged
    pub verifier: Option<String>,
    pub findings: Vec<String>,
    pub history: Vec<VerificationTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationRecord {
    pub fn new(organization_id: Uuid, assessment_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            assessment_id,
            state: VerificationState::Draft,
            assurance_level: None,
            verifier: None,
            findings: Vec::new(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a transition; the caller is responsible for guard checks
    pub fn transition_to(
        &mut self,
        to: VerificationState,
        by: Option<String>,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) {
        let from = std::mem::replace(&mut self.state, to);
        self.history.push(VerificationTransition {
            from,
            to,
            transitioned_at: at,
            transitioned_by: by,
            reason,
        });
        self.updated_at = at;
    }
}
