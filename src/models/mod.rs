//! Core data model for the emissions engine.

pub mod activity;
pub mod assessment;
pub mod category;
pub mod emission;
pub mod factor;
pub mod organization;
pub mod recalculation;
pub mod target;
pub mod verification;

pub use activity::{ActivityRecord, CalculationFailure, DataQuality, NewActivityRecord, SourceType};
pub use assessment::{
    Assessment, BaseYearComparison, CategoryBreakdown, GhgRemoval, ScopeBreakdown, ScopeTotals,
};
pub use category::{CalculationMethod, Category, Scope};
pub use emission::EmissionRecord;
pub use factor::{EmissionFactor, FactorSnapshot, NewEmissionFactor};
pub use organization::{BaselineSnapshot, Organization};
pub use recalculation::{RecalculationEvent, RecalculationStatus, RecalculationTrigger};
pub use target::{DimensionProgress, ReductionTarget, TargetProgress};
pub use verification::{
    AssuranceLevel, VerificationRecord, VerificationState, VerificationTransition,
};
