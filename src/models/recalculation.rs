//! Recalculation events: the only sanctioned path to change a historical
//! number.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What caused a recalculation to be proposed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RecalculationTrigger {
    /// A published correction touches a factor already referenced by records
    FactorCorrection {
        old_factor_id: Uuid,
        new_factor_id: Uuid,
    },
    /// Declared change in calculation methodology
    MethodologyChange,
    /// Change in organizational or operational boundary
    BoundaryChange,
    /// Mergers, acquisitions, divestments
    StructuralChange,
    /// Discovery of errors or omissions in recorded data
    ErrorCorrection,
    /// Move the organization's base year
    BaseYearChange { new_base_year: i32 },
}

impl RecalculationTrigger {
    /// Structural, boundary, methodology and base-year changes are material
    /// by declaration; factor and error corrections are gated by the
    /// organization's significance threshold.
    pub fn is_always_material(&self) -> bool {
        matches!(
            self,
            Self::MethodologyChange
                | Self::BoundaryChange
                | Self::StructuralChange
                | Self::BaseYearChange { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FactorCorrection { .. } => "factor_correction",
            Self::MethodologyChange => "methodology_change",
            Self::BoundaryChange => "boundary_change",
            Self::StructuralChange => "structural_change",
            Self::ErrorCorrection => "error_correction",
            Self::BaseYearChange { .. } => "base_year_change",
        }
    }
}

/// Lifecycle of a recalculation event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecalculationStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
}

impl RecalculationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Applied => "applied",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Applied)
    }
}

impl std::fmt::Display for RecalculationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only audit record of a proposed, approved, or applied
/// recalculation. Immutable once approved except for the applied marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalculationEvent {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub assessment_id: Uuid,
    pub trigger: RecalculationTrigger,
    pub affected_year_start: i32,
    pub affected_year_end: i32,
    pub justification: String,
    /// Total from the last aggregation before this event
    pub previous_emissions_tco2e: Decimal,
    /// Dry-run preview of the total after applying this event
    pub recalculated_emissions_tco2e: Decimal,
    pub change_percent: f64,
    pub status: RecalculationStatus,
    pub created_at: DateTime<Utc>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub applied_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_materiality_by_trigger() {
        assert!(RecalculationTrigger::BoundaryChange.is_always_material());
        assert!(RecalculationTrigger::BaseYearChange { new_base_year: 2024 }.is_always_material());
        assert!(!RecalculationTrigger::FactorCorrection {
            old_factor_id: Uuid::new_v4(),
            new_factor_id: Uuid::new_v4(),
        }
        .is_always_material());
        assert!(!RecalculationTrigger::ErrorCorrection.is_always_material());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RecalculationStatus::Rejected.is_terminal());
        assert!(RecalculationStatus::Applied.is_terminal());
        assert!(!RecalculationStatus::Pending.is_terminal());
        assert!(!RecalculationStatus::Approved.is_terminal());
    }
}
