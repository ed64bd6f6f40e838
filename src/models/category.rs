//! Emission categories.
//!
//! Categories are shared reference data and immutable once referenced by
//! records; a reclassification is a new code, never an edit of history.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// GHG Protocol scope classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Scope1,
    Scope2,
    Scope3,
}

impl Scope {
    pub fn as_number(&self) -> u8 {
        match self {
            Self::Scope1 => 1,
            Self::Scope2 => 2,
            Self::Scope3 => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::Scope1),
            2 => Some(Self::Scope2),
            3 => Some(Self::Scope3),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope {}", self.as_number())
    }
}

/// How emissions for a category are derived from activity data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    ActivityBased,
    SpendBased,
    Estimated,
}

impl CalculationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActivityBased => "activity_based",
            Self::SpendBased => "spend_based",
            Self::Estimated => "estimated",
        }
    }
}

/// Hierarchical emission category node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    /// Stable code, e.g. "electricity" or "business_travel.flights"
    pub code: String,
    pub name: String,
    pub scope: Scope,
    /// GHG Protocol scope-3 sub-category (1..=15), only for scope 3
    pub scope3_category: Option<u8>,
    pub parent_id: Option<Uuid>,
    pub calculation_method: CalculationMethod,
}

impl Category {
    /// Create a category, enforcing the scope-3 sub-category invariant
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        scope: Scope,
        scope3_category: Option<u8>,
        calculation_method: CalculationMethod,
    ) -> EngineResult<Self> {
        if let Some(sub) = scope3_category {
            if scope != Scope::Scope3 {
                return Err(EngineError::InvalidCategory {
                    reason: format!("scope-3 sub-category {sub} set on {scope}"),
                });
            }
            if !(1..=15).contains(&sub) {
                return Err(EngineError::InvalidCategory {
                    reason: format!("scope-3 sub-category {sub} outside 1..=15"),
                });
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            code: code.into(),
            name: name.into(),
            scope,
            scope3_category,
            parent_id: None,
            calculation_method,
        })
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}
