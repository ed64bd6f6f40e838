//! Engine configuration.
//!
//! Tunable methodology parameters live here rather than in code: the
//! recalculation significance threshold (ISO 14064-1 section 5.4.2) and the
//! data-quality uncertainty multipliers. Loaded from YAML so a deployment can
//! align them with its regulatory methodology without a rebuild.

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Significance threshold (percent) above which a factor correction
    /// triggers a pending recalculation event. Organizations may override.
    pub recalculation_threshold_percent: f64,
    /// Data-quality multipliers applied to factor uncertainty
    pub uncertainty: UncertaintyConfig,
    /// Capacity of the engine event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recalculation_threshold_percent: 5.0,
            uncertainty: UncertaintyConfig::default(),
            event_channel_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from YAML
    pub fn from_yaml(yaml: &str) -> EngineResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a configuration from a YAML file
    pub fn from_path(path: impl AsRef<Path>) -> EngineResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}

/// Multipliers applied to a factor's declared uncertainty depending on the
/// quality tier of the underlying activity data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    pub measured_multiplier: Decimal,
    pub calculated_multiplier: Decimal,
    pub estimated_multiplier: Decimal,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            measured_multiplier: Decimal::ONE,
            calculated_multiplier: Decimal::new(12, 1),
            estimated_multiplier: Decimal::new(15, 1),
        }
    }
}
