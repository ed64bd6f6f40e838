//! Emissions calculation and recalculation engine for multi-tenant GHG
//! accounting.
//!
//! The engine turns normalized activity data into auditable emission records:
//! it resolves the applicable emission factor for a category, country, and
//! date, converts units, computes multi-gas CO2e with uncertainty bands, and
//! rolls records up into per-scope totals. Historical numbers never change in
//! place; corrections flow through approval-gated recalculation events that
//! supersede records and preserve the full version history, in line with GHG
//! Protocol and ISO 14064-1 base-year recalculation rules.
//!
//! [`engine::EmissionEngine`] is the facade collaborating services go
//! through; the submodules are usable on their own for embedding.

pub mod aggregator;
pub mod auditor;
pub mod baseline;
pub mod calculator;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod resolver;
pub mod store;
pub mod uncertainty;
pub mod units;
pub mod verification;

pub use config::{EngineConfig, UncertaintyConfig};
pub use engine::{BatchOutcome, EmissionEngine, EmissionFilter};
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EventBus};
