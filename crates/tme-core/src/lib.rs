//! Shared types for the Tiered Memory Engine: the error taxonomy, the
//! validated configuration document, and the tier enum every other crate
//! in the workspace builds on.

pub mod config;
pub mod error;
pub mod tier;

pub use config::{
    CompressionConfig, CompressionMethod, ConfigHandle, ConsolidationConfig, EngineConfig,
    EvolutionConfig, GeneralConfig, TierSettings,
};
pub use error::{Error, Result};
pub use tier::Tier;
