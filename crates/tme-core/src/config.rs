//! Validated, immutable engine configuration.
//!
//! Replaces a global configuration singleton: callers build one
//! [`EngineConfig`], validate
//! it once, and publish it through a [`ConfigHandle`] that components read
//! from at the top of every operation. Updates are validated and then
//! swapped in atomically; no reader ever observes a partially-updated
//! document.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tier::Tier;

/// Per-tier knobs: capacity, TTL, importance floor, compression target,
/// and backup cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierSettings {
    pub capacity: usize,
    pub ttl_secs: Option<u64>,
    pub importance_threshold: f64,
    pub compression_ratio: f64,
    pub backup_frequency_secs: u64,
    pub promotion_threshold: f64,
    pub demotion_threshold: f64,
    /// Minimum `accessCount` a memory must have accumulated before it is
    /// eligible for promotion out of this tier.
    pub min_access_count: u64,
    /// Minimum `accessFrequency` required for promotion out of this tier.
    pub min_frequency: f64,
    /// Maximum inactivity, in seconds, before a memory in this tier becomes
    /// eligible for demotion regardless of importance.
    pub max_inactivity_secs: f64,
    /// Per-evaluation importance decay applied before comparing against
    /// `demotion_threshold`: `importance * (1 - decayRate) <
    /// demotionThreshold`.
    pub decay_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    pub threshold: f64,
    pub max_cluster_size: usize,
    pub min_similarity: f64,
    pub recency_decay_rate_secs: f64,
    pub importance_change_rate: f64,
    pub max_access_count: u64,
    pub schedule_interval_secs: u64,
    pub memory_threshold: usize,
    pub time_threshold_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionMethod {
    Lossless,
    Lossy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub method: CompressionMethod,
    pub quality: u32,
    pub min_size_bytes: usize,
    pub target_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionConfig {
    pub aging_rate_secs: f64,
    pub reinforcement_threshold: f64,
    pub max_age_secs: f64,
    pub importance_decay_rate: f64,
    pub promotion_threshold: f64,
    pub demotion_threshold: f64,
    /// Archival probability above which a memory is forced to `background`
    /// tier. Defaults to 0.8.
    pub archival_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub max_total_memories: usize,
    pub backup_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub default_tier: Tier,
    pub embedding_dimension: usize,
    pub cleanup_batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub core: TierSettings,
    pub active: TierSettings,
    pub background: TierSettings,
    pub consolidation: ConsolidationConfig,
    pub compression: CompressionConfig,
    pub evolution: EvolutionConfig,
    pub general: GeneralConfig,
}

impl EngineConfig {
    pub fn settings_for(&self, tier: Tier) -> &TierSettings {
        match tier {
            Tier::Core => &self.core,
            Tier::Active => &self.active,
            Tier::Background => &self.background,
        }
    }

    /// Validate every rule from the configuration document's validation
    /// section. Returns the first violated rule as `Error::InvalidInput`.
    pub fn validate(&self) -> Result<()> {
        for (name, t) in [("core", &self.core), ("active", &self.active), ("background", &self.background)] {
            if t.capacity == 0 {
                return Err(Error::InvalidInput(format!("{name}.capacity must be positive")));
            }
            if !(0.0..=1.0).contains(&t.compression_ratio) {
                return Err(Error::InvalidInput(format!("{name}.compression_ratio must be in [0,1]")));
            }
            if !(0.0..=1.0).contains(&t.importance_threshold) {
                return Err(Error::InvalidInput(format!("{name}.importance_threshold must be in [0,1]")));
            }
            if t.backup_frequency_secs == 0 {
                return Err(Error::InvalidInput(format!("{name}.backup_frequency_secs must be positive")));
            }
        }

        if !(0.0..=1.0).contains(&self.consolidation.threshold) {
            return Err(Error::InvalidInput("consolidation.threshold must be in [0,1]".into()));
        }
        if self.consolidation.max_cluster_size == 0 {
            return Err(Error::InvalidInput("consolidation.max_cluster_size must be positive".into()));
        }
        if self.consolidation.schedule_interval_secs == 0 {
            return Err(Error::InvalidInput("consolidation.schedule_interval_secs must be positive".into()));
        }

        if !(0.0..=1.0).contains(&self.compression.target_ratio) {
            return Err(Error::InvalidInput("compression.target_ratio must be in [0,1]".into()));
        }

        if !(0.0..=1.0).contains(&self.evolution.importance_decay_rate) {
            return Err(Error::InvalidInput("evolution.importance_decay_rate must be in [0,1]".into()));
        }
        if self.evolution.aging_rate_secs <= 0.0 || self.evolution.max_age_secs <= 0.0 {
            return Err(Error::InvalidInput("evolution.aging_rate_secs and max_age_secs must be positive".into()));
        }

        if self.general.max_total_memories == 0 {
            return Err(Error::InvalidInput("general.max_total_memories must be positive".into()));
        }
        if self.general.cleanup_interval_secs == 0 {
            return Err(Error::InvalidInput("general.cleanup_interval_secs must be positive".into()));
        }
        if self.general.embedding_dimension == 0 {
            return Err(Error::InvalidInput("general.embedding_dimension must be positive".into()));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            core: TierSettings {
                capacity: 1_000,
                ttl_secs: None,
                importance_threshold: 0.8,
                compression_ratio: 0.8,
                backup_frequency_secs: 3600,
                promotion_threshold: 0.9,
                demotion_threshold: 0.7,
                min_access_count: 0,
                min_frequency: 0.0,
                max_inactivity_secs: f64::INFINITY,
                decay_rate: 0.05,
            },
            active: TierSettings {
                capacity: 5_000,
                ttl_secs: Some(60 * 60 * 24 * 30),
                importance_threshold: 0.4,
                compression_ratio: 0.6,
                backup_frequency_secs: 3600,
                promotion_threshold: 0.8,
                demotion_threshold: 0.3,
                min_access_count: 10,
                min_frequency: 0.1,
                max_inactivity_secs: 30.0 * 24.0 * 3600.0,
                decay_rate: 0.1,
            },
            background: TierSettings {
                capacity: 10_000,
                ttl_secs: Some(60 * 60 * 24 * 90),
                importance_threshold: 0.0,
                compression_ratio: 0.4,
                backup_frequency_secs: 3600,
                promotion_threshold: 0.4,
                demotion_threshold: 0.0,
                min_access_count: 0,
                min_frequency: 0.0,
                max_inactivity_secs: 90.0 * 24.0 * 3600.0,
                decay_rate: 0.2,
            },
            consolidation: ConsolidationConfig {
                threshold: 0.7,
                max_cluster_size: 32,
                min_similarity: 0.7,
                recency_decay_rate_secs: 30.0 * 24.0 * 3600.0,
                importance_change_rate: 0.1,
                max_access_count: 100,
                schedule_interval_secs: 3600,
                memory_threshold: 10_000,
                time_threshold_secs: 3600 * 6,
            },
            compression: CompressionConfig {
                enabled: true,
                method: CompressionMethod::Lossless,
                quality: 6,
                min_size_bytes: 1024,
                target_ratio: 0.6,
            },
            evolution: EvolutionConfig {
                aging_rate_secs: 30.0 * 24.0 * 3600.0,
                reinforcement_threshold: 0.6,
                max_age_secs: 180.0 * 24.0 * 3600.0,
                importance_decay_rate: 0.2,
                promotion_threshold: 0.8,
                demotion_threshold: 0.3,
                archival_threshold: 0.8,
            },
            general: GeneralConfig {
                max_total_memories: 16_000,
                backup_interval_secs: 3600,
                cleanup_interval_secs: 3600,
                default_tier: Tier::Active,
                embedding_dimension: 1536,
                cleanup_batch_size: 100,
            },
        }
    }
}

/// Atomically-swappable handle to the current configuration. Cloning a
/// handle is cheap (an `Arc` bump); every component holds one.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<ArcSwap<EngineConfig>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    /// Snapshot the configuration as it stands right now. Callers should
    /// take one snapshot at the top of an operation rather than re-reading
    /// mid-operation, so a concurrent update can't produce a torn view.
    pub fn snapshot(&self) -> Arc<EngineConfig> {
        self.inner.load_full()
    }

    /// Validate and publish a new configuration. Rejected atomically (the
    /// old configuration remains live) if validation fails.
    pub fn update(&self, new_config: EngineConfig) -> Result<()> {
        new_config.validate()?;
        self.inner.store(Arc::new(new_config));
        Ok(())
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(EngineConfig::default()).expect("default config is valid")
    }
}
