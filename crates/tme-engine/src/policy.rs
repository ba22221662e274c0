//! Tier Policy: promotion/demotion predicates over the tier table carried
//! in [`tme_core::EngineConfig`].

use chrono::{DateTime, Utc};
use tme_core::{EngineConfig, Tier};

use crate::scorer::access_frequency;
use crate::types::Memory;

/// Whether `memory`, currently in `memory.tier`, satisfies the promotion
/// predicate for the next tier up.
///
/// `importance >= promotionThreshold(t) AND accessCount >= minAccessCount(t)
/// AND accessFrequency >= minFrequency(t)`. Returns `false` for
/// `Tier::Core`, which has no tier above it.
pub fn should_promote(memory: &Memory, config: &EngineConfig) -> bool {
    if memory.tier.promoted().is_none() {
        return false;
    }
    let settings = config.settings_for(memory.tier);
    let freq = access_frequency(memory.access_count, config.consolidation.max_access_count);

    memory.importance >= settings.promotion_threshold
        && memory.access_count >= settings.min_access_count
        && freq >= settings.min_frequency
}

/// Whether `memory` satisfies the demotion predicate for its current tier.
///
/// `inactivity > maxInactivity(t) OR importance*(1-decayRate(t)) <
/// demotionThreshold(t)`. Returns `false` for `Tier::Background`, which has
/// no tier below it.
pub fn should_demote(memory: &Memory, now: DateTime<Utc>, config: &EngineConfig) -> bool {
    if memory.tier.demoted().is_none() {
        return false;
    }
    let settings = config.settings_for(memory.tier);
    let inactivity = memory.inactivity_secs(now);
    let decayed = memory.importance * (1.0 - settings.decay_rate);

    inactivity > settings.max_inactivity_secs || decayed < settings.demotion_threshold
}

/// The tier transition a single lifecycle evaluation would apply to
/// `memory`, if any. Transitions move exactly one step at a time; promotion
/// is checked before demotion so a memory that satisfies both (pathological
/// config) promotes.
pub fn evaluate_transition(memory: &Memory, now: DateTime<Utc>, config: &EngineConfig) -> Option<Tier> {
    if should_promote(memory, config) {
        return memory.tier.promoted();
    }
    if should_demote(memory, now, config) {
        return memory.tier.demoted();
    }
    None
}
