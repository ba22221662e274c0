//! Evolver: per-memory, per-cycle aging and reinforcement. Important and
//! frequently-accessed memories age slower; stale, low-importance memories
//! accumulate archival probability and get forced to `background` tier.

use chrono::{DateTime, Utc};
use tme_core::{EngineConfig, Tier};

use crate::scorer::{access_frequency, recency};
use crate::types::{EvolutionEvent, Memory};

/// The result of running one evolution pass over a single memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvolutionOutcome {
    pub importance: f64,
    pub tier: Tier,
    /// Whether the reinforcement score exceeded the configured threshold
    /// this cycle.
    pub reinforced: bool,
    /// Whether this memory was forced to `background` this cycle.
    pub archived: bool,
    pub event: EvolutionEventSummary,
    /// Whether importance or tier actually changed — callers skip writes
    /// when this is `false`.
    pub changed: bool,
}

/// Plain-data mirror of [`EvolutionEvent`], independent of the
/// ring-buffer-bearing `Metadata` type, so evolution can be computed without
/// borrowing `memory.metadata` mutably.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvolutionEventSummary {
    pub aging_factor: f64,
    pub reinforcement_score: f64,
    pub importance_delta: f64,
}

impl EvolutionEventSummary {
    pub fn into_event(self, timestamp: DateTime<Utc>) -> EvolutionEvent {
        EvolutionEvent {
            timestamp,
            aging_factor: self.aging_factor,
            reinforcement_score: self.reinforcement_score,
            importance_delta: self.importance_delta,
        }
    }
}

/// Evaluate the Evolver's full per-cycle procedure (aging, reinforcement,
/// archival probability, importance delta, tier re-evaluation) for a single
/// memory. Pure: does not mutate `memory`; the caller decides whether and
/// how to persist the outcome.
pub fn evolve(memory: &Memory, now: DateTime<Utc>, config: &EngineConfig) -> EvolutionOutcome {
    let age = memory.age_secs(now);
    let access_modifier = access_frequency(memory.access_count, config.consolidation.max_access_count);

    // Step 1: aging factor.
    let alpha = (-age / config.evolution.aging_rate_secs).exp() * (1.0 + 0.5 * memory.importance + access_modifier);

    // Step 2: reinforcement score.
    let tau_r = config.consolidation.recency_decay_rate_secs;
    let r = 0.4 * recency(memory.last_accessed_at, now, tau_r)
        + 0.3 * memory.metadata.emotional_value
        + 0.3 * memory.metadata.context_relevance;
    let reinforced = r > config.evolution.reinforcement_threshold;

    // Step 3: archival probability.
    let p = 0.4 * (age / config.evolution.max_age_secs).min(1.0)
        + 0.3 * (1.0 - memory.importance)
        + 0.3 * (1.0 - access_modifier);
    let archived = p > config.evolution.archival_threshold;

    // Step 4: importance delta.
    let delta = (r - (1.0 - alpha)) * config.consolidation.importance_change_rate;
    let new_importance = (memory.importance + delta).clamp(0.0, 1.0);

    // Step 5: new tier.
    let new_tier = if archived {
        Tier::Background
    } else {
        Tier::candidate_for_importance(new_importance)
    };

    // Step 6: evolved iff importance or tier changed.
    let changed = (new_importance - memory.importance).abs() > 1e-12 || new_tier != memory.tier;

    EvolutionOutcome {
        importance: new_importance,
        tier: new_tier,
        reinforced,
        archived,
        event: EvolutionEventSummary { aging_factor: alpha, reinforcement_score: r, importance_delta: delta },
        changed,
    }
}
