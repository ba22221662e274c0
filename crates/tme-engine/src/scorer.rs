//! Importance Scorer: pure, deterministic functions combining recency,
//! access frequency, emotional value, and context relevance.
//!
//! Two formulas are kept deliberately distinct: ingestion scoring (no prior
//! access history) and ongoing/current scoring (used by the Evolver and
//! tier re-evaluation). Do not unify them.

use chrono::{DateTime, Utc};

use crate::types::{Memory, Metadata};

/// `recency(t) = exp(-(now - t) / tau_r)`.
///
/// `tau_r` is the single recency-decay constant:
/// `EngineConfig::consolidation::recency_decay_rate_secs` is the one source
/// of truth, passed in here by the caller rather than duplicated across
/// the scorer and the consolidator.
pub fn recency(t: DateTime<Utc>, now: DateTime<Utc>, tau_r_secs: f64) -> f64 {
    let age_secs = (now - t).num_milliseconds().max(0) as f64 / 1000.0;
    (-age_secs / tau_r_secs).exp().clamp(0.0, 1.0)
}

/// `accessFrequency(n) = min(n / maxAccessCount, 1)`.
pub fn access_frequency(access_count: u64, max_access_count: u64) -> f64 {
    if max_access_count == 0 {
        return 0.0;
    }
    (access_count as f64 / max_access_count as f64).min(1.0)
}

/// Ingestion-time scoring: emphasises emotional value, since that signal is
/// only available once, from upstream, at store time.
///
/// `importance = 0.3*recency + 0.3*emotionalValue + 0.2*contextRelevance + 0.2*accessFrequency`
pub fn ingestion_importance(
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    metadata: &Metadata,
    access_count: u64,
    tau_r_secs: f64,
    max_access_count: u64,
) -> f64 {
    let score = 0.3 * recency(created_at, now, tau_r_secs)
        + 0.3 * metadata.emotional_value
        + 0.2 * metadata.context_relevance
        + 0.2 * access_frequency(access_count, max_access_count);
    score.clamp(0.0, 1.0)
}

/// Ongoing scoring: emphasises the persistent base importance and
/// accumulated usage over the one-shot emotional signal.
///
/// `importance' = 0.4*base + 0.3*recency + 0.2*accessFrequency + 0.1*contextRelevance`
pub fn current_importance(
    base_importance: f64,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
    access_count: u64,
    context_relevance: f64,
    tau_r_secs: f64,
    max_access_count: u64,
) -> f64 {
    let score = 0.4 * base_importance
        + 0.3 * recency(created_at, now, tau_r_secs)
        + 0.2 * access_frequency(access_count, max_access_count)
        + 0.1 * context_relevance;
    score.clamp(0.0, 1.0)
}

/// Convenience wrapper computing the current score directly from a
/// [`Memory`], as the Evolver and tier re-evaluation pass do.
pub fn current_importance_for(memory: &Memory, now: DateTime<Utc>, tau_r_secs: f64, max_access_count: u64) -> f64 {
    current_importance(
        memory.importance,
        memory.created_at,
        now,
        memory.access_count,
        memory.metadata.context_relevance,
        tau_r_secs,
        max_access_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const TAU: f64 = 30.0 * 24.0 * 3600.0;

    #[test]
    fn recency_is_one_at_zero_age() {
        let now = Utc::now();
        assert!((recency(now, now, TAU) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn recency_decays_with_age() {
        let now = Utc::now();
        let old = now - Duration::days(60);
        assert!(recency(old, now, TAU) < recency(now, now, TAU));
        assert!(recency(old, now, TAU) > 0.0);
    }

    #[test]
    fn access_frequency_saturates() {
        assert_eq!(access_frequency(200, 100), 1.0);
        assert_eq!(access_frequency(50, 100), 0.5);
        assert_eq!(access_frequency(0, 100), 0.0);
    }

    #[test]
    fn scores_are_always_in_unit_interval() {
        let now = Utc::now();
        let mut md = Metadata::new(0.95, 0.9);
        let score = ingestion_importance(now, now, &md, 0, TAU, 100);
        assert!((0.0..=1.0).contains(&score));

        md.emotional_value = 2.0; // out-of-range input still clamps at construction time normally,
        let score2 = ingestion_importance(now, now, &md, 1_000_000, TAU, 100);
        assert!((0.0..=1.0).contains(&score2));
    }

    #[test]
    fn high_value_fresh_memory_scores_high_importance() {
        // emotionalValue=0.95, contextRelevance=0.9, fresh memory.
        let now = Utc::now();
        let md = Metadata::new(0.95, 0.9);
        let importance = ingestion_importance(now, now, &md, 0, TAU, 100);
        assert!((importance - 0.765).abs() < 1e-6);
    }
}
