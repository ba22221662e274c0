//! The core `Memory` entity and its metadata.
//!
//! Dynamic metadata in the source system is an arbitrary key/value bag; we
//! express it as a typed sum (the known fields as struct members) plus a
//! tagged catch-all `extra` map, per the design notes — this keeps the hot
//! path (scoring, policy) compile-time checked while still letting callers
//! attach arbitrary extension data.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tme_core::Tier;
use uuid::Uuid;

/// Maximum decompressed content size: 64 KiB.
pub const MAX_CONTENT_BYTES: usize = 64 * 1024;

/// Bound on the evolution-history ring buffer: a fixed capacity rather
/// than an unbounded list, so a long-lived memory's history can't grow
/// without limit.
pub const EVOLUTION_HISTORY_CAPACITY: usize = 16;

/// A scalar metadata value, one level of a `Value` variant deep (no nested
/// maps — arbitrary JSON belongs in `content`, not metadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// A single evolution event appended by the Evolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionEvent {
    pub timestamp: DateTime<Utc>,
    pub aging_factor: f64,
    pub reinforcement_score: f64,
    pub importance_delta: f64,
}

/// Known metadata fields plus an open extension bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub emotional_value: f64,
    pub context_relevance: f64,
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub connected_memories: Vec<Uuid>,
    evolution_history: VecDeque<EvolutionEvent>,
    #[serde(default)]
    pub extra: HashMap<String, Vec<Scalar>>,
}

impl Metadata {
    pub fn new(emotional_value: f64, context_relevance: f64) -> Self {
        Self {
            emotional_value: emotional_value.clamp(0.0, 1.0),
            context_relevance: context_relevance.clamp(0.0, 1.0),
            tags: Vec::new(),
            source: None,
            connected_memories: Vec::new(),
            evolution_history: VecDeque::with_capacity(EVOLUTION_HISTORY_CAPACITY),
            extra: HashMap::new(),
        }
    }

    /// Append an evolution event, overwriting the oldest entry once the
    /// ring buffer is full.
    pub fn push_evolution_event(&mut self, event: EvolutionEvent) {
        if self.evolution_history.len() == EVOLUTION_HISTORY_CAPACITY {
            self.evolution_history.pop_front();
        }
        self.evolution_history.push_back(event);
    }

    pub fn evolution_history(&self) -> impl Iterator<Item = &EvolutionEvent> {
        self.evolution_history.iter()
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// A draft memory submitted to `MemoryService::store`.
#[derive(Debug, Clone)]
pub struct MemoryDraft {
    pub owner_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// The central entity: a single tiered memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub owner_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub tier: Tier,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub metadata: Metadata,
}

impl Memory {
    /// Construct a freshly-ingested memory. `importance` and `tier` are
    /// supplied by the caller (the Importance Scorer and Tier Policy),
    /// since `Memory` itself performs no scoring.
    pub fn new(
        owner_id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
        importance: f64,
        tier: Tier,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            content: content.into(),
            embedding,
            tier,
            importance: importance.clamp(0.0, 1.0),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            metadata,
        }
    }

    /// Record a single access: bump the counter and refresh
    /// `last_accessed_at`. `access_count` only ever increases (invariant 4).
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn inactivity_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_accessed_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}
