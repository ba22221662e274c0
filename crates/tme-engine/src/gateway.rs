//! Vector Gateway: a thin, strongly-typed facade over the external vector
//! store. The real vector database is a black box from this crate's point
//! of view; this module defines the trait the rest of the engine programs
//! against, plus [`InMemoryGateway`], a faithful in-process stand-in
//! sufficient to exercise every behavior described above it.
//!
//! Grounded on the corpus's bridge-to-an-external-vector-database idiom
//! (`rvlite_bridge.rs`).

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tme_core::{Error, Result, Tier};
use uuid::Uuid;

use crate::codec::ContentPayload;
use crate::types::Metadata;

/// The similarity metric configured for a deployment; constant across all
/// tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
    L2,
}

/// A record as the gateway stores it: the memory's stable fields plus its
/// (possibly compressed) content payload. The gateway never interprets
/// `content_payload` — decompression is the Compression Codec's job.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub embedding: Vec<f32>,
    pub content_payload: ContentPayload,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub importance: f64,
    pub access_count: u64,
    pub metadata: Metadata,
}

/// A query predicate, intentionally narrow: equality on `id`, a range on
/// `timestamp`, equality on `owner_id` (lets the gateway enforce the
/// cross-user filter cheaply) — tier equality is implicit in which
/// collection a call targets.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub id: Option<Uuid>,
    pub owner_id: Option<String>,
    pub timestamp_from: Option<DateTime<Utc>>,
    pub timestamp_to: Option<DateTime<Utc>>,
}

impl QueryFilter {
    pub fn by_id(id: Uuid) -> Self {
        Self { id: Some(id), ..Default::default() }
    }

    pub fn by_owner(owner_id: impl Into<String>) -> Self {
        Self { owner_id: Some(owner_id.into()), ..Default::default() }
    }

    fn matches(&self, record: &StoredRecord) -> bool {
        if let Some(id) = self.id {
            if record.id != id {
                return false;
            }
        }
        if let Some(ref owner) = self.owner_id {
            if &record.owner_id != owner {
                return false;
            }
        }
        if let Some(from) = self.timestamp_from {
            if record.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.timestamp_to {
            if record.created_at > to {
                return false;
            }
        }
        true
    }
}

/// A forwarding record left behind when consolidation supersedes an id,
/// so a caller holding a stale id can still resolve to its replacement.
#[derive(Debug, Clone, Copy)]
pub struct Tombstone {
    pub new_id: Uuid,
    pub merged_at: DateTime<Utc>,
}

#[async_trait]
pub trait VectorGateway: Send + Sync {
    async fn insert(&self, tier: Tier, record: StoredRecord) -> Result<()>;
    async fn delete_by_id(&self, tier: Tier, id: Uuid) -> Result<bool>;
    async fn query_by_filter(&self, tier: Tier, filter: QueryFilter) -> Result<Vec<StoredRecord>>;
    async fn search_by_vector(
        &self,
        tier: Tier,
        query: &[f32],
        k: usize,
        filter: Option<QueryFilter>,
    ) -> Result<Vec<StoredRecord>>;
    async fn compact(&self, tier: Tier) -> Result<()>;
    async fn record_tombstone(&self, old_id: Uuid, new_id: Uuid) -> Result<()>;
    async fn resolve_tombstone(&self, id: Uuid) -> Option<Uuid>;
    /// Called by the Lifecycle Manager after a pass exhausts its retries.
    /// A real backing store would reconcile its index against durable
    /// storage here; the in-memory stand-in has nothing to reconcile.
    async fn verify_integrity(&self, _tier: Tier) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

/// Per-tier "search quality" knob: higher for core, where retrieval
/// accuracy matters most. The in-memory gateway always searches
/// exhaustively, so this only records the
/// configured intent for observability — an external ANN-backed gateway
/// would use it to widen its candidate pool (e.g. HNSW `ef_search`).
pub fn search_quality(tier: Tier) -> usize {
    match tier {
        Tier::Core => 200,
        Tier::Active => 100,
        Tier::Background => 40,
    }
}

/// In-process stand-in for the external vector database. Stateless apart
/// from the held collections.
pub struct InMemoryGateway {
    collections: [DashMap<Uuid, StoredRecord>; 3],
    tombstones: DashMap<Uuid, Tombstone>,
    dimension: usize,
    metric: Metric,
    search_calls: AtomicUsize,
}

impl InMemoryGateway {
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            collections: [DashMap::new(), DashMap::new(), DashMap::new()],
            tombstones: DashMap::new(),
            dimension,
            metric,
            search_calls: AtomicUsize::new(0),
        }
    }

    fn collection(&self, tier: Tier) -> &DashMap<Uuid, StoredRecord> {
        match tier {
            Tier::Core => &self.collections[0],
            Tier::Active => &self.collections[1],
            Tier::Background => &self.collections[2],
        }
    }

    /// Total record count across all three collections, for stats/capacity
    /// enforcement in the Lifecycle Manager.
    pub fn total_count(&self) -> usize {
        self.collections.iter().map(|c| c.len()).sum()
    }

    pub fn count(&self, tier: Tier) -> usize {
        self.collection(tier).len()
    }

    /// Number of `search_by_vector` calls served, for tests/observability.
    pub fn search_call_count(&self) -> usize {
        self.search_calls.load(Ordering::Relaxed)
    }

    fn score(&self, query: &[f32], candidate: &[f32]) -> f32 {
        match self.metric {
            Metric::Cosine => cosine_similarity(query, candidate),
            Metric::L2 => -l2_distance(query, candidate),
        }
    }
}

#[async_trait]
impl VectorGateway for InMemoryGateway {
    async fn insert(&self, tier: Tier, record: StoredRecord) -> Result<()> {
        if record.embedding.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: record.embedding.len(),
            });
        }
        // Idempotent on id: re-insert replaces.
        self.collection(tier).insert(record.id, record);
        Ok(())
    }

    async fn delete_by_id(&self, tier: Tier, id: Uuid) -> Result<bool> {
        Ok(self.collection(tier).remove(&id).is_some())
    }

    async fn query_by_filter(&self, tier: Tier, filter: QueryFilter) -> Result<Vec<StoredRecord>> {
        Ok(self
            .collection(tier)
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn search_by_vector(
        &self,
        tier: Tier,
        query: &[f32],
        k: usize,
        filter: Option<QueryFilter>,
    ) -> Result<Vec<StoredRecord>> {
        self.search_calls.fetch_add(1, Ordering::Relaxed);
        let _quality = search_quality(tier);

        let mut scored: Vec<(f32, StoredRecord)> = self
            .collection(tier)
            .iter()
            .filter(|entry| filter.as_ref().map_or(true, |f| f.matches(entry.value())))
            .map(|entry| {
                let record = entry.value().clone();
                let s = self.score(query, &record.embedding);
                (s, record)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(_, r)| r).collect())
    }

    async fn compact(&self, _tier: Tier) -> Result<()> {
        // Best-effort optimization; nothing to do for an in-memory map.
        Ok(())
    }

    async fn record_tombstone(&self, old_id: Uuid, new_id: Uuid) -> Result<()> {
        self.tombstones.insert(old_id, Tombstone { new_id, merged_at: Utc::now() });
        Ok(())
    }

    async fn resolve_tombstone(&self, id: Uuid) -> Option<Uuid> {
        self.tombstones.get(&id).map(|t| t.new_id)
    }
}
