//! Memory Service: the authoritative entry point. Coordinates the Tier
//! Cache, Compression Codec, Vector Gateway, and Importance Scorer behind
//! `store`/`retrieve`/`update`/`delete`/`transition_tier`, enforcing the
//! per-id serialisation and owner-scoping invariants.

use std::sync::Arc;

use chrono::Utc;
use tme_core::{ConfigHandle, Error, Result, Tier};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::cache::TierCacheSet;
use crate::codec::CompressionCodec;
use crate::gateway::{cosine_similarity, QueryFilter, StoredRecord, VectorGateway};
use crate::locking::IdLockMap;
use crate::scorer::ingestion_importance;
use crate::traits::Embedder;
use crate::types::{Memory, MemoryDraft, Metadata};

/// How close a cached core memory's embedding must be to the query before
/// the optional core-tier fast path (§4.H) serves it without a gateway
/// round trip.
const CORE_CACHE_FAST_PATH_SIMILARITY: f32 = 0.95;

/// A retrieval query: either a ready-made embedding or text to be embedded
/// through the configured `Embedder`.
pub enum Query {
    Text(String),
    Embedding(Vec<f32>),
}

pub(crate) fn record_to_memory(record: StoredRecord, tier: Tier, codec: &CompressionCodec) -> Result<Memory> {
    let content = codec.decompress(&record.content_payload)?;
    Ok(Memory {
        id: record.id,
        owner_id: record.owner_id,
        content,
        embedding: record.embedding,
        tier,
        importance: record.importance,
        created_at: record.created_at,
        last_accessed_at: record.last_accessed_at,
        access_count: record.access_count,
        metadata: record.metadata,
    })
}

pub(crate) fn memory_to_record(memory: &Memory, codec: &CompressionCodec, target_ratio: f64, config: &tme_core::CompressionConfig) -> StoredRecord {
    StoredRecord {
        id: memory.id,
        owner_id: memory.owner_id.clone(),
        embedding: memory.embedding.clone(),
        content_payload: codec.compress(&memory.content, target_ratio, config),
        created_at: memory.created_at,
        last_accessed_at: memory.last_accessed_at,
        importance: memory.importance,
        access_count: memory.access_count,
        metadata: memory.metadata.clone(),
    }
}

pub struct MemoryService {
    gateway: Arc<dyn VectorGateway>,
    cache: Arc<TierCacheSet>,
    codec: Arc<CompressionCodec>,
    locks: Arc<IdLockMap>,
    config: ConfigHandle,
    embedder: Arc<dyn Embedder>,
}

impl MemoryService {
    pub fn new(
        gateway: Arc<dyn VectorGateway>,
        cache: Arc<TierCacheSet>,
        codec: Arc<CompressionCodec>,
        locks: Arc<IdLockMap>,
        config: ConfigHandle,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self { gateway, cache, codec, locks, config, embedder }
    }

    /// Ingest a new memory. Computes ingestion importance and candidate
    /// tier, compresses content, and writes through to the gateway (and, if
    /// the candidate tier is `core`, to the cache).
    #[instrument(skip(self, draft))]
    pub async fn store(&self, draft: MemoryDraft) -> Result<Uuid> {
        if draft.content.is_empty() {
            return Err(Error::InvalidInput("content must not be empty".into()));
        }
        let config = self.config.snapshot();
        if draft.embedding.len() != config.general.embedding_dimension {
            return Err(Error::DimensionMismatch {
                expected: config.general.embedding_dimension,
                actual: draft.embedding.len(),
            });
        }

        let now = Utc::now();
        let tau = config.consolidation.recency_decay_rate_secs;
        let max_access = config.consolidation.max_access_count;
        let importance = ingestion_importance(now, now, &draft.metadata, 0, tau, max_access);
        let tier = Tier::candidate_for_importance(importance);

        let memory = Memory::new(draft.owner_id, draft.content, draft.embedding, importance, tier, draft.metadata);
        let id = memory.id;

        let _guard = self.locks.lock_one(id).await;
        let settings = config.settings_for(tier);
        let record = memory_to_record(&memory, &self.codec, settings.compression_ratio, &config.compression);

        self.gateway.insert(tier, record).await.map_err(|e| match e {
            Error::Transient(msg) => Error::Transient(msg),
            other => Error::StorageFailed(other.to_string()),
        })?;

        if tier == Tier::Core {
            self.cache.put(tier, Arc::new(memory));
        }

        Ok(id)
    }

    /// Cascading search: core up to `k`, then active up to the remainder,
    /// then background up to whatever is left. Touches every returned
    /// memory's access metrics before returning it.
    ///
    /// For the core tier only, a pre-flight cache read (§4.H, an optional
    /// fast path) may serve the closest cache-resident match directly,
    /// saving one gateway round trip; the gateway is still queried
    /// afterwards for the rest of the tier's quota.
    #[instrument(skip(self))]
    pub async fn retrieve(&self, owner_id: &str, query: Query, k: usize) -> Result<Vec<Memory>> {
        let query_embedding = match query {
            Query::Embedding(v) => v,
            Query::Text(text) => self.embedder.embed(&text).await?,
        };

        let mut results = Vec::with_capacity(k);
        let mut cache_hit_id = None;
        if k > 0 {
            if let Some(best) = self
                .cache
                .core_entries_for_owner(owner_id)
                .into_iter()
                .map(|m| (cosine_similarity(&query_embedding, &m.embedding), m))
                .filter(|(score, _)| *score >= CORE_CACHE_FAST_PATH_SIMILARITY)
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(_, memory)| memory)
            {
                cache_hit_id = Some(best.id);
                results.push(self.touch_and_persist_cached(best, Tier::Core).await?);
            }
        }

        for tier in [Tier::Core, Tier::Active, Tier::Background] {
            if results.len() >= k {
                break;
            }
            let remaining = k - results.len();
            // Ask for one extra from the core tier when the fast path
            // already served its best match, since the gateway's own
            // ranking will likely surface that same record again.
            let request_n = if tier == Tier::Core && cache_hit_id.is_some() { remaining + 1 } else { remaining };
            let filter = Some(QueryFilter::by_owner(owner_id));
            let found = match self.gateway.search_by_vector(tier, &query_embedding, request_n, filter).await {
                Ok(found) => found,
                Err(Error::Transient(msg)) => {
                    warn!(tier = %tier, error = %msg, "gateway search failed transiently, skipping tier");
                    continue;
                }
                Err(e) => return Err(e),
            };
            for record in found {
                if results.len() >= k {
                    break;
                }
                if tier == Tier::Core && cache_hit_id == Some(record.id) {
                    continue;
                }
                results.push(self.touch_and_persist(record, tier).await?);
            }
        }

        Ok(results)
    }

    async fn touch_and_persist(&self, record: StoredRecord, tier: Tier) -> Result<Memory> {
        let memory = record_to_memory(record, tier, &self.codec)?;
        self.touch_and_persist_cached(Arc::new(memory), tier).await
    }

    /// Same touch-then-write-through path as `touch_and_persist`, but
    /// starting from an already-decoded memory (the cache fast path has no
    /// `StoredRecord` to decompress).
    async fn touch_and_persist_cached(&self, memory: Arc<Memory>, tier: Tier) -> Result<Memory> {
        let mut memory = (*memory).clone();
        let _guard = self.locks.lock_one(memory.id).await;
        memory.touch(Utc::now());
        self.write_through(&memory, tier).await?;
        Ok(memory)
    }

    async fn write_through(&self, memory: &Memory, tier: Tier) -> Result<()> {
        let config = self.config.snapshot();
        let settings = config.settings_for(tier);
        let record = memory_to_record(memory, &self.codec, settings.compression_ratio, &config.compression);
        self.gateway.insert(tier, record).await?;
        if tier == Tier::Core {
            self.cache.put(tier, Arc::new(memory.clone()));
        } else {
            self.cache.invalidate_everywhere(&memory.id);
        }
        Ok(())
    }

    /// Batch access-metrics update, serialised per id in lexicographic
    /// order to avoid deadlocking against concurrent multi-id operations.
    pub async fn update_access(&self, memories: &[Memory]) -> Result<()> {
        let ids: Vec<Uuid> = memories.iter().map(|m| m.id).collect();
        let _guards = self.locks.lock_many(&ids).await;
        for memory in memories {
            let mut updated = memory.clone();
            updated.touch(Utc::now());
            self.write_through(&updated, updated.tier).await?;
        }
        Ok(())
    }

    /// Full-record update (content, metadata, importance, or tier changed
    /// by the caller directly rather than through `transition_tier`).
    pub async fn update(&self, memory: Memory) -> Result<()> {
        if memory.content.is_empty() {
            return Err(Error::InvalidInput("content must not be empty".into()));
        }
        let _guard = self.locks.lock_one(memory.id).await;
        let existing = self.gateway.query_by_filter(memory.tier, QueryFilter::by_id(memory.id)).await?;
        if existing.is_empty() {
            return Err(Error::NotFound(memory.id.to_string()));
        }
        self.write_through(&memory, memory.tier).await
    }

    /// Delete a memory by id, regardless of which tier it currently lives
    /// in. The id space is shared across tiers, so every collection is
    /// probed in turn.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let _guard = self.locks.lock_one(id).await;
        for tier in Tier::all() {
            if self.gateway.delete_by_id(tier, id).await? {
                self.cache.invalidate_everywhere(&id);
                return Ok(());
            }
        }
        Ok(())
    }

    /// Move `memory` to `new_tier`: validates the importance floor, then
    /// performs delete-from-source + reinsert-into-destination as a single
    /// logical move under the id's lock.
    pub async fn transition_tier(&self, memory: &Memory, new_tier: Tier) -> Result<()> {
        let config = self.config.snapshot();
        let floor = config.settings_for(new_tier).importance_threshold;
        if memory.importance < floor {
            return Err(Error::InvalidTransition(format!(
                "importance {:.3} below {:?}'s floor {:.3}",
                memory.importance, new_tier, floor
            )));
        }

        let _guard = self.locks.lock_one(memory.id).await;
        let removed = self.gateway.delete_by_id(memory.tier, memory.id).await?;
        if !removed {
            return Err(Error::NotFound(memory.id.to_string()));
        }

        let mut moved = memory.clone();
        moved.tier = new_tier;
        let settings = config.settings_for(new_tier);
        let record = memory_to_record(&moved, &self.codec, settings.compression_ratio, &config.compression);
        self.gateway.insert(new_tier, record).await?;

        self.cache.invalidate_everywhere(&memory.id);
        if new_tier == Tier::Core {
            self.cache.put(new_tier, Arc::new(moved));
        }
        Ok(())
    }
}
