//! End-to-end tests exercising `MemoryService` and `LifecycleManager`
//! together against the in-memory gateway, covering the scenarios the
//! engine's design is built around: ingest-then-promote, age-out-and-
//! archive, consolidate-near-duplicates, capacity enforcement, cache
//! coherence under tier transition, and ranked multi-tier retrieval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tme_core::{ConfigHandle, EngineConfig, Result, Tier};
use tme_engine::{
    CompressionCodec, ContentPayload, Embedder, IdLockMap, InMemoryGateway, LifecycleManager, Memory, MemoryDraft, Metadata, Metric,
    MemoryService, Query, StoredRecord, TierCacheSet, VectorGateway,
};

struct IdentityEmbedder;

#[async_trait]
impl Embedder for IdentityEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0])
    }
}

fn harness(config: EngineConfig) -> (Arc<InMemoryGateway>, Arc<TierCacheSet>, MemoryService, LifecycleManager) {
    let gateway = Arc::new(InMemoryGateway::new(config.general.embedding_dimension, Metric::Cosine));
    let cache = Arc::new(TierCacheSet::new(
        config.core.capacity as u64,
        config.active.capacity as u64,
        config.background.capacity as u64,
        Duration::from_secs(3600),
    ));
    let codec = Arc::new(CompressionCodec::new());
    let locks = Arc::new(IdLockMap::new());
    let handle = ConfigHandle::new(config).unwrap();

    let gw_dyn: Arc<dyn VectorGateway> = gateway.clone();
    let service = MemoryService::new(gw_dyn.clone(), cache.clone(), codec.clone(), locks.clone(), handle.clone(), Arc::new(IdentityEmbedder));
    let manager = LifecycleManager::new(gw_dyn, cache.clone(), codec, locks, handle);
    (gateway, cache, service, manager)
}

fn draft(owner: &str, emotional_value: f64, context_relevance: f64, embedding: Vec<f32>) -> MemoryDraft {
    MemoryDraft {
        owner_id: owner.to_string(),
        content: "a memory worth keeping".to_string(),
        embedding,
        metadata: Metadata::new(emotional_value, context_relevance),
    }
}

/// Scenario 1: a fresh, high-value memory ingests into `active`; after
/// enough simulated access its current-score formula should carry it to
/// `core` on the next lifecycle pass.
#[tokio::test]
async fn ingest_then_promote() {
    let config = EngineConfig::default();
    let (_gateway, _cache, service, manager) = harness(config);

    let id = service.store(draft("u1", 0.95, 0.9, vec![1.0, 0.0, 0.0])).await.unwrap();

    // Ingestion importance = 0.3 + 0.285 + 0.18 + 0 = 0.765 -> active tier.
    let found = service.retrieve("u1", Query::Embedding(vec![1.0, 0.0, 0.0]), 1).await.unwrap();
    let memory = found.into_iter().find(|m| m.id == id).unwrap();
    assert_eq!(memory.tier, Tier::Active);
    assert!((memory.importance - 0.765).abs() < 1e-3);

    // Simulate 60 accesses by bumping the access counter directly and
    // writing it back through the lifecycle manager's own write path via
    // repeated retrieves (each call touches the memory once).
    for _ in 0..60 {
        let _ = service.retrieve("u1", Query::Embedding(vec![1.0, 0.0, 0.0]), 1).await.unwrap();
    }

    let report = manager.run_cycle().await.unwrap();
    assert!(report.transitioned_count >= 1 || report.evolved_count >= 1);

    let after = service.retrieve("u1", Query::Embedding(vec![1.0, 0.0, 0.0]), 1).await.unwrap();
    let memory = after.into_iter().find(|m| m.id == id).expect("memory still present after pass");
    assert_eq!(memory.tier, Tier::Core);
}

/// Scenario 2: an old, low-importance, never-accessed memory should be
/// forced to `background` (demoted, or archived outright) by one pass.
#[tokio::test]
async fn age_out_and_archive() {
    let config = EngineConfig::default();
    let (gateway, _cache, _service, manager) = harness(config);

    let mut memory = Memory::new("u1", "an old memory", vec![1.0, 0.0, 0.0], 0.35, Tier::Active, Metadata::new(0.3, 0.3));
    memory.created_at = Utc::now() - ChronoDuration::days(200);
    memory.last_accessed_at = memory.created_at;
    let id = memory.id;

    let record = StoredRecord {
        id: memory.id,
        owner_id: memory.owner_id.clone(),
        embedding: memory.embedding.clone(),
        content_payload: ContentPayload::Raw(memory.content.clone()),
        created_at: memory.created_at,
        last_accessed_at: memory.last_accessed_at,
        importance: memory.importance,
        access_count: memory.access_count,
        metadata: memory.metadata.clone(),
    };
    gateway.insert(Tier::Active, record).await.unwrap();

    manager.run_cycle().await.unwrap();

    let remaining = gateway.query_by_filter(Tier::Background, Default::default()).await.unwrap();
    assert!(remaining.iter().any(|r| r.id == id), "memory should have moved to background");
}

/// Scenario 3: three near-duplicate memories (pairwise cosine similarity
/// >= 0.85) consolidate into exactly one representative whose content
/// contains all three originals and whose access count is their sum.
#[tokio::test]
async fn consolidate_three_near_duplicates() {
    let mut config = EngineConfig::default();
    // Freshly-ingested members have no access history, which caps ingestion
    // importance at 0.8 and the resulting merge importance near the default
    // 0.7 threshold; lower it here so the clustering behaviour under test
    // isn't at the mercy of floating-point rounding at the boundary (the
    // exact threshold arithmetic has its own coverage in consolidator.rs).
    config.consolidation.threshold = 0.5;
    let (_gateway, _cache, service, manager) = harness(config);

    let a = service.store(draft("u1", 0.9, 0.8, vec![1.0, 0.0, 0.0])).await.unwrap();
    let b = service.store(draft("u1", 0.85, 0.8, vec![0.98, 0.01, 0.0])).await.unwrap();
    let c = service.store(draft("u1", 0.8, 0.8, vec![0.97, 0.02, 0.0])).await.unwrap();

    let stats = manager.force_consolidation().await.unwrap();
    assert_eq!(stats.clusters_built, 1);
    assert_eq!(stats.members_merged, 3);

    let all = service.retrieve("u1", Query::Embedding(vec![1.0, 0.0, 0.0]), 10).await.unwrap();
    assert_eq!(all.len(), 1, "three near-duplicates should collapse into one memory");
    assert!(all.iter().all(|m| ![a, b, c].contains(&m.id)), "originals are superseded");
}

/// Scenario 4: with `maxTotalMemories = 4`, storing 6 memories and running
/// one lifecycle pass leaves exactly 4, dropping the two lowest-importance
/// ones.
#[tokio::test]
async fn capacity_enforcement_drops_lowest_importance() {
    let mut config = EngineConfig::default();
    config.general.max_total_memories = 4;
    let (gateway, _cache, service, manager) = harness(config);

    let mut ids = Vec::new();
    for (i, importance) in [0.1, 0.2, 0.3, 0.4, 0.5, 0.6].into_iter().enumerate() {
        // Spread embeddings apart so the consolidator never merges them.
        let angle = i as f32;
        let embedding = vec![angle.cos(), angle.sin(), 0.1 * (i as f32)];
        let id = service.store(draft("u1", importance, importance, embedding)).await.unwrap();
        ids.push((id, importance));
    }

    manager.run_cycle().await.unwrap();

    assert_eq!(gateway.total_count(), 4);
    let lowest_two: Vec<_> = ids.iter().filter(|(_, imp)| *imp <= 0.2).map(|(id, _)| *id).collect();
    for tier in Tier::all() {
        let remaining = gateway.query_by_filter(tier, Default::default()).await.unwrap();
        for r in &remaining {
            assert!(!lowest_two.contains(&r.id), "low-importance memory should have been evicted");
        }
    }
}

/// Scenario 5: a memory forced to `core` is served from cache; once demoted
/// to `active`, the next retrieval must not report it as `core`.
#[tokio::test]
async fn cache_coherence_under_tier_transition() {
    let config = EngineConfig::default();
    let (_gateway, cache, service, manager) = harness(config);
    let _ = manager; // lifecycle manager not needed for this scenario; kept for harness symmetry.

    // emotionalValue=contextRelevance=1.0, fresh -> ingestion importance
    // 0.3 + 0.3 + 0.2 + 0 = 0.8, exactly at the core threshold.
    let id = service.store(draft("u1", 1.0, 1.0, vec![1.0, 0.0, 0.0])).await.unwrap();
    let found = service.retrieve("u1", Query::Embedding(vec![1.0, 0.0, 0.0]), 1).await.unwrap();
    let memory = found.into_iter().find(|m| m.id == id).expect("memory present");
    assert_eq!(memory.tier, Tier::Core);
    assert!(cache.get(Tier::Core, &id).is_some(), "a core memory should be cache-resident");

    service.transition_tier(&memory, Tier::Active).await.unwrap();

    assert!(cache.get(Tier::Core, &id).is_none(), "demoted memory must not linger in the core cache");
    let after = service.retrieve("u1", Query::Embedding(vec![1.0, 0.0, 0.0]), 1).await.unwrap();
    let memory = after.into_iter().find(|m| m.id == id).expect("memory still retrievable");
    assert_ne!(memory.tier, Tier::Core);
}

/// Scenario 6: populate 3 core, 5 active, 10 background memories sharing
/// one embedding; `retrieve(k=7)` returns all 3 core results first, then 4
/// active, and no background results.
#[tokio::test]
async fn retrieve_k_orders_by_tier_then_truncates() {
    let config = EngineConfig::default();
    let (gateway, _cache, service, _manager) = harness(config);
    let embedding = vec![1.0, 0.0, 0.0];

    async fn seed_tier(gateway: &InMemoryGateway, tier: Tier, n: usize, embedding: &[f32]) {
        for _ in 0..n {
            let memory = Memory::new("u1", "shared content", embedding.to_vec(), 0.5, tier, Metadata::new(0.5, 0.5));
            let record = StoredRecord {
                id: memory.id,
                owner_id: memory.owner_id.clone(),
                embedding: memory.embedding.clone(),
                content_payload: ContentPayload::Raw(memory.content.clone()),
                created_at: memory.created_at,
                last_accessed_at: memory.last_accessed_at,
                importance: memory.importance,
                access_count: memory.access_count,
                metadata: memory.metadata.clone(),
            };
            gateway.insert(tier, record).await.unwrap();
        }
    }

    seed_tier(&gateway, Tier::Core, 3, &embedding).await;
    seed_tier(&gateway, Tier::Active, 5, &embedding).await;
    seed_tier(&gateway, Tier::Background, 10, &embedding).await;

    let results = service.retrieve("u1", Query::Embedding(embedding), 7).await.unwrap();
    assert_eq!(results.len(), 7);
    let core_count = results.iter().filter(|m| m.tier == Tier::Core).count();
    let active_count = results.iter().filter(|m| m.tier == Tier::Active).count();
    let background_count = results.iter().filter(|m| m.tier == Tier::Background).count();
    assert_eq!(core_count, 3);
    assert_eq!(active_count, 4);
    assert_eq!(background_count, 0);
}
