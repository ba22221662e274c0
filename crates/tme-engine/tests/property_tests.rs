//! Property-based tests for tme-engine: invariants that must hold for
//! arbitrary inputs, not just the hand-picked scenarios in
//! `integration_tests.rs`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use proptest::prelude::*;
use tme_core::{CompressionConfig, CompressionMethod, ConfigHandle, EngineConfig, Result, Tier};
use tme_engine::{
    consolidator, current_importance, evaluate_transition, ingestion_importance, should_demote, should_promote, CompressionCodec,
    Embedder, IdLockMap, InMemoryGateway, LifecycleManager, Memory, MemoryDraft, Metadata, Metric, MemoryService, Query, TierCacheSet,
    VectorGateway,
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

fn draft(owner: &str, embedding: Vec<f32>) -> MemoryDraft {
    MemoryDraft {
        owner_id: owner.to_string(),
        content: "property-test memory".to_string(),
        embedding,
        metadata: Metadata::new(0.5, 0.5),
    }
}

// P1: retrieve(ownerId, q, k) returns at most k memories, every one owned
// by ownerId.
proptest! {
    #[test]
    fn p1_retrieve_respects_k_and_owner(
        owner_count in 2usize..5usize,
        per_owner in 1usize..6usize,
        k in 1usize..10usize,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let config = EngineConfig::default();
            let (_gateway, _cache, service, _manager) = harness(config);

            for owner_idx in 0..owner_count {
                let owner = format!("owner-{owner_idx}");
                for i in 0..per_owner {
                    let angle = (owner_idx * 10 + i) as f32;
                    let embedding = vec![angle.cos(), angle.sin(), 0.0];
                    service.store(draft(&owner, embedding)).await.unwrap();
                }
            }

            let results = service.retrieve("owner-0", Query::Embedding(vec![1.0, 0.0, 0.0]), k).await.unwrap();
            prop_assert!(results.len() <= k);
            prop_assert!(results.iter().all(|m| m.owner_id == "owner-0"));
            Ok(())
        }).unwrap();
    }
}

// P2: storing a memory and immediately retrieving with its own embedding
// returns it as the top (first) result.
proptest! {
    #[test]
    fn p2_store_then_retrieve_finds_top_match(
        x in -1.0f32..1.0f32,
        y in -1.0f32..1.0f32,
    ) {
        // Skip the degenerate zero vector: cosine similarity is undefined there.
        prop_assume!(x.abs() > 0.01 || y.abs() > 0.01);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let config = EngineConfig::default();
            let (_gateway, _cache, service, _manager) = harness(config);

            let embedding = vec![x, y, 0.0];
            let id = service.store(draft("u1", embedding.clone())).await.unwrap();

            let results = service.retrieve("u1", Query::Embedding(embedding), 1).await.unwrap();
            prop_assert_eq!(results.len(), 1);
            prop_assert_eq!(results[0].id, id);
            Ok(())
        }).unwrap();
    }
}

// P3: both scoring formulas always clamp into [0, 1], regardless of input.
proptest! {
    #[test]
    fn p3_ingestion_and_current_importance_stay_in_unit_interval(
        emotional_value in -2.0f64..2.0f64,
        context_relevance in -2.0f64..2.0f64,
        access_count in 0u64..10_000u64,
        age_days in 0i64..1000i64,
        base_importance in -2.0f64..2.0f64,
    ) {
        let now = Utc::now();
        let created_at: DateTime<Utc> = now - ChronoDuration::days(age_days);
        let metadata = Metadata::new(emotional_value, context_relevance);
        let tau = 30.0 * 24.0 * 3600.0;

        let ingestion = ingestion_importance(created_at, now, &metadata, access_count, tau, 100);
        prop_assert!((0.0..=1.0).contains(&ingestion));

        let current = current_importance(base_importance, created_at, now, access_count, context_relevance, tau, 100);
        prop_assert!((0.0..=1.0).contains(&current));
    }
}

// P4: retrieving a memory never decreases its access count across repeated
// calls.
proptest! {
    #[test]
    fn p4_access_count_is_monotonic_under_retrieve(retrieve_count in 1usize..20usize) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let config = EngineConfig::default();
            let (_gateway, _cache, service, _manager) = harness(config);

            let embedding = vec![1.0, 0.0, 0.0];
            let id = service.store(draft("u1", embedding.clone())).await.unwrap();

            let mut previous = 0u64;
            for _ in 0..retrieve_count {
                let results = service.retrieve("u1", Query::Embedding(embedding.clone()), 1).await.unwrap();
                let memory = results.into_iter().find(|m| m.id == id).unwrap();
                prop_assert!(memory.access_count >= previous);
                previous = memory.access_count;
            }
            Ok(())
        }).unwrap();
    }
}

// P5: a memory's tier changes after one policy evaluation only if the
// corresponding promotion or demotion predicate actually held.
proptest! {
    #[test]
    fn p5_transition_only_happens_when_predicate_holds(
        importance in 0.0f64..1.0f64,
        access_count in 0u64..200u64,
        inactivity_days in 0i64..400i64,
        tier_idx in 0usize..3usize,
    ) {
        let config = EngineConfig::default();
        let now = Utc::now();
        let tier = Tier::all()[tier_idx];

        let mut memory = Memory::new("u1", "x", vec![0.0; 4], importance, tier, Metadata::default());
        memory.access_count = access_count;
        memory.last_accessed_at = now - ChronoDuration::days(inactivity_days);

        let promote_expected = should_promote(&memory, &config);
        let demote_expected = should_demote(&memory, now, &config);
        let transition = evaluate_transition(&memory, now, &config);

        match transition {
            Some(new_tier) => {
                prop_assert_ne!(new_tier, tier);
                prop_assert!(promote_expected || demote_expected);
                if promote_expected {
                    prop_assert_eq!(Some(new_tier), tier.promoted());
                } else {
                    prop_assert_eq!(Some(new_tier), tier.demoted());
                }
            }
            None => {
                prop_assert!(!promote_expected && !demote_expected);
            }
        }
    }
}

// P6: running consolidation on its own (already-merged) output a second
// time produces no further merges -- a fixed point.
proptest! {
    #[test]
    fn p6_consolidation_is_idempotent(similarity in 0.9f32..1.0f32) {
        let config = EngineConfig::default();
        let now = Utc::now();

        let memories = vec![
            Memory::new("u1", "a", vec![1.0, 0.0, 0.0], 0.9, Tier::Active, Metadata::new(0.9, 0.8)),
            Memory::new("u1", "b", vec![similarity, (1.0 - similarity * similarity).sqrt(), 0.0], 0.85, Tier::Active, Metadata::new(0.85, 0.8)),
        ];

        let (first_results, first_stats) = consolidator::consolidate(memories, now, &config);
        prop_assert!(first_stats.clusters_built >= 1);

        let survivors: Vec<Memory> = first_results
            .into_iter()
            .map(|r| match r {
                consolidator::ConsolidationResult::Unchanged(m) => m,
                consolidator::ConsolidationResult::Merged(merged) => merged.memory,
                consolidator::ConsolidationResult::Rejected(mut members) => members.remove(0),
            })
            .collect();
        let survivor_count = survivors.len();

        let (second_results, second_stats) = consolidator::consolidate(survivors, now, &config);
        prop_assert_eq!(second_results.len(), survivor_count);
        prop_assert_eq!(second_stats.members_merged, 0);
    }
}

// P7: lossless compression round-trips byte-for-byte, for any content.
proptest! {
    #[test]
    fn p7_lossless_compression_round_trips(content in "[ -~\\n]{0,2000}") {
        let codec = CompressionCodec::new();
        let config = CompressionConfig {
            enabled: true,
            method: CompressionMethod::Lossless,
            quality: 6,
            min_size_bytes: 1,
            target_ratio: 0.6,
        };

        let payload = codec.compress(&content, 0.6, &config);
        let restored = codec.decompress(&payload).unwrap();
        prop_assert_eq!(restored, content);
    }
}

// P8: a memory found in a tier's cache is always present in the gateway's
// collection for that same tier.
proptest! {
    #[test]
    fn p8_cached_memory_is_present_in_its_tier_collection(
        emotional_value in 0.7f64..1.0f64,
        context_relevance in 0.7f64..1.0f64,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let config = EngineConfig::default();
            let (gateway, cache, service, _manager) = harness(config);

            let draft = MemoryDraft {
                owner_id: "u1".to_string(),
                content: "high value memory".to_string(),
                embedding: vec![1.0, 0.0, 0.0],
                metadata: Metadata::new(emotional_value, context_relevance),
            };
            let id = service.store(draft).await.unwrap();
            let _ = service.retrieve("u1", Query::Embedding(vec![1.0, 0.0, 0.0]), 1).await.unwrap();

            for tier in Tier::all() {
                if let Some(cached) = cache.get(tier, &id) {
                    let rows = gateway.query_by_filter(tier, Default::default()).await.unwrap();
                    prop_assert!(rows.iter().any(|r| r.id == cached.id));
                }
            }
            Ok(())
        }).unwrap();
    }
}
