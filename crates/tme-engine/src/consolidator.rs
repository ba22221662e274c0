//! Consolidator: leader/canopy clustering of similar memories, followed by
//! an importance-weighted merge of each multi-member cluster into a single
//! representative.

use chrono::{DateTime, Utc};
use tme_core::{EngineConfig, Tier};
use uuid::Uuid;

use crate::scorer::{access_frequency, recency};
use crate::types::{Memory, Metadata};

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
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

struct Cluster {
    centroid: Vec<f32>,
    members: Vec<Memory>,
}

fn recompute_centroid(cluster: &mut Cluster) {
    let total_weight: f64 = cluster.members.iter().map(|m| m.importance.max(1e-9)).sum();
    let dim = cluster.centroid.len();
    let mut centroid = vec![0.0f32; dim];
    for m in &cluster.members {
        let w = (m.importance.max(1e-9) / total_weight) as f32;
        for (c, e) in centroid.iter_mut().zip(&m.embedding) {
            *c += w * e;
        }
    }
    cluster.centroid = centroid;
}

/// Leader/canopy clustering: iterate memories in input order; attach to the
/// first cluster whose centroid is similar enough, else start a new
/// cluster. `max_cluster_size` bounds how many members a single cluster can
/// absorb.
fn build_clusters(memories: Vec<Memory>, threshold: f32, max_cluster_size: usize) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    for memory in memories {
        let mut attach_at = None;
        for (i, cluster) in clusters.iter().enumerate() {
            if cluster.members.len() >= max_cluster_size {
                continue;
            }
            if cosine_similarity(&memory.embedding, &cluster.centroid) >= threshold {
                attach_at = Some(i);
                break;
            }
        }
        match attach_at {
            Some(i) => {
                clusters[i].members.push(memory);
                recompute_centroid(&mut clusters[i]);
            }
            None => clusters.push(Cluster { centroid: memory.embedding.clone(), members: vec![memory] }),
        }
    }
    clusters
}

/// The outcome of processing a single cluster.
pub enum ConsolidationResult {
    /// A single-member cluster: passed through unchanged.
    Unchanged(Memory),
    /// A multi-member cluster that merged successfully.
    Merged(MergedMemory),
    /// A multi-member cluster whose merge would have produced an importance
    /// below the consolidation threshold; the members are kept as-is rather
    /// than discarded.
    Rejected(Vec<Memory>),
}

pub struct MergedMemory {
    pub memory: Memory,
    pub superseded_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolidationStats {
    pub clusters_built: usize,
    pub members_merged: usize,
    pub average_importance: f64,
    pub processing_time_ms: u64,
    pub success_rate: f64,
}

/// Merge a multi-member cluster into its representative. `now` becomes the
/// consolidated memory's `created_at`.
fn merge_cluster(cluster: Cluster, now: DateTime<Utc>, config: &EngineConfig) -> ConsolidationResult {
    let mut members = cluster.members;
    let tau = config.consolidation.recency_decay_rate_secs;
    let max_access = config.consolidation.max_access_count;

    // content: members sorted by importance*recency(createdAt) descending,
    // joined by double newline.
    members.sort_by(|a, b| {
        let score_a = a.importance * recency(a.created_at, now, tau);
        let score_b = b.importance * recency(b.created_at, now, tau);
        score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
    });
    let content = members.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n\n");

    // embedding: importance-weighted average over members.
    let total_weight: f64 = members.iter().map(|m| m.importance.max(1e-9)).sum();
    let dim = members[0].embedding.len();
    let mut embedding = vec![0.0f32; dim];
    for m in &members {
        let w = (m.importance.max(1e-9) / total_weight) as f32;
        for (c, e) in embedding.iter_mut().zip(&m.embedding) {
            *c += w * e;
        }
    }

    // importance: mean over members of a weighted combination of importance,
    // recency, and access weight (0.5/0.3/0.2). A plain product of the three
    // factors would zero out every merge of freshly-ingested, never-yet-
    // accessed members, which would make ordinary deduplication impossible
    // immediately after ingestion; weighting them additively, in the same
    // style as every other scoring formula in this crate, keeps importance
    // dominated by the members' own importance while recency and usage
    // still pull it down for genuinely stale, unused duplicates.
    let importance: f64 = members
        .iter()
        .map(|m| {
            let r = recency(m.created_at, now, tau);
            let access_weight = access_frequency(m.access_count, max_access);
            0.5 * m.importance + 0.3 * r + 0.2 * access_weight
        })
        .sum::<f64>()
        / members.len() as f64;

    // accessCount: sum over members (invariant 6).
    let access_count: u64 = members.iter().map(|m| m.access_count).sum();

    // metadata: key-wise merge. numeric fields averaged; everything else
    // overwritten by the last member seen, in stable iteration order.
    let emotional_value = members.iter().map(|m| m.metadata.emotional_value).sum::<f64>() / members.len() as f64;
    let context_relevance = members.iter().map(|m| m.metadata.context_relevance).sum::<f64>() / members.len() as f64;
    let mut metadata = Metadata::new(emotional_value, context_relevance);
    for m in &members {
        if !m.metadata.tags.is_empty() {
            metadata.tags = m.metadata.tags.clone();
        }
        if m.metadata.source.is_some() {
            metadata.source = m.metadata.source.clone();
        }
        if !m.metadata.connected_memories.is_empty() {
            metadata.connected_memories = m.metadata.connected_memories.clone();
        }
        for (k, v) in &m.metadata.extra {
            metadata.extra.insert(k.clone(), v.clone());
        }
    }

    if importance < config.consolidation.threshold {
        return ConsolidationResult::Rejected(members);
    }

    let tier = Tier::candidate_for_importance(importance);
    let new_memory = Memory {
        id: Uuid::new_v4(),
        owner_id: members[0].owner_id.clone(),
        content,
        embedding,
        tier,
        importance: importance.clamp(0.0, 1.0),
        created_at: now,
        last_accessed_at: now,
        access_count,
        metadata,
    };
    let superseded_ids = members.iter().map(|m| m.id).collect();

    ConsolidationResult::Merged(MergedMemory { memory: new_memory, superseded_ids })
}

/// Run one consolidation pass over `memories`. Returns a result per cluster
/// plus aggregate statistics: clusters built, members merged, average
/// importance, processing time, success rate.
///
/// The clustering attach threshold is `consolidation.min_similarity`; the
/// merge-rejection threshold is `consolidation.threshold` — both default to
/// 0.7, but are tracked as separate configuration knobs (see DESIGN.md for
/// the rationale).
pub fn consolidate(memories: Vec<Memory>, now: DateTime<Utc>, config: &EngineConfig) -> (Vec<ConsolidationResult>, ConsolidationStats) {
    let start = std::time::Instant::now();
    let clusters = build_clusters(
        memories,
        config.consolidation.min_similarity as f32,
        config.consolidation.max_cluster_size,
    );
    let clusters_built = clusters.len();

    let mut results = Vec::with_capacity(clusters_built);
    let mut total_importance = 0.0;
    let mut total_members = 0usize;
    let mut merged_members = 0usize;
    let mut successes = 0usize;

    for cluster in clusters {
        let member_count = cluster.members.len();
        total_members += member_count;

        if member_count < 2 {
            let memory = cluster.members.into_iter().next().expect("cluster always has >=1 member");
            total_importance += memory.importance;
            successes += 1;
            results.push(ConsolidationResult::Unchanged(memory));
            continue;
        }

        match merge_cluster(cluster, now, config) {
            ConsolidationResult::Merged(merged) => {
                total_importance += merged.memory.importance;
                merged_members += member_count;
                successes += 1;
                results.push(ConsolidationResult::Merged(merged));
            }
            ConsolidationResult::Rejected(members) => {
                total_importance += members.iter().map(|m| m.importance).sum::<f64>();
                results.push(ConsolidationResult::Rejected(members));
            }
            ConsolidationResult::Unchanged(_) => unreachable!("merge_cluster never returns Unchanged"),
        }
    }

    let stats = ConsolidationStats {
        clusters_built,
        members_merged: merged_members,
        average_importance: if total_members == 0 { 0.0 } else { total_importance / total_members as f64 },
        processing_time_ms: start.elapsed().as_millis() as u64,
        success_rate: if clusters_built == 0 { 1.0 } else { successes as f64 / clusters_built as f64 },
    };

    (results, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tme_core::Tier as T;

    fn memory(owner: &str, embedding: Vec<f32>, importance: f64) -> Memory {
        Memory::new(owner, format!("content for {owner}"), embedding, importance, T::Active, Metadata::new(0.5, 0.5))
    }

    #[test]
    fn three_near_duplicates_merge_into_one() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let memories = vec![
            memory("u1", vec![1.0, 0.0, 0.0], 0.9),
            memory("u1", vec![0.98, 0.01, 0.0], 0.8),
            memory("u1", vec![0.97, 0.02, 0.0], 0.85),
        ];
        let (results, stats) = consolidate(memories, now, &config);
        assert_eq!(results.len(), 1);
        assert_eq!(stats.clusters_built, 1);
        match &results[0] {
            ConsolidationResult::Merged(merged) => {
                assert_eq!(merged.superseded_ids.len(), 3);
                assert_eq!(merged.memory.access_count, 0);
                assert!(merged.memory.content.contains("u1"));
            }
            _ => panic!("expected a merge"),
        }
    }

    #[test]
    fn dissimilar_memories_stay_separate() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let memories = vec![
            memory("u1", vec![1.0, 0.0, 0.0], 0.9),
            memory("u1", vec![0.0, 1.0, 0.0], 0.9),
        ];
        let (results, _stats) = consolidate(memories, now, &config);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, ConsolidationResult::Unchanged(_))));
    }

    #[test]
    fn merge_below_threshold_is_rejected_and_members_kept() {
        let mut config = EngineConfig::default();
        config.consolidation.threshold = 0.99; // unreachable
        let now = Utc::now();
        let memories = vec![
            memory("u1", vec![1.0, 0.0, 0.0], 0.5),
            memory("u1", vec![0.99, 0.0, 0.0], 0.5),
        ];
        let (results, _) = consolidate(memories, now, &config);
        match &results[0] {
            ConsolidationResult::Rejected(members) => assert_eq!(members.len(), 2),
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn consolidation_is_idempotent_on_its_own_output() {
        let config = EngineConfig::default();
        let now = Utc::now();
        let memories = vec![
            memory("u1", vec![1.0, 0.0, 0.0], 0.9),
            memory("u1", vec![0.98, 0.02, 0.0], 0.85),
        ];
        let (first_pass, _) = consolidate(memories, now, &config);
        let merged: Vec<Memory> = first_pass
            .into_iter()
            .map(|r| match r {
                ConsolidationResult::Merged(m) => m.memory,
                ConsolidationResult::Unchanged(m) => m,
                ConsolidationResult::Rejected(mut ms) => ms.remove(0),
            })
            .collect();

        let (second_pass, _) = consolidate(merged, now, &config);
        assert!(second_pass.iter().all(|r| matches!(r, ConsolidationResult::Unchanged(_))));
    }
}
