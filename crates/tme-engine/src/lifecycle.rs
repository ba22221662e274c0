//! Lifecycle Manager: the periodic orchestrator tying the Consolidator,
//! Evolver, and Tier Policy together into one pass — refresh stats,
//! maybe-consolidate, evolve, re-tier, clean up, tune the cache. Grounded
//! on the corpus's `run_cycle`/single-flight-guarded background-service
//! idiom, with exponential-backoff retry around the whole pass.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tme_core::{ConfigHandle, Result, Tier};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::TierCacheSet;
use crate::codec::CompressionCodec;
use crate::consolidator::{self, ConsolidationResult, ConsolidationStats};
use crate::evolver;
use crate::gateway::{QueryFilter, VectorGateway};
use crate::locking::IdLockMap;
use crate::policy::evaluate_transition;
use crate::scorer::current_importance_for;
use crate::service::{memory_to_record, record_to_memory};
use crate::types::Memory;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_INITIAL_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub total_memories: usize,
    pub per_tier_count: HashMap<Tier, usize>,
    pub average_importance: f64,
    pub consolidation_count: u64,
}

/// What a single orchestrator pass did, for logging/tests.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub consolidated: bool,
    pub consolidation_stats: Option<ConsolidationStats>,
    pub evolved_count: usize,
    pub transitioned_count: usize,
    pub deleted_count: usize,
}

pub struct LifecycleManager {
    gateway: Arc<dyn VectorGateway>,
    cache: Arc<TierCacheSet>,
    codec: Arc<CompressionCodec>,
    locks: Arc<IdLockMap>,
    config: ConfigHandle,
    single_flight: AsyncMutex<()>,
    consolidation_count: AtomicU64,
    last_consolidation_at: RwLock<DateTime<Utc>>,
}

impl LifecycleManager {
    pub fn new(gateway: Arc<dyn VectorGateway>, cache: Arc<TierCacheSet>, codec: Arc<CompressionCodec>, locks: Arc<IdLockMap>, config: ConfigHandle) -> Self {
        Self {
            gateway,
            cache,
            codec,
            locks,
            config,
            single_flight: AsyncMutex::new(()),
            consolidation_count: AtomicU64::new(0),
            last_consolidation_at: RwLock::new(Utc::now()),
        }
    }

    async fn fetch_all(&self, tier: Tier) -> Result<Vec<Memory>> {
        let records = self.gateway.query_by_filter(tier, QueryFilter::default()).await?;
        records.into_iter().map(|r| record_to_memory(r, tier, &self.codec)).collect()
    }

    async fn persist_in_tier(&self, memory: &Memory, tier: Tier) -> Result<()> {
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

    async fn move_between_tiers(&self, memory: &Memory, from: Tier, to: Tier) -> Result<()> {
        self.gateway.delete_by_id(from, memory.id).await?;
        let mut moved = memory.clone();
        moved.tier = to;
        self.persist_in_tier(&moved, to).await
    }

    /// Run the orchestrator's six-step pass once, with no retry. Returns
    /// whatever it completed even on partial failure of an independent step
    /// (each step's own errors are logged and do not abort the rest).
    async fn run_once(&self) -> Result<CycleReport> {
        let now = Utc::now();
        let mut report = CycleReport::default();

        // Step 2: consolidation trigger.
        let stats_before = self.compute_stats().await?;
        let time_since = (now - *self.last_consolidation_at.read().expect("lock poisoned")).num_seconds().max(0) as u64;
        let config = self.config.snapshot();
        let should_consolidate =
            stats_before.total_memories > config.consolidation.memory_threshold || time_since > config.consolidation.time_threshold_secs;
        if should_consolidate {
            let stats = self.run_consolidation_pass(now).await?;
            report.consolidated = true;
            report.consolidation_stats = Some(stats);
        }

        // Step 3: evolution pass.
        report.evolved_count = self.run_evolution_pass(now).await?;

        // Step 4: tier management.
        report.transitioned_count = self.run_tier_management_pass(now).await?;

        // Step 5: cleanup.
        report.deleted_count = self.run_cleanup_pass(now).await?;

        // Step 6: cache housekeeping -- purge stale entries, then self-tune
        // each tier's capacity against its observed hit rate and fill
        // ratio, once per cycle rather than per request.
        self.cache.purge_stale();
        for tier in Tier::all() {
            if let Some(new_capacity) = self.cache.auto_tune(tier) {
                info!(tier = %tier, new_capacity, "auto-tuned cache capacity");
            }
        }

        Ok(report)
    }

    /// Run one pass with exponential-backoff retry (3 attempts, 1s initial
    /// delay, doubling), guarded so passes never overlap.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let Ok(_guard) = self.single_flight.try_lock() else {
            warn!("lifecycle pass already running, skipping this tick");
            return Ok(CycleReport::default());
        };

        let mut delay = RETRY_INITIAL_DELAY;
        let mut last_err = None;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.run_once().await {
                Ok(report) => return Ok(report),
                Err(e) => {
                    warn!(attempt, error = %e, "lifecycle pass failed, retrying");
                    last_err = Some(e);
                    if attempt < RETRY_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        let err = last_err.expect("loop runs at least once");
        error!(error = %err, "lifecycle pass exhausted retries");
        for tier in Tier::all() {
            if let Err(verify_err) = self.gateway.verify_integrity(tier).await {
                error!(tier = %tier, error = %verify_err, "post-failure integrity check also failed");
            }
        }
        Err(err)
    }

    /// On-demand entry point running only the consolidation step,
    /// regardless of the threshold trigger.
    pub async fn force_consolidation(&self) -> Result<ConsolidationStats> {
        let now = Utc::now();
        self.run_consolidation_pass(now).await
    }

    async fn run_consolidation_pass(&self, now: DateTime<Utc>) -> Result<ConsolidationStats> {
        let mut all_memories = Vec::new();
        let mut origin_tier: HashMap<Uuid, Tier> = HashMap::new();
        for tier in Tier::all() {
            for memory in self.fetch_all(tier).await? {
                origin_tier.insert(memory.id, memory.tier);
                all_memories.push(memory);
            }
        }

        let config = self.config.snapshot();
        let (results, stats) = consolidator::consolidate(all_memories, now, &config);

        for result in results {
            match result {
                ConsolidationResult::Unchanged(_) => {}
                ConsolidationResult::Rejected(_) => {}
                ConsolidationResult::Merged(merged) => {
                    let tier = merged.memory.tier;
                    self.persist_in_tier(&merged.memory, tier).await?;
                    for old_id in &merged.superseded_ids {
                        self.gateway.record_tombstone(*old_id, merged.memory.id).await?;
                        if let Some(old_tier) = origin_tier.get(old_id) {
                            self.gateway.delete_by_id(*old_tier, *old_id).await?;
                            self.cache.invalidate_everywhere(old_id);
                        }
                    }
                }
            }
        }

        self.consolidation_count.fetch_add(1, Ordering::Relaxed);
        *self.last_consolidation_at.write().expect("lock poisoned") = now;
        info!(clusters = stats.clusters_built, merged = stats.members_merged, "consolidation pass complete");
        Ok(stats)
    }

    async fn run_evolution_pass(&self, now: DateTime<Utc>) -> Result<usize> {
        let config = self.config.snapshot();
        let mut evolved = 0;
        for tier in Tier::all() {
            for memory in self.fetch_all(tier).await? {
                let outcome = evolver::evolve(&memory, now, &config);
                if !outcome.changed {
                    continue;
                }
                let _guard = self.locks.lock_one(memory.id).await;
                let mut updated = memory.clone();
                updated.importance = outcome.importance;
                updated.tier = outcome.tier;
                updated.metadata.push_evolution_event(outcome.event.into_event(now));

                if outcome.tier != tier {
                    self.move_between_tiers(&updated, tier, outcome.tier).await?;
                } else {
                    self.persist_in_tier(&updated, tier).await?;
                }
                evolved += 1;
            }
        }
        Ok(evolved)
    }

    async fn run_tier_management_pass(&self, now: DateTime<Utc>) -> Result<usize> {
        let config = self.config.snapshot();
        let tau = config.consolidation.recency_decay_rate_secs;
        let max_access = config.consolidation.max_access_count;
        let mut transitioned: HashSet<Uuid> = HashSet::new();
        let mut count = 0;

        for tier in [Tier::Core, Tier::Active, Tier::Background] {
            for memory in self.fetch_all(tier).await? {
                if transitioned.contains(&memory.id) {
                    continue;
                }
                let current = current_importance_for(&memory, now, tau, max_access);
                let mut probe = memory.clone();
                probe.importance = current;

                if let Some(new_tier) = evaluate_transition(&probe, now, &config) {
                    let _guard = self.locks.lock_one(memory.id).await;
                    let mut moved = memory.clone();
                    moved.importance = current;
                    self.move_between_tiers(&moved, tier, new_tier).await?;
                    transitioned.insert(memory.id);
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn run_cleanup_pass(&self, now: DateTime<Utc>) -> Result<usize> {
        let config = self.config.snapshot();
        let mut deleted = 0;

        // Background-tier stale sweep, in bounded batches.
        loop {
            let batch: Vec<Memory> = self
                .fetch_all(Tier::Background)
                .await?
                .into_iter()
                .filter(|m| m.age_secs(now) > config.evolution.max_age_secs && m.importance < config.background.demotion_threshold)
                .take(config.general.cleanup_batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }
            for memory in &batch {
                let _guard = self.locks.lock_one(memory.id).await;
                self.gateway.delete_by_id(Tier::Background, memory.id).await?;
                self.cache.invalidate_everywhere(&memory.id);
                deleted += 1;
            }
        }

        // Over-capacity optimisation: drop the globally lowest-importance
        // members until the total fits `max_total_memories`.
        let mut all = Vec::new();
        for tier in Tier::all() {
            all.extend(self.fetch_all(tier).await?);
        }
        if all.len() > config.general.max_total_memories {
            all.sort_by(|a, b| a.importance.partial_cmp(&b.importance).unwrap_or(std::cmp::Ordering::Equal));
            let overflow = all.len() - config.general.max_total_memories;
            for memory in all.into_iter().take(overflow) {
                let _guard = self.locks.lock_one(memory.id).await;
                self.gateway.delete_by_id(memory.tier, memory.id).await?;
                self.cache.invalidate_everywhere(&memory.id);
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    async fn compute_stats(&self) -> Result<EngineStats> {
        let mut per_tier_count = HashMap::new();
        let mut total = 0usize;
        let mut importance_sum = 0.0;
        for tier in Tier::all() {
            let memories = self.fetch_all(tier).await?;
            total += memories.len();
            importance_sum += memories.iter().map(|m| m.importance).sum::<f64>();
            per_tier_count.insert(tier, memories.len());
        }
        Ok(EngineStats {
            total_memories: total,
            per_tier_count,
            average_importance: if total == 0 { 0.0 } else { importance_sum / total as f64 },
            consolidation_count: self.consolidation_count.load(Ordering::Relaxed),
        })
    }

    pub async fn get_stats(&self) -> Result<EngineStats> {
        self.compute_stats().await
    }
}
