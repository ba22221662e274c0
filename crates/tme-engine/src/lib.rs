//! The Tiered Memory Engine: a self-curating, tiered memory store for
//! conversational agents. A [`service::MemoryService`] handles the
//! request-path API (`store`/`retrieve`/`update`/`delete`/
//! `transition_tier`); a [`lifecycle::LifecycleManager`] runs the
//! background orchestration pass (consolidation, evolution, re-tiering,
//! cleanup) that keeps the store curated over time.

pub mod cache;
pub mod codec;
pub mod consolidator;
pub mod evolver;
pub mod gateway;
pub mod lifecycle;
pub mod locking;
pub mod policy;
pub mod scorer;
pub mod service;
pub mod traits;
pub mod types;

pub use cache::{CacheStats, TierCacheSet};
pub use codec::{CodecStatsSnapshot, CompressionCodec, ContentPayload};
pub use consolidator::{ConsolidationResult, ConsolidationStats, MergedMemory};
pub use evolver::{evolve, EvolutionEventSummary, EvolutionOutcome};
pub use gateway::{InMemoryGateway, Metric, QueryFilter, StoredRecord, Tombstone, VectorGateway};
pub use lifecycle::{CycleReport, EngineStats, LifecycleManager};
pub use locking::{IdLockGuard, IdLockMap};
pub use policy::{evaluate_transition, should_demote, should_promote};
pub use scorer::{access_frequency, current_importance, current_importance_for, ingestion_importance, recency};
pub use service::{MemoryService, Query};
pub use traits::{ChatLogEntry, ChatLogStore, Embedder, Generator, UserProfile, UserProfileStore};
pub use types::{EvolutionEvent, Memory, MemoryDraft, Metadata, Scalar};
