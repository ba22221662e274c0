//! Narrow async interfaces the engine consumes but does not implement.
//! Only `Embedder` has a call site inside this crate (`MemoryService::
//! retrieve`'s text-query path); the rest are declared so the engine's
//! public surface type-checks against a caller that wires them in, and are
//! otherwise out of scope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tme_core::Result;

/// Turns query text into a vector in the engine's configured dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// A generative model, consumed by callers built on top of the engine, not
/// by the engine itself.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub learning_style: Option<String>,
    pub difficulty_preference: Option<String>,
    pub interests: Vec<String>,
}

#[async_trait]
pub trait UserProfileStore: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<UserProfile>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLogEntry {
    pub owner_id: String,
    pub prompt: String,
    pub response: String,
}

#[async_trait]
pub trait ChatLogStore: Send + Sync {
    async fn append_chat(&self, entry: ChatLogEntry) -> Result<()>;
}
