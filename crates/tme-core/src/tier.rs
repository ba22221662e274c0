//! Tier definitions.
//!
//! Three tiers, ordered by retention/search-quality: `background < active <
//! core`. Ordering matters — promotion and demotion move exactly one step
//! along this order per lifecycle evaluation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Background,
    Active,
    Core,
}

impl Tier {
    /// The logical vector-store collection name for this tier.
    pub fn collection_name(&self) -> &'static str {
        match self {
            Tier::Core => "memory_core",
            Tier::Active => "memory_active",
            Tier::Background => "memory_background",
        }
    }

    /// The straightforward importance-bucket candidate tier, used at
    /// ingestion and as the consolidation tie-break.
    pub fn candidate_for_importance(importance: f64) -> Tier {
        if importance >= 0.8 {
            Tier::Core
        } else if importance >= 0.4 {
            Tier::Active
        } else {
            Tier::Background
        }
    }

    /// One tier up, or `None` if already `Core`.
    pub fn promoted(&self) -> Option<Tier> {
        match self {
            Tier::Background => Some(Tier::Active),
            Tier::Active => Some(Tier::Core),
            Tier::Core => None,
        }
    }

    /// One tier down, or `None` if already `Background`.
    pub fn demoted(&self) -> Option<Tier> {
        match self {
            Tier::Core => Some(Tier::Active),
            Tier::Active => Some(Tier::Background),
            Tier::Background => None,
        }
    }

    pub fn all() -> [Tier; 3] {
        [Tier::Core, Tier::Active, Tier::Background]
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Core => write!(f, "core"),
            Tier::Active => write!(f, "active"),
            Tier::Background => write!(f, "background"),
        }
    }
}
