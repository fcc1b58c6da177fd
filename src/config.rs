//! Memory engine configuration
//!
//! Enumerates every recognized option from the engine's external interface,
//! mirroring how comparable memory subsystems split a `for_testing` profile
//! (small, deterministic, no external embedder required) from a
//! `for_production` profile (real embedder injected, same defaults otherwise).

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// In-process `HashMap`-backed store. No persistence across restarts.
    Memory,
    /// Placeholder for a future embedded-database backend.
    SqliteLike,
    /// Placeholder for a future network-attached backend.
    NetworkLike,
}

impl Default for StorageType {
    fn default() -> Self {
        Self::Memory
    }
}

/// Composite score weights. Must sum to 1.0.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    /// Weight on cosine similarity.
    pub similarity: f64,
    /// Weight on recency.
    pub recency: f64,
    /// Weight on access frequency.
    pub frequency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: 0.5,
            recency: 0.3,
            frequency: 0.2,
        }
    }
}

/// Full configuration surface for a [`crate::engine::MemoryEngine`].
#[derive(Debug, Clone)]
pub struct MemoryEngineConfig {
    /// Backend selector.
    pub storage_type: StorageType,
    /// Backend-specific location; unused by the in-memory backend.
    pub storage_path: Option<String>,
    /// Embedding vector dimension `D`.
    pub embedding_dimension: usize,
    /// Similarity floor `τ` for retrieval.
    pub similarity_threshold: f64,
    /// Background consolidation period.
    pub consolidation_interval_ms: u64,
    /// Dedup cluster threshold `τ_dedup`.
    pub dedup_similarity_threshold: f64,
    /// Forgetting-curve decay rate `D`.
    pub decay_rate: f64,
    /// Relevance floor below which a fragment archives.
    pub archive_threshold: f64,
    /// Relevance floor below which an archived fragment becomes eligible for
    /// hard deletion.
    pub hard_delete_floor: f64,
    /// Minimum age (days since last access) before archival is considered.
    pub min_archive_age_days: f64,
    /// Minimum age (days since creation) before hard deletion is considered.
    pub min_delete_age_days: f64,
    /// Default retrieval fanout.
    pub default_top_k: usize,
    /// Default retrieval token budget.
    pub token_budget: usize,
    /// Composite score weights.
    pub weights: ScoreWeights,
    /// Project and/or agent id substituted when a caller's [`crate::fragment::FragmentInput`]
    /// leaves either empty, so `store` never has to reject input purely for a
    /// missing identifier.
    pub default_namespace: String,
    /// If false, the namespace filter is ignored (single shared namespace).
    pub enable_namespace_isolation: bool,
    /// Period for the background health probe.
    pub health_check_interval_ms: u64,
    /// Maximum number of active namespaces.
    pub max_namespaces: usize,
}

impl Default for MemoryEngineConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::default(),
            storage_path: None,
            embedding_dimension: 384,
            similarity_threshold: 0.7,
            consolidation_interval_ms: 3_600_000,
            dedup_similarity_threshold: 0.95,
            decay_rate: 0.01,
            archive_threshold: 0.1,
            hard_delete_floor: 0.01,
            min_archive_age_days: 7.0,
            min_delete_age_days: 30.0,
            default_top_k: 10,
            token_budget: 2000,
            weights: ScoreWeights::default(),
            default_namespace: "default".to_string(),
            enable_namespace_isolation: true,
            health_check_interval_ms: 60_000,
            max_namespaces: 100,
        }
    }
}

impl MemoryEngineConfig {
    /// Small, deterministic configuration for unit and integration tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            embedding_dimension: 8,
            consolidation_interval_ms: 60_000,
            ..Self::default()
        }
    }

    /// Production configuration. Identical defaults to [`Self::default`]; kept
    /// as a distinct constructor so callers have one obvious name to reach for,
    /// matching the testing/production split used elsewhere in this codebase's
    /// ancestry.
    #[must_use]
    pub fn for_production() -> Self {
        Self::default()
    }
}
