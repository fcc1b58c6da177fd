//! Storage backend (C2): the capability set the engine consumes
//!
//! `StorageBackend` is the abstract contract; [`in_memory::InMemoryBackend`] is
//! the reference implementation and the oracle against which any alternative
//! backend (sqlite-like, network-like) would be tested.

pub mod in_memory;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Id, MemoryFragment, ScoredFragment};

pub use in_memory::InMemoryBackend;

/// Whether a tag filter requires all listed tags or just one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagMatch {
    /// Fragment must carry every listed tag.
    All,
    /// Fragment must carry at least one listed tag.
    Any,
}

/// Conjunctive filter predicate set.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// Restrict to this namespace.
    pub namespace: Option<String>,
    /// Restrict to this agent id.
    pub agent_id: Option<String>,
    /// Restrict to this project id.
    pub project_id: Option<String>,
    /// Restrict to this fragment type.
    pub fragment_type: Option<crate::types::FragmentType>,
    /// Inclusive relevance range.
    pub relevance_range: Option<(f64, f64)>,
    /// Restrict by archived status.
    pub archived: Option<bool>,
    /// Restrict by pinned status.
    pub pinned: Option<bool>,
    /// Inclusive `created_at` range, epoch ms.
    pub created_range: Option<(i64, i64)>,
    /// Tag set plus match semantics.
    pub tags: Option<(HashSet<String>, TagMatch)>,
}

impl Filter {
    /// A filter scoped to exactly one namespace.
    #[must_use]
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    /// Whether `fragment` satisfies every predicate set on this filter.
    #[must_use]
    pub fn matches(&self, fragment: &MemoryFragment) -> bool {
        if let Some(ns) = &self.namespace {
            if &fragment.namespace != ns {
                return false;
            }
        }
        if let Some(agent) = &self.agent_id {
            if &fragment.agent_id != agent {
                return false;
            }
        }
        if let Some(project) = &self.project_id {
            if &fragment.project_id != project {
                return false;
            }
        }
        if let Some(t) = self.fragment_type {
            if fragment.fragment_type != t {
                return false;
            }
        }
        if let Some((lo, hi)) = self.relevance_range {
            if fragment.relevance < lo || fragment.relevance > hi {
                return false;
            }
        }
        if let Some(archived) = self.archived {
            if fragment.is_archived != archived {
                return false;
            }
        }
        if let Some(pinned) = self.pinned {
            if fragment.is_pinned != pinned {
                return false;
            }
        }
        if let Some((lo, hi)) = self.created_range {
            if fragment.created_at < lo || fragment.created_at > hi {
                return false;
            }
        }
        if let Some((tags, mode)) = &self.tags {
            let ok = match mode {
                TagMatch::All => tags.is_subset(&fragment.tags),
                TagMatch::Any => tags.iter().any(|t| fragment.tags.contains(t)),
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// Aggregate backend statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendStats {
    /// Total fragments currently stored.
    pub total_fragments: u64,
    /// Fragments currently archived.
    pub archived_fragments: u64,
    /// Fragments currently pinned.
    pub pinned_fragments: u64,
    /// Distinct namespaces observed.
    pub namespace_count: u64,
}

/// The abstract storage contract the engine consumes.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Idempotent on `id`; last write wins. Visible to subsequent reads
    /// immediately after this returns.
    async fn write(&self, fragment: MemoryFragment) -> Result<()>;

    /// Side-effect-free point lookup.
    async fn read(&self, id: &str) -> Result<Option<MemoryFragment>>;

    /// Writes fragments in supplied order; per-fragment atomicity is
    /// guaranteed, all-or-nothing across the batch is not.
    async fn bulk_write(&self, fragments: Vec<MemoryFragment>) -> Result<()>;

    /// Returns only the fragments that were found; order is unspecified.
    async fn bulk_read(&self, ids: &[Id]) -> Result<Vec<MemoryFragment>>;

    /// Returns true iff a fragment was actually removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Atomically increment `access_count` by 1 and advance `last_accessed_at`
    /// to `now_ms`, as a single read-modify-write under the backend's own
    /// locking. Returns `false` if no fragment with `id` exists.
    ///
    /// This exists as its own operation (rather than a `read` + `write` pair
    /// in the caller) so concurrent retrievals of the same fragment cannot
    /// lose an update.
    async fn touch_access(&self, id: &str, now_ms: i64) -> Result<bool>;

    /// Apply `filter` conjunctively over all stored fragments.
    async fn query(&self, filter: &Filter) -> Result<Vec<MemoryFragment>>;

    /// Count fragments matching an optional filter.
    async fn count(&self, filter: Option<&Filter>) -> Result<u64>;

    /// Globally highest-scoring `min(top_k, matching)` fragments under the
    /// composite score, restricted to `filter` and the similarity floor.
    async fn search_by_vector(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
        similarity_floor: f64,
        weights: crate::config::ScoreWeights,
        now_ms: i64,
    ) -> Result<Vec<ScoredFragment>>;

    /// Export every stored fragment, including archived ones.
    async fn export_all(&self) -> Result<Vec<MemoryFragment>>;

    /// Import fragments, returning the count actually written.
    async fn import_all(&self, fragments: Vec<MemoryFragment>) -> Result<u64>;

    /// Whether the backend is currently reachable.
    async fn is_available(&self) -> bool;

    /// Aggregate statistics.
    async fn get_stats(&self) -> Result<BackendStats>;

    /// Run any one-time setup (schema creation, connection warmup).
    async fn initialize(&self) -> Result<()>;

    /// Flush and release any held resources.
    async fn close(&self) -> Result<()>;
}
