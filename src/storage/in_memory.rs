//! Reference in-memory storage backend
//!
//! A single `RwLock<HashMap>` guarded store. This is the oracle backend:
//! round-trip fidelity, filter semantics, and ranking are all defined in
//! terms of what this implementation does.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::ScoreWeights;
use crate::error::Result;
use crate::index::{composite_score, cosine_similarity, frequency_score, recency_score, sort_scored};
use crate::types::{Id, MemoryFragment, ScoredFragment};

use super::{BackendStats, Filter, StorageBackend};

/// In-memory reference implementation of [`StorageBackend`].
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    fragments: RwLock<HashMap<Id, MemoryFragment>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn write(&self, fragment: MemoryFragment) -> Result<()> {
        self.fragments.write().insert(fragment.id.clone(), fragment);
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Option<MemoryFragment>> {
        Ok(self.fragments.read().get(id).cloned())
    }

    async fn bulk_write(&self, fragments: Vec<MemoryFragment>) -> Result<()> {
        let mut guard = self.fragments.write();
        for fragment in fragments {
            guard.insert(fragment.id.clone(), fragment);
        }
        Ok(())
    }

    async fn bulk_read(&self, ids: &[Id]) -> Result<Vec<MemoryFragment>> {
        let guard = self.fragments.read();
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.fragments.write().remove(id).is_some())
    }

    async fn touch_access(&self, id: &str, now_ms: i64) -> Result<bool> {
        let mut guard = self.fragments.write();
        match guard.get_mut(id) {
            Some(fragment) => {
                fragment.access_count += 1;
                fragment.last_accessed_at = now_ms;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<MemoryFragment>> {
        Ok(self
            .fragments
            .read()
            .values()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect())
    }

    async fn count(&self, filter: Option<&Filter>) -> Result<u64> {
        let guard = self.fragments.read();
        let count = match filter {
            Some(f) => guard.values().filter(|frag| f.matches(frag)).count(),
            None => guard.len(),
        };
        Ok(count as u64)
    }

    async fn search_by_vector(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
        similarity_floor: f64,
        weights: ScoreWeights,
        now_ms: i64,
    ) -> Result<Vec<ScoredFragment>> {
        let include_archived = filter.and_then(|f| f.archived) == Some(true);
        let candidates: Vec<MemoryFragment> = {
            let guard = self.fragments.read();
            guard
                .values()
                .filter(|f| !f.is_expired(now_ms))
                .filter(|f| include_archived || !f.is_archived)
                .filter(|f| filter.map_or(true, |flt| flt.matches(f)))
                .cloned()
                .collect()
        };

        let mut scored = Vec::with_capacity(candidates.len());
        for fragment in candidates {
            let similarity = cosine_similarity(embedding, &fragment.embedding)?;
            if similarity < similarity_floor {
                continue;
            }
            let recency = recency_score(&fragment, now_ms);
            let frequency = frequency_score(&fragment);
            let composite = composite_score(similarity, recency, frequency, weights);
            scored.push(ScoredFragment {
                fragment,
                composite,
                similarity,
                recency,
                frequency,
            });
        }

        sort_scored(&mut scored);
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn export_all(&self) -> Result<Vec<MemoryFragment>> {
        Ok(self.fragments.read().values().cloned().collect())
    }

    async fn import_all(&self, fragments: Vec<MemoryFragment>) -> Result<u64> {
        let mut guard = self.fragments.write();
        let count = fragments.len() as u64;
        for fragment in fragments {
            guard.insert(fragment.id.clone(), fragment);
        }
        Ok(count)
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn get_stats(&self) -> Result<BackendStats> {
        let guard = self.fragments.read();
        let mut namespaces = std::collections::HashSet::new();
        let mut archived = 0;
        let mut pinned = 0;
        for f in guard.values() {
            namespaces.insert(f.namespace.clone());
            if f.is_archived {
                archived += 1;
            }
            if f.is_pinned {
                pinned += 1;
            }
        }
        Ok(BackendStats {
            total_fragments: guard.len() as u64,
            archived_fragments: archived,
            pinned_fragments: pinned,
            namespace_count: namespaces.len() as u64,
        })
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
