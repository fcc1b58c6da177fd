//! Parallel-universe controller (C9): friendlier fork/merge UX atop C5

use std::sync::Arc;

use dashmap::DashMap;
use tracing::instrument;

use crate::clock::Clock;
use crate::error::{MemoryError, Result};
use crate::namespace::NamespaceManager;
use crate::storage::{Filter, StorageBackend};
use crate::types::{MemoryFragment, MergeReport};

/// Handle to a named fork of a base namespace.
#[derive(Debug, Clone)]
pub struct UniverseHandle {
    /// Caller-chosen identifier for this universe.
    pub universe_id: String,
    /// Project the universe was branched from.
    pub base_project_id: String,
    /// Human-friendly branch label.
    pub branch_name: String,
    /// The namespace this universe lives in: `{base_project_id}:{universe_id}`.
    pub namespace: String,
    /// Epoch ms when the universe was created.
    pub created_at: i64,
    /// Last-synced snapshot of the universe's fragments.
    pub fragments: Vec<MemoryFragment>,
}

/// Tracks the lifetime of namespace forks created for exploratory branches.
pub struct UniverseController {
    namespaces: Arc<NamespaceManager>,
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    universes: DashMap<String, UniverseHandle>,
}

impl UniverseController {
    /// Build a controller atop a shared [`NamespaceManager`] and backend.
    #[must_use]
    pub fn new(namespaces: Arc<NamespaceManager>, backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            namespaces,
            backend,
            clock,
            universes: DashMap::new(),
        }
    }

    /// Fork `{base_project_id}:main` into `{base_project_id}:{universe_id}`
    /// and capture the resulting fragment set.
    ///
    /// # Errors
    ///
    /// Propagates [`crate::namespace::NamespaceManager::fork`] errors.
    #[instrument(skip(self))]
    pub async fn create_universe(
        &self,
        universe_id: &str,
        base_project_id: &str,
        branch_name: &str,
    ) -> Result<UniverseHandle> {
        let source = format!("{base_project_id}:main");
        let namespace = format!("{base_project_id}:{universe_id}");

        self.namespaces.fork(&source, &namespace, false).await?;
        let fragments = self.backend.query(&Filter::for_namespace(&namespace)).await?;

        let handle = UniverseHandle {
            universe_id: universe_id.to_string(),
            base_project_id: base_project_id.to_string(),
            branch_name: branch_name.to_string(),
            namespace,
            created_at: self.clock.now_ms(),
            fragments,
        };

        self.universes.insert(universe_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Refresh a universe's captured fragment set by re-querying its namespace.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] if `universe_id` has no entry.
    pub async fn sync_universe(&self, universe_id: &str) -> Result<UniverseHandle> {
        let namespace = self
            .universes
            .get(universe_id)
            .map(|h| h.namespace.clone())
            .ok_or_else(|| MemoryError::NotFound(format!("universe {universe_id:?}")))?;

        let fragments = self.backend.query(&Filter::for_namespace(&namespace)).await?;

        let mut entry = self
            .universes
            .get_mut(universe_id)
            .ok_or_else(|| MemoryError::NotFound(format!("universe {universe_id:?}")))?;
        entry.fragments = fragments;
        Ok(entry.clone())
    }

    /// Merge the universe's namespace back into `{base_project_id}:main` via
    /// [`NamespaceManager::merge`], then remove the universe on success.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::NotFound`] if `universe_id` has no entry.
    pub async fn merge_universe_back(&self, universe_id: &str) -> Result<MergeReport> {
        let handle = self
            .universes
            .get(universe_id)
            .map(|h| h.clone())
            .ok_or_else(|| MemoryError::NotFound(format!("universe {universe_id:?}")))?;

        let target = format!("{}:main", handle.base_project_id);
        let report = self.namespaces.merge(&handle.namespace, &target).await?;
        self.universes.remove(universe_id);
        Ok(report)
    }

    /// List every tracked universe.
    #[must_use]
    pub fn list_universes(&self) -> Vec<UniverseHandle> {
        self.universes.iter().map(|e| e.value().clone()).collect()
    }

    /// Look up a single universe by id.
    #[must_use]
    pub fn get_universe(&self, universe_id: &str) -> Option<UniverseHandle> {
        self.universes.get(universe_id).map(|h| h.clone())
    }
}
