//! Namespace manager (C5): fork, merge, and cross-namespace retrieval
//!
//! The namespace registry (active namespace -> fragment count) is owned by one
//! [`crate::engine::MemoryEngine`] instance, created on construction and
//! dropped with it, never a process-wide singleton.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::instrument;

use crate::clock::Clock;
use crate::config::ScoreWeights;
use crate::error::{MemoryError, Result};
use crate::fragment::generate_id;
use crate::index::{cosine_similarity, sort_scored};
use crate::storage::{Filter, StorageBackend};
use crate::types::{Id, MemoryFragment, MergeReport, ScoredFragment, SkipReason};

/// Split `"<project>:<agent>"` into its two components.
///
/// # Errors
///
/// Returns [`MemoryError::InvalidInput`] if `namespace` has no `:` separator.
pub fn split_namespace(namespace: &str) -> Result<(String, String)> {
    namespace
        .split_once(':')
        .map(|(p, a)| (p.to_string(), a.to_string()))
        .ok_or_else(|| MemoryError::InvalidInput(format!("malformed namespace: {namespace:?}")))
}

/// Coordinates fork/merge/cross-namespace retrieval over a shared backend.
pub struct NamespaceManager {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    registry: DashMap<String, u64>,
    max_namespaces: usize,
    dedup_similarity_threshold: f64,
}

impl NamespaceManager {
    /// Build a manager over `backend`. `max_namespaces` bounds the number of
    /// distinct active namespaces; `dedup_similarity_threshold` is the `τ_dedup`
    /// used to detect merge conflicts.
    #[must_use]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        max_namespaces: usize,
        dedup_similarity_threshold: f64,
    ) -> Self {
        Self {
            backend,
            clock,
            registry: DashMap::new(),
            max_namespaces,
            dedup_similarity_threshold,
        }
    }

    /// Register that `namespace` has at least one fragment, for the active
    /// namespace count enforced by [`Self::fork`]. Idempotent.
    pub fn touch(&self, namespace: &str) {
        *self.registry.entry(namespace.to_string()).or_insert(0) += 1;
    }

    /// Snapshot of namespaces this manager has observed as active.
    #[must_use]
    pub fn known_namespaces(&self) -> Vec<String> {
        self.registry.iter().map(|e| e.key().clone()).collect()
    }

    /// Copy every fragment in `source` into `target`, rewriting namespace
    /// fields and assigning fresh ids.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Conflict`] if `target` is non-empty and
    /// `overwrite` is false, or [`MemoryError::LimitExceeded`] if this would
    /// exceed the configured namespace cap.
    #[instrument(skip(self))]
    pub async fn fork(&self, source: &str, target: &str, overwrite: bool) -> Result<u64> {
        let existing = self.backend.count(Some(&Filter::for_namespace(target))).await?;
        if existing > 0 && !overwrite {
            return Err(MemoryError::Conflict(format!("namespace {target:?} already exists")));
        }
        if !self.registry.contains_key(target) && self.registry.len() >= self.max_namespaces {
            return Err(MemoryError::LimitExceeded(format!(
                "namespace limit of {} reached",
                self.max_namespaces
            )));
        }

        let (project, agent) = split_namespace(target)?;
        let source_fragments = self.backend.query(&Filter::for_namespace(source)).await?;

        let now = self.clock.now_ms();
        let forked: Vec<MemoryFragment> = source_fragments
            .into_iter()
            .map(|mut f| {
                f.id = generate_id();
                f.namespace = target.to_string();
                f.project_id = project.clone();
                f.agent_id = agent.clone();
                f.updated_at = now;
                f
            })
            .collect();

        let count = forked.len() as u64;
        self.backend.bulk_write(forked).await?;
        self.registry.insert(target.to_string(), count);
        Ok(count)
    }

    /// Attempt to insert every `source` fragment into `target`.
    ///
    /// A source fragment whose content collides (cosine `>= τ_dedup`) with an
    /// existing target fragment is folded into it (access count summed, tags
    /// unioned, confidence and `last_accessed_at` maxed) rather than inserted
    /// again. Re-running this after a crash detects the already-merged
    /// fragments via the same similarity check, so it never creates
    /// duplicate fragments in `target`.
    #[instrument(skip(self))]
    pub async fn merge(&self, source: &str, target: &str) -> Result<MergeReport> {
        let (project, agent) = split_namespace(target)?;
        let source_fragments = self.backend.query(&Filter::for_namespace(source)).await?;
        let mut target_fragments = self.backend.query(&Filter::for_namespace(target)).await?;

        let mut report = MergeReport {
            source: source.to_string(),
            target: target.to_string(),
            merged_count: 0,
            skipped_count: 0,
            conflicts: Vec::new(),
        };

        for fragment in source_fragments {
            let conflict = target_fragments.iter().position(|t| {
                cosine_similarity(&fragment.embedding, &t.embedding)
                    .map(|sim| sim >= self.dedup_similarity_threshold)
                    .unwrap_or(false)
            });

            if let Some(idx) = conflict {
                let existing = &mut target_fragments[idx];
                existing.access_count += fragment.access_count;
                existing.tags.extend(fragment.tags.iter().cloned());
                existing.confidence = existing.confidence.max(fragment.confidence);
                existing.last_accessed_at = existing.last_accessed_at.max(fragment.last_accessed_at);
                self.backend.write(existing.clone()).await?;
                report.skipped_count += 1;
                report
                    .conflicts
                    .push((fragment.id.clone(), SkipReason::MergedIntoExisting(existing.id.clone())));
            } else {
                let mut moved = fragment;
                moved.namespace = target.to_string();
                moved.project_id = project.clone();
                moved.agent_id = agent.clone();
                self.backend.write(moved.clone()).await?;
                target_fragments.push(moved);
                report.merged_count += 1;
            }
        }

        self.touch(target);
        Ok(report)
    }

    /// Fan retrieval out across `{project}:{agent}` for every `agent_ids`
    /// entry, merge results by fragment id, and sort by composite score
    /// descending.
    ///
    /// When `project` is `None`, every project this manager has observed an
    /// active namespace for is swept for each of `agent_ids`, not just one.
    #[allow(clippy::too_many_arguments)]
    pub async fn cross_agent_retrieve(
        &self,
        embedding: &[f32],
        agent_ids: &[String],
        project: Option<&str>,
        top_k: usize,
        similarity_floor: f64,
        weights: ScoreWeights,
        now_ms: i64,
    ) -> Result<Vec<ScoredFragment>> {
        let namespaces = self.candidate_namespaces(agent_ids, project);
        let mut by_id: std::collections::HashMap<Id, ScoredFragment> = std::collections::HashMap::new();

        for namespace in namespaces {
            let filter = Filter::for_namespace(&namespace);
            let results = self
                .backend
                .search_by_vector(embedding, top_k, Some(&filter), similarity_floor, weights, now_ms)
                .await?;
            for scored in results {
                by_id
                    .entry(scored.fragment.id.clone())
                    .and_modify(|existing| {
                        if scored.composite > existing.composite {
                            *existing = scored.clone();
                        }
                    })
                    .or_insert(scored);
            }
        }

        let mut merged: Vec<ScoredFragment> = by_id.into_values().collect();
        sort_scored(&mut merged);
        merged.truncate(top_k);
        Ok(merged)
    }

    /// Resolve the `{project}:{agent}` namespaces to sweep for
    /// [`Self::cross_agent_retrieve`]. With a project pinned, one namespace
    /// per agent id; without one, every known active namespace whose agent
    /// component is in `agent_ids`, across every project this manager has seen.
    fn candidate_namespaces(&self, agent_ids: &[String], project: Option<&str>) -> Vec<String> {
        match project {
            Some(project) => agent_ids.iter().map(|agent_id| format!("{project}:{agent_id}")).collect(),
            None => self
                .registry
                .iter()
                .filter_map(|entry| {
                    let namespace = entry.key();
                    let (_, agent) = split_namespace(namespace).ok()?;
                    agent_ids.contains(&agent).then(|| namespace.clone())
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::fragment::{materialize, FragmentInput};
    use crate::storage::InMemoryBackend;

    fn fragment(project: &str, agent: &str, embedding: Vec<f32>, clock: &FixedClock) -> MemoryFragment {
        materialize(
            FragmentInput {
                content: "hi".into(),
                project_id: project.into(),
                agent_id: agent.into(),
                ..Default::default()
            },
            embedding,
            4,
            clock,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn fork_copies_with_fresh_ids() {
        let clock = Arc::new(FixedClock::new(0));
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let manager = NamespaceManager::new(backend.clone(), clock.clone(), 100, 0.95);

        let original = fragment("p1", "main", vec![0.1, 0.2, 0.3, 0.4], &clock);
        let original_id = original.id.clone();
        backend.write(original).await.unwrap();

        let count = manager.fork("p1:main", "p1:branch", false).await.unwrap();
        assert_eq!(count, 1);

        let branch = backend.query(&Filter::for_namespace("p1:branch")).await.unwrap();
        assert_eq!(branch.len(), 1);
        assert_ne!(branch[0].id, original_id);
        assert_eq!(branch[0].namespace, "p1:branch");
        assert_eq!(branch[0].project_id, "p1");
        assert_eq!(branch[0].agent_id, "branch");
    }

    #[tokio::test]
    async fn fork_rejects_existing_target_without_overwrite() {
        let clock = Arc::new(FixedClock::new(0));
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let manager = NamespaceManager::new(backend.clone(), clock.clone(), 100, 0.95);

        backend.write(fragment("p1", "main", vec![0.0; 4], &clock)).await.unwrap();
        backend.write(fragment("p1", "branch", vec![0.0; 4], &clock)).await.unwrap();

        let err = manager.fork("p1:main", "p1:branch", false).await.unwrap_err();
        assert!(matches!(err, MemoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn merge_is_idempotent() {
        let clock = Arc::new(FixedClock::new(0));
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let manager = NamespaceManager::new(backend.clone(), clock.clone(), 100, 0.95);

        backend.write(fragment("p", "src", vec![0.1, 0.2, 0.3, 0.4], &clock)).await.unwrap();

        manager.merge("p:src", "p:main").await.unwrap();
        let after_first = backend.query(&Filter::for_namespace("p:main")).await.unwrap().len();

        manager.merge("p:src", "p:main").await.unwrap();
        let after_second = backend.query(&Filter::for_namespace("p:main")).await.unwrap().len();

        assert_eq!(after_first, 1);
        assert_eq!(after_second, 1);
    }

    #[tokio::test]
    async fn namespace_isolation_hides_other_agents() {
        let clock = Arc::new(FixedClock::new(0));
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());

        backend.write(fragment("a", "x", vec![0.0; 4], &clock)).await.unwrap();

        let y_view = backend.query(&Filter::for_namespace("a:y")).await.unwrap();
        assert!(y_view.is_empty());
    }

    #[tokio::test]
    async fn cross_agent_retrieve_without_project_sweeps_every_known_namespace() {
        let clock = Arc::new(FixedClock::new(0));
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let manager = NamespaceManager::new(backend.clone(), clock.clone(), 100, 0.95);

        let embedding = vec![1.0, 0.0, 0.0, 0.0];
        backend.write(fragment("proj-a", "alice", embedding.clone(), &clock)).await.unwrap();
        backend.write(fragment("proj-b", "alice", embedding.clone(), &clock)).await.unwrap();
        backend.write(fragment("proj-a", "bob", embedding.clone(), &clock)).await.unwrap();
        manager.touch("proj-a:alice");
        manager.touch("proj-b:alice");
        manager.touch("proj-a:bob");

        let results = manager
            .cross_agent_retrieve(&embedding, &["alice".to_string()], None, 10, 0.0, ScoreWeights::default(), 0)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.fragment.agent_id == "alice"));
    }
}
