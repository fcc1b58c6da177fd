//! The four-phase consolidation pipeline
//!
//! Phases run strictly in order (dedup → decay → archive → hard delete),
//! scoped per namespace so a run never mixes fragments across the isolation
//! boundary C5 enforces elsewhere. Every phase yields to the scheduler every
//! `YIELD_EVERY` fragments so a pending reader never observes more than a
//! bounded amount of half-applied work at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::clock::Clock;
use crate::config::MemoryEngineConfig;
use crate::error::Result;
use crate::index::cosine_similarity;
use crate::storage::StorageBackend;
use crate::types::{ConsolidationReport, DedupCluster, MemoryFragment};

use super::ConsolidationEngine;

/// Yield to the async scheduler after processing this many fragments within
/// a single phase.
const YIELD_EVERY: usize = 100;

/// Cooperative cancellation flag shared between a caller and an in-flight
/// consolidation run.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is never cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next phase or chunk boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deterministic four-phase consolidation pipeline over a [`StorageBackend`].
pub struct ConsolidationPipeline {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    config: MemoryEngineConfig,
}

impl ConsolidationPipeline {
    /// Build a pipeline over `backend`, using `config`'s tuning parameters.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>, config: MemoryEngineConfig) -> Self {
        Self { backend, clock, config }
    }

    /// Run consolidation once, with the ability to be cancelled between
    /// phases or chunks. [`ConsolidationEngine::consolidate`] calls this with
    /// a token that is never cancelled.
    #[instrument(skip(self, cancel))]
    pub async fn run(&self, cancel: &CancelToken) -> Result<ConsolidationReport> {
        let start = Instant::now();
        let now_ms = self.clock.now_ms();
        let mut report = ConsolidationReport {
            timestamp: now_ms,
            ..ConsolidationReport::default()
        };

        let all = self.backend.export_all().await?;
        let mut by_namespace: HashMap<String, Vec<MemoryFragment>> = HashMap::new();
        for fragment in all {
            by_namespace.entry(fragment.namespace.clone()).or_default().push(fragment);
        }

        for (namespace, fragments) in by_namespace {
            if cancel.is_cancelled() {
                report.partial = true;
                break;
            }
            if let Err(err) = self.consolidate_namespace(namespace, fragments, now_ms, &mut report, cancel).await {
                report.errors.push(err.to_string());
            }
            if cancel.is_cancelled() {
                report.partial = true;
                break;
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }

    async fn consolidate_namespace(
        &self,
        namespace: String,
        fragments: Vec<MemoryFragment>,
        now_ms: i64,
        report: &mut ConsolidationReport,
        cancel: &CancelToken,
    ) -> Result<()> {
        debug!(namespace = %namespace, count = fragments.len(), "consolidating namespace");

        // Phase 1: deduplication.
        let (survivors, clusters) = self.dedup_phase(fragments);
        for cluster in &clusters {
            report.merged += cluster.merged.len() as u64;
            for id in &cluster.merged {
                self.backend.delete(id).await?;
            }
        }
        report.compressed += clusters.iter().filter(|c| !c.merged.is_empty()).count() as u64;
        report.clusters.extend(clusters);

        if cancel.is_cancelled() {
            return Ok(());
        }

        // Phase 2: forgetting-curve decay.
        let mut fragments = survivors;
        self.decay_phase(&mut fragments, now_ms, report, cancel).await?;

        if cancel.is_cancelled() {
            self.persist(&fragments).await?;
            return Ok(());
        }

        // Phase 3: archival.
        self.archive_phase(&mut fragments, now_ms, report, cancel).await?;

        if cancel.is_cancelled() {
            self.persist(&fragments).await?;
            return Ok(());
        }

        // Phase 4: hard delete.
        let mut survivors = Vec::with_capacity(fragments.len());
        for (i, fragment) in fragments.into_iter().enumerate() {
            if i % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
            if cancel.is_cancelled() {
                survivors.push(fragment);
                continue;
            }
            if self.eligible_for_hard_delete(&fragment, now_ms) {
                self.backend.delete(&fragment.id).await?;
                report.deleted += 1;
            } else {
                survivors.push(fragment);
            }
        }

        self.persist(&survivors).await
    }

    async fn persist(&self, fragments: &[MemoryFragment]) -> Result<()> {
        for fragment in fragments {
            self.backend.write(fragment.clone()).await?;
        }
        Ok(())
    }

    /// Phase 1. Greedy agglomeration: walk fragments in order, attach each to
    /// the first existing cluster whose seed is within `tau_dedup`, else seed
    /// a new cluster. Within a cluster of size >= 2, keep the fragment with
    /// max relevance (ties: higher access_count, then earlier created_at);
    /// merge tags as union, sum access_count, max last_accessed_at, max
    /// confidence. Pinned fragments are never merged away or used to absorb
    /// others.
    fn dedup_phase(&self, fragments: Vec<MemoryFragment>) -> (Vec<MemoryFragment>, Vec<DedupCluster>) {
        let tau = self.config.dedup_similarity_threshold;
        let mut pinned = Vec::new();
        let mut candidates = Vec::new();
        for fragment in fragments {
            if fragment.is_pinned {
                pinned.push(fragment);
            } else {
                candidates.push(fragment);
            }
        }

        let mut clusters: Vec<Vec<MemoryFragment>> = Vec::new();
        'outer: for fragment in candidates {
            for cluster in &mut clusters {
                let seed = &cluster[0];
                if let Ok(sim) = cosine_similarity(&seed.embedding, &fragment.embedding) {
                    if sim >= tau {
                        cluster.push(fragment);
                        continue 'outer;
                    }
                }
            }
            clusters.push(vec![fragment]);
        }

        let mut survivors = pinned;
        let mut reports = Vec::new();
        for cluster in clusters {
            if cluster.len() == 1 {
                survivors.push(cluster.into_iter().next().unwrap());
                continue;
            }
            let (winner, merged_ids) = merge_cluster(cluster);
            reports.push(DedupCluster {
                survivor: winner.id.clone(),
                merged: merged_ids,
            });
            survivors.push(winner);
        }

        (survivors, reports)
    }

    /// Phase 2. `relevance' = relevance * exp(-decay_rate * age_days_since_access)`,
    /// clamped to `[0, 1]`. Timestamps are not bumped.
    async fn decay_phase(
        &self,
        fragments: &mut [MemoryFragment],
        now_ms: i64,
        report: &mut ConsolidationReport,
        cancel: &CancelToken,
    ) -> Result<()> {
        for (i, fragment) in fragments.iter_mut().enumerate() {
            if i % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
            if cancel.is_cancelled() {
                break;
            }
            if fragment.is_pinned {
                continue;
            }
            let age_days = fragment.age_days_since_access(now_ms);
            let decayed = fragment.relevance * (-self.config.decay_rate * age_days).exp();
            fragment.relevance = decayed.clamp(0.0, 1.0);
            report.decayed += 1;
        }
        Ok(())
    }

    /// Phase 3. Archive fragments whose relevance has fallen below
    /// `archive_threshold` and which have been idle longer than
    /// `min_archive_age_days`.
    async fn archive_phase(
        &self,
        fragments: &mut [MemoryFragment],
        now_ms: i64,
        report: &mut ConsolidationReport,
        cancel: &CancelToken,
    ) -> Result<()> {
        for (i, fragment) in fragments.iter_mut().enumerate() {
            if i % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
            if cancel.is_cancelled() {
                break;
            }
            if fragment.is_pinned || fragment.is_archived {
                continue;
            }
            let idle_days = fragment.age_days_since_access(now_ms);
            if fragment.relevance < self.config.archive_threshold && idle_days > self.config.min_archive_age_days {
                fragment.is_archived = true;
                report.archived += 1;
            }
        }
        Ok(())
    }

    fn eligible_for_hard_delete(&self, fragment: &MemoryFragment, now_ms: i64) -> bool {
        if fragment.is_pinned || !fragment.is_archived {
            return false;
        }
        let age_days = fragment.age_days_since_creation(now_ms);
        fragment.relevance < self.config.hard_delete_floor && age_days > self.config.min_delete_age_days
    }
}

/// Merge a cluster of size >= 2 into a single surviving fragment.
fn merge_cluster(cluster: Vec<MemoryFragment>) -> (MemoryFragment, Vec<String>) {
    let winner_idx = cluster
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.relevance
                .partial_cmp(&b.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.access_count.cmp(&b.access_count))
                .then_with(|| b.created_at.cmp(&a.created_at)) // earlier created_at wins
        })
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut cluster = cluster;
    let mut winner = cluster.remove(winner_idx);
    let merged_ids: Vec<String> = cluster.iter().map(|f| f.id.clone()).collect();

    let mut access_sum = winner.access_count;
    for other in &cluster {
        access_sum += other.access_count;
        winner.tags.extend(other.tags.iter().cloned());
        winner.last_accessed_at = winner.last_accessed_at.max(other.last_accessed_at);
        winner.confidence = winner.confidence.max(other.confidence);
    }
    winner.access_count = access_sum;

    (winner, merged_ids)
}

#[async_trait]
impl ConsolidationEngine for ConsolidationPipeline {
    async fn consolidate(&self) -> Result<ConsolidationReport> {
        let never_cancelled = CancelToken::new();
        let report = self.run(&never_cancelled).await?;
        if !report.errors.is_empty() {
            warn!(errors = ?report.errors, "consolidation completed with per-fragment errors");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::fragment::{materialize, FragmentInput};
    use crate::storage::InMemoryBackend;

    fn fragment_with(relevance: f64, access_count: u64, embedding: Vec<f32>, clock: &FixedClock) -> MemoryFragment {
        let mut f = materialize(
            FragmentInput {
                content: "x".into(),
                project_id: "p".into(),
                agent_id: "a".into(),
                relevance: Some(relevance),
                ..Default::default()
            },
            embedding,
            4,
            clock,
        )
        .unwrap();
        f.access_count = access_count;
        f
    }

    #[tokio::test]
    async fn dedup_keeps_max_relevance_and_sums_access_count() {
        let clock = Arc::new(FixedClock::new(1_000_000));
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());

        let mut a = fragment_with(0.5, 3, vec![0.0, 0.0, 0.0, 0.95], &clock);
        let mut b = fragment_with(0.7, 4, vec![0.0, 0.0, 0.0, 0.95], &clock);
        a.tags.insert("x".into());
        b.tags.insert("y".into());
        backend.write(a).await.unwrap();
        backend.write(b).await.unwrap();

        let config = MemoryEngineConfig::for_testing();
        let pipeline = ConsolidationPipeline::new(backend.clone(), clock, config);
        let report = pipeline.consolidate().await.unwrap();

        assert_eq!(report.merged, 1);
        let remaining = backend.export_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].relevance, 0.7);
        assert_eq!(remaining[0].access_count, 7);
        assert!(remaining[0].tags.contains("x"));
        assert!(remaining[0].tags.contains("y"));
    }

    #[tokio::test]
    async fn decay_matches_forgetting_curve_formula() {
        let now = 8 * 86_400_000_i64; // day 8
        let clock = Arc::new(FixedClock::new(now));
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());

        let mut f = fragment_with(1.0, 0, vec![0.0; 4], &clock);
        f.last_accessed_at = now - 7 * 86_400_000; // idle 7 days
        backend.write(f.clone()).await.unwrap();

        let mut config = MemoryEngineConfig::for_testing();
        config.decay_rate = 0.1;
        config.archive_threshold = -1.0; // disable archival for this test
        let pipeline = ConsolidationPipeline::new(backend.clone(), clock, config);
        pipeline.consolidate().await.unwrap();

        let decayed = backend.read(&f.id).await.unwrap().unwrap();
        let expected = (-0.7_f64).exp();
        assert!((decayed.relevance - expected).abs() < 1e-3);
    }

    #[tokio::test]
    async fn pinned_fragment_is_untouched_across_runs() {
        let now = 40 * 86_400_000_i64;
        let clock = Arc::new(FixedClock::new(now));
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());

        let mut f = fragment_with(0.05, 0, vec![0.0; 4], &clock);
        f.is_pinned = true;
        f.last_accessed_at = 0;
        f.created_at = 0;
        backend.write(f.clone()).await.unwrap();

        let config = MemoryEngineConfig::for_testing();
        let pipeline = ConsolidationPipeline::new(backend.clone(), clock, config);

        for _ in 0..10 {
            pipeline.consolidate().await.unwrap();
        }

        let still_there = backend.read(&f.id).await.unwrap().unwrap();
        assert_eq!(still_there.relevance, 0.05);
        assert!(!still_there.is_archived);
    }

    #[tokio::test]
    async fn archival_triggers_when_relevance_drops_and_aged() {
        let now = 30 * 86_400_000_i64;
        let clock = Arc::new(FixedClock::new(now));
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());

        let mut f = fragment_with(1.0, 0, vec![0.0; 4], &clock);
        f.last_accessed_at = 0; // 30 days idle
        backend.write(f.clone()).await.unwrap();

        let mut config = MemoryEngineConfig::for_testing();
        config.decay_rate = 0.1;
        config.archive_threshold = 0.1;
        config.min_archive_age_days = 7.0;
        let pipeline = ConsolidationPipeline::new(backend.clone(), clock, config);
        pipeline.consolidate().await.unwrap();

        let archived = backend.read(&f.id).await.unwrap().unwrap();
        assert!(archived.is_archived);
    }
}
