//! Engine façade (C7): the consumer-facing surface over C1–C6, C8, C9

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::MemoryEngineConfig;
use crate::consolidation::{ConsolidationDaemon, ConsolidationEngine, ConsolidationPipeline, DaemonConfig};
use crate::embeddings::{Embedder, EmbeddingService};
use crate::error::{MemoryError, Result};
use crate::fragment::{self, FragmentInput};
use crate::health::{HealthProbe, HealthProbeConfig};
use crate::ingest::{self, BuildLogInput};
use crate::namespace::NamespaceManager;
use crate::retrieval::RetrievalPlanner;
use crate::storage::{BackendStats, Filter, InMemoryBackend, StorageBackend};
use crate::types::{
    ExportDocument, ImportReport, MemoryFragment, MergeReport, RetrievalContext, ScoredFragment,
    EXPORT_SCHEMA_VERSION,
};
use crate::universe::{UniverseController, UniverseHandle};

/// Inputs to [`MemoryEngine::retrieve`].
#[derive(Debug, Clone, Default)]
pub struct RetrieveQuery {
    /// Query text, used for embedding when `embedding` is absent and as the
    /// basis for the formatted context header.
    pub query: String,
    /// Precomputed query embedding. If absent, the engine's embedder is used.
    pub embedding: Option<Vec<f32>>,
    /// Additional filter predicates, conjunctive with namespace isolation.
    pub filter: Option<Filter>,
    /// Retrieval fanout; defaults to the engine's configured `default_top_k`.
    pub top_k: Option<usize>,
    /// Token budget; defaults to the engine's configured `token_budget`.
    pub token_budget: Option<usize>,
    /// Optional deadline; on expiry the result is returned with `truncated = true`.
    pub deadline: Option<Instant>,
}

/// Inputs to [`MemoryEngine::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Query text, used for embedding when `embedding` is absent.
    pub query: String,
    /// Precomputed query embedding. If absent, the engine's embedder is used.
    pub embedding: Option<Vec<f32>>,
    /// Additional filter predicates.
    pub filter: Option<Filter>,
    /// Result fanout; defaults to the engine's configured `default_top_k`.
    pub top_k: Option<usize>,
    /// Similarity floor; defaults to the engine's configured `similarity_threshold`.
    pub similarity_floor: Option<f64>,
}

/// Aggregate health snapshot.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the storage backend reports itself reachable.
    pub backend_available: bool,
    /// Number of namespaces this engine has observed as active.
    pub namespace_count: u64,
    /// Backend-reported aggregate statistics.
    pub stats: BackendStats,
    /// Whether the background consolidation daemon is currently running.
    pub consolidation_running: bool,
    /// Whether the background health probe is currently running.
    pub health_probe_running: bool,
    /// Result of the health probe's most recent tick, if the probe has run
    /// at least once since it was started.
    pub last_probe_available: Option<bool>,
}

const RETRY_BASE: Duration = Duration::from_millis(200);
const RETRY_CAP: Duration = Duration::from_secs(2);

async fn retry_once<F, Fut, T>(op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(err) if err.is_transient() => {
            tokio::time::sleep(RETRY_BASE.min(RETRY_CAP)).await;
            op().await
        }
        Err(err) => Err(err),
    }
}

/// Orchestrates fragment schema, storage, the vector index, consolidation,
/// namespaces, retrieval, and ingest behind one consumer-facing surface.
///
/// Each engine instance owns its own namespace registry and consolidation
/// scheduler; constructing a second engine never reuses or double-starts a
/// process-wide singleton.
pub struct MemoryEngine {
    backend: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    config: MemoryEngineConfig,
    embeddings: EmbeddingService,
    namespaces: Arc<NamespaceManager>,
    retrieval: RetrievalPlanner,
    consolidation: Arc<ConsolidationPipeline>,
    universes: UniverseController,
    daemon: Mutex<Option<Arc<ConsolidationDaemon>>>,
    health_probe: Mutex<Option<Arc<HealthProbe>>>,
}

impl MemoryEngine {
    /// Build an engine with the in-memory reference backend, the system
    /// clock, and the deterministic fallback embedder.
    #[must_use]
    pub fn new(config: MemoryEngineConfig) -> Self {
        Self::with_backend(config, Arc::new(InMemoryBackend::new()))
    }

    /// Build an engine over a caller-supplied backend.
    #[must_use]
    pub fn with_backend(config: MemoryEngineConfig, backend: Arc<dyn StorageBackend>) -> Self {
        let dimension = config.embedding_dimension;
        Self::build(config, backend, Arc::new(SystemClock), EmbeddingService::fallback_only(dimension))
    }

    /// Build an engine with a real embedder injected.
    #[must_use]
    pub fn with_embedder(config: MemoryEngineConfig, backend: Arc<dyn StorageBackend>, embedder: Box<dyn Embedder>) -> Self {
        Self::build(config, backend, Arc::new(SystemClock), EmbeddingService::with_provider(embedder))
    }

    /// Full constructor, primarily for tests that need to inject a [`FixedClock`](crate::clock::FixedClock).
    #[must_use]
    pub fn with_all(
        config: MemoryEngineConfig,
        backend: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        embeddings: EmbeddingService,
    ) -> Self {
        Self::build(config, backend, clock, embeddings)
    }

    fn build(config: MemoryEngineConfig, backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>, embeddings: EmbeddingService) -> Self {
        let namespaces = Arc::new(NamespaceManager::new(
            backend.clone(),
            clock.clone(),
            config.max_namespaces,
            config.dedup_similarity_threshold,
        ));
        let retrieval = RetrievalPlanner::new(backend.clone());
        let consolidation = Arc::new(ConsolidationPipeline::new(backend.clone(), clock.clone(), config.clone()));
        let universes = UniverseController::new(namespaces.clone(), backend.clone(), clock.clone());

        Self {
            backend,
            clock,
            config,
            embeddings,
            namespaces,
            retrieval,
            consolidation,
            universes,
            daemon: Mutex::new(None),
            health_probe: Mutex::new(None),
        }
    }

    async fn embed_or_fallback(&self, text: &str) -> Vec<f32> {
        let (vector, used_fallback) = self.embeddings.embed(text).await;
        if used_fallback {
            warn!("no embedder configured or embedder failed; using deterministic fallback embedding");
        }
        vector
    }

    /// Fill in `project_id`/`agent_id` from `config.default_namespace` when the
    /// caller left either empty, rather than rejecting the input outright.
    fn apply_default_namespace(&self, mut input: FragmentInput) -> FragmentInput {
        if input.project_id.is_empty() {
            input.project_id = self.config.default_namespace.clone();
        }
        if input.agent_id.is_empty() {
            input.agent_id = self.config.default_namespace.clone();
        }
        input
    }

    fn isolate(&self, filter: Option<Filter>) -> Option<Filter> {
        if self.config.enable_namespace_isolation {
            return filter;
        }
        filter.map(|mut f| {
            f.namespace = None;
            f
        })
    }

    /// Run C1 materialization, then persist through C2, registering the
    /// fragment's namespace with the registry. Fail-fast on invalid input;
    /// one retry on a transient backend error.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidInput`] / [`MemoryError::DimensionMismatch`]
    /// immediately; returns [`MemoryError::BackendUnavailable`] after one retry.
    #[instrument(skip(self, input, embedding))]
    pub async fn store(&self, input: FragmentInput, embedding: Option<Vec<f32>>) -> Result<MemoryFragment> {
        let input = self.apply_default_namespace(input);
        let embedding = match embedding {
            Some(vector) => vector,
            None => self.embed_or_fallback(&input.content).await,
        };

        let fragment = fragment::materialize(input, embedding, self.config.embedding_dimension, self.clock.as_ref())?;
        let to_write = fragment.clone();
        retry_once(|| self.backend.write(to_write.clone())).await?;
        self.namespaces.touch(&fragment.namespace);
        Ok(fragment)
    }

    /// Assemble a token-budgeted retrieval context via C6.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackendUnavailable`] after one retry on a
    /// transient backend failure.
    #[instrument(skip(self, query))]
    pub async fn retrieve(&self, query: RetrieveQuery) -> Result<RetrievalContext> {
        let embedding = match query.embedding {
            Some(vector) => vector,
            None => self.embed_or_fallback(&query.query).await,
        };
        let filter = self.isolate(query.filter);
        let top_k = query.top_k.unwrap_or(self.config.default_top_k);
        let token_budget = query.token_budget.unwrap_or(self.config.token_budget);
        let now = self.clock.now_ms();
        let weights = self.config.weights;
        let floor = self.config.similarity_threshold;
        let deadline = query.deadline;

        retry_once(|| {
            self.retrieval
                .retrieve(&embedding, filter.as_ref(), top_k, token_budget, floor, weights, now, deadline)
        })
        .await
    }

    /// Raw semantic search via C3, with no token budgeting and no access
    /// count mutation.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackendUnavailable`] after one retry on a
    /// transient backend failure.
    pub async fn search(&self, query: SearchQuery) -> Result<Vec<ScoredFragment>> {
        let embedding = match query.embedding {
            Some(vector) => vector,
            None => self.embed_or_fallback(&query.query).await,
        };
        let filter = self.isolate(query.filter);
        let top_k = query.top_k.unwrap_or(self.config.default_top_k);
        let floor = query.similarity_floor.unwrap_or(self.config.similarity_threshold);
        let now = self.clock.now_ms();
        let weights = self.config.weights;

        retry_once(|| self.backend.search_by_vector(&embedding, top_k, filter.as_ref(), floor, weights, now)).await
    }

    /// Run one consolidation pass now.
    ///
    /// # Errors
    ///
    /// Per-fragment failures are recorded in the report, not surfaced here;
    /// this only errors if the backend snapshot itself fails.
    pub async fn consolidate(&self) -> Result<crate::types::ConsolidationReport> {
        self.consolidation.consolidate().await
    }

    /// Spawn the background consolidation scheduler. No-op if already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is already running.
    pub async fn start_background_consolidation(&self) -> Result<()> {
        let mut guard = self.daemon.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let engine: Arc<dyn ConsolidationEngine> = self.consolidation.clone();
        let daemon = Arc::new(ConsolidationDaemon::new(
            engine,
            DaemonConfig { interval_ms: self.config.consolidation_interval_ms },
        ));
        daemon.clone().start()?;
        *guard = Some(daemon);
        Ok(())
    }

    /// Spawn the background health probe. No-op if already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe is already running.
    pub async fn start_background_health_probe(&self) -> Result<()> {
        let mut guard = self.health_probe.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let probe = Arc::new(HealthProbe::new(
            self.backend.clone(),
            HealthProbeConfig { interval_ms: self.config.health_check_interval_ms },
        ));
        probe.clone().start()?;
        *guard = Some(probe);
        Ok(())
    }

    /// Serialize fragments (optionally scoped to one namespace) as a
    /// versioned JSON export document.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Serialization`] if encoding fails.
    pub async fn export(&self, namespace: Option<&str>) -> Result<String> {
        let fragments = match namespace {
            Some(ns) => self.backend.query(&Filter::for_namespace(ns)).await?,
            None => self.backend.export_all().await?,
        };
        let doc = ExportDocument {
            schema_version: EXPORT_SCHEMA_VERSION,
            exported_at: self.clock.now_ms(),
            fragments,
        };
        Ok(serde_json::to_string(&doc)?)
    }

    /// Parse and import a JSON export document, skipping fragments whose
    /// embedding dimension doesn't match this engine's configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Serialization`] if `doc` is not valid JSON.
    pub async fn import(&self, doc: &str) -> Result<ImportReport> {
        let parsed: ExportDocument = serde_json::from_str(doc)?;

        let mut valid = Vec::with_capacity(parsed.fragments.len());
        let mut skipped = 0;
        for fragment in parsed.fragments {
            if fragment.embedding.len() == self.config.embedding_dimension {
                valid.push(fragment);
            } else {
                skipped += 1;
            }
        }

        for fragment in &valid {
            self.namespaces.touch(&fragment.namespace);
        }

        let imported = self.backend.import_all(valid).await?;
        Ok(ImportReport { imported, skipped })
    }

    /// Delegate to [`NamespaceManager::fork`].
    ///
    /// # Errors
    ///
    /// See [`NamespaceManager::fork`].
    pub async fn fork_namespace(&self, source: &str, target: &str, overwrite: bool) -> Result<u64> {
        self.namespaces.fork(source, target, overwrite).await
    }

    /// Delegate to [`NamespaceManager::merge`].
    ///
    /// # Errors
    ///
    /// See [`NamespaceManager::merge`].
    pub async fn merge_namespaces(&self, source: &str, target: &str) -> Result<MergeReport> {
        self.namespaces.merge(source, target).await
    }

    /// Delegate to [`NamespaceManager::cross_agent_retrieve`], resolving the
    /// query embedding first. `project` of `None` sweeps every project this
    /// engine has observed an active namespace for.
    ///
    /// # Errors
    ///
    /// See [`NamespaceManager::cross_agent_retrieve`].
    pub async fn cross_agent_retrieve(
        &self,
        query: &str,
        agent_ids: &[String],
        project: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<Vec<ScoredFragment>> {
        let embedding = self.embed_or_fallback(query).await;
        let top_k = top_k.unwrap_or(self.config.default_top_k);
        let now = self.clock.now_ms();
        self.namespaces
            .cross_agent_retrieve(&embedding, agent_ids, project, top_k, self.config.similarity_threshold, self.config.weights, now)
            .await
    }

    /// Branch `{base_project_id}:main` into a new tracked universe.
    ///
    /// # Errors
    ///
    /// See [`UniverseController::create_universe`].
    pub async fn create_universe(&self, universe_id: &str, base_project_id: &str, branch_name: &str) -> Result<UniverseHandle> {
        self.universes.create_universe(universe_id, base_project_id, branch_name).await
    }

    /// Refresh a tracked universe's fragment snapshot.
    ///
    /// # Errors
    ///
    /// See [`UniverseController::sync_universe`].
    pub async fn sync_universe(&self, universe_id: &str) -> Result<UniverseHandle> {
        self.universes.sync_universe(universe_id).await
    }

    /// Merge a universe's namespace back into its base and stop tracking it.
    ///
    /// # Errors
    ///
    /// See [`UniverseController::merge_universe_back`].
    pub async fn merge_universe_back(&self, universe_id: &str) -> Result<MergeReport> {
        self.universes.merge_universe_back(universe_id).await
    }

    /// List every tracked universe.
    #[must_use]
    pub fn list_universes(&self) -> Vec<UniverseHandle> {
        self.universes.list_universes()
    }

    /// Convert and store a build log via C8.
    ///
    /// # Errors
    ///
    /// See [`MemoryEngine::store`].
    pub async fn ingest_build_log(&self, input: BuildLogInput) -> Result<MemoryFragment> {
        let fragment_input = ingest::build_log_to_fragment(input);
        self.store(fragment_input, None).await
    }

    /// Convert and store a batch of retrospective insights via C8.
    ///
    /// # Errors
    ///
    /// See [`MemoryEngine::store`].
    pub async fn ingest_retrospective(
        &self,
        insights: Vec<String>,
        agent_id: &str,
        project_id: &str,
    ) -> Result<Vec<MemoryFragment>> {
        let now = self.clock.now_ms();
        let inputs = ingest::retrospective_to_fragments(insights, agent_id, project_id, now);
        let mut stored = Vec::with_capacity(inputs.len());
        for input in inputs {
            stored.push(self.store(input, None).await?);
        }
        Ok(stored)
    }

    /// Aggregate health snapshot: backend reachability plus stats.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::BackendUnavailable`] only if `get_stats` itself fails.
    pub async fn health_check(&self) -> Result<HealthStatus> {
        let backend_available = self.backend.is_available().await;
        let stats = self.backend.get_stats().await?;
        let daemon_running = self.daemon.lock().await.as_ref().is_some_and(|d| d.is_running());
        let probe_guard = self.health_probe.lock().await;
        let health_probe_running = probe_guard.as_ref().is_some_and(|p| p.is_running());
        let last_probe_available = probe_guard.as_ref().map(|p| p.last_available());

        Ok(HealthStatus {
            backend_available,
            namespace_count: self.namespaces.known_namespaces().len() as u64,
            stats,
            consolidation_running: daemon_running,
            health_probe_running,
            last_probe_available,
        })
    }

    /// Stop the background scheduler and health probe if running, then flush
    /// and close the backend.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageBackend::close`] errors.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(daemon) = self.daemon.lock().await.take() {
            daemon.stop().await?;
        }
        if let Some(probe) = self.health_probe.lock().await.take() {
            probe.stop().await?;
        }
        self.backend.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn engine() -> MemoryEngine {
        MemoryEngine::with_all(
            MemoryEngineConfig::for_testing(),
            Arc::new(InMemoryBackend::new()),
            Arc::new(FixedClock::new(1_000_000)),
            EmbeddingService::fallback_only(8),
        )
    }

    #[tokio::test]
    async fn store_assigns_defaults_and_embedding() {
        let engine = engine();
        let fragment = engine
            .store(
                FragmentInput {
                    content: "hello".into(),
                    project_id: "p".into(),
                    agent_id: "a".into(),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(fragment.embedding.len(), 8);
        assert_eq!(fragment.namespace, "p:a");
        assert_eq!(fragment.access_count, 0);
    }

    #[tokio::test]
    async fn store_falls_back_to_default_namespace_when_caller_omits_ids() {
        let engine = engine();
        let fragment = engine
            .store(
                FragmentInput {
                    content: "hello".into(),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        let default_ns = &engine.config.default_namespace;
        assert_eq!(fragment.project_id, *default_ns);
        assert_eq!(fragment.agent_id, *default_ns);
        assert_eq!(fragment.namespace, format!("{default_ns}:{default_ns}"));
    }

    #[tokio::test]
    async fn retrieve_returns_empty_without_error() {
        let engine = engine();
        let ctx = engine
            .retrieve(RetrieveQuery {
                query: "anything".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(ctx.fragments.is_empty());
    }

    #[tokio::test]
    async fn export_then_import_round_trips() {
        let engine = engine();
        engine
            .store(
                FragmentInput {
                    content: "one".into(),
                    project_id: "p".into(),
                    agent_id: "a".into(),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        let exported = engine.export(None).await.unwrap();

        let other = engine();
        let report = other.import(&exported).await.unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test]
    async fn health_check_reports_backend_available() {
        let engine = engine();
        let health = engine.health_check().await.unwrap();
        assert!(health.backend_available);
        assert!(!health.health_probe_running);
        assert!(health.last_probe_available.is_none());
    }

    #[tokio::test]
    async fn background_health_probe_starts_and_reports_running() {
        let engine = engine();
        engine.start_background_health_probe().await.unwrap();
        let health = engine.health_check().await.unwrap();
        assert!(health.health_probe_running);
        assert_eq!(health.last_probe_available, Some(true));

        engine.start_background_health_probe().await.unwrap(); // second call is a no-op
        engine.shutdown().await.unwrap();

        let health = engine.health_check().await.unwrap();
        assert!(!health.health_probe_running);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_with_no_daemon() {
        let engine = engine();
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn build_log_ingest_round_trips_through_store() {
        let engine = engine();
        let fragment = engine
            .ingest_build_log(BuildLogInput {
                build_id: "bld-1".into(),
                agent_id: "a".into(),
                project_id: "p".into(),
                success: false,
                output: "bootstrap failed".into(),
                errors: vec!["TypeError: undefined is not a function".into()],
                duration_ms: 10,
                timestamp: 0,
            })
            .await
            .unwrap();

        assert_eq!(fragment.fragment_type, crate::types::FragmentType::Procedural);
        assert_eq!(fragment.relevance, 0.9);
        assert!(fragment.content.starts_with("Build bld-1: FAILURE"));
    }
}
