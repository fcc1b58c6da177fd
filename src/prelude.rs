//! Convenience re-exports for common call sites.

pub use crate::clock::{Clock, FixedClock, SystemClock};
pub use crate::config::{MemoryEngineConfig, ScoreWeights, StorageType};
pub use crate::consolidation::{ConsolidationDaemon, ConsolidationEngine, ConsolidationPipeline, DaemonConfig};
pub use crate::embeddings::{Embedder, EmbeddingService};
pub use crate::engine::{HealthStatus, MemoryEngine, RetrieveQuery, SearchQuery};
pub use crate::error::{MemoryError, Result};
pub use crate::fragment::FragmentInput;
pub use crate::health::{HealthProbe, HealthProbeConfig};
pub use crate::ingest::{BuildLogInput, build_log_to_fragment, retrospective_to_fragments};
pub use crate::namespace::NamespaceManager;
pub use crate::retrieval::RetrievalPlanner;
pub use crate::storage::{BackendStats, Filter, InMemoryBackend, StorageBackend, TagMatch};
pub use crate::types::{
    ConsolidationReport, ExportDocument, FragmentType, Id, ImportReport, MemoryFragment, MergeReport,
    Provenance, RetrievalContext, ScoredFragment, SkipReason, SourceType,
};
pub use crate::universe::{UniverseController, UniverseHandle};
