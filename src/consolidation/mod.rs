//! Consolidation pipeline (C4): dedup, forgetting-curve decay, archival, hard delete
//!
//! Mirrors the source crate's split between the pure pipeline logic
//! (`pipeline.rs`) and a background daemon (`daemon.rs`) that schedules runs
//! on an interval and can be stopped gracefully.

pub mod daemon;
pub mod pipeline;

pub use daemon::{ConsolidationDaemon, DaemonConfig};
pub use pipeline::ConsolidationPipeline;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ConsolidationReport;

/// Trait for engines that perform periodic memory maintenance.
///
/// Exists as an abstraction seam so a future consolidation strategy (e.g. one
/// that additionally calls out to an LLM to decide merges) can be swapped in
/// without changing callers of [`crate::engine::MemoryEngine::consolidate`].
#[async_trait]
pub trait ConsolidationEngine: Send + Sync {
    /// Run all four phases once, against all namespaces, returning a report.
    async fn consolidate(&self) -> Result<ConsolidationReport>;
}
