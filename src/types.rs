//! Core data model: the memory fragment and its derived entities

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque, globally unique fragment identifier.
pub type Id = String;

/// The kind of memory a fragment represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentType {
    /// A recorded interaction or event.
    Episodic,
    /// A learned pattern, skill, or action sequence.
    Procedural,
    /// A fact or relationship distilled from experience.
    Semantic,
}

/// Where a fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Originated from a task execution.
    Task,
    /// Originated from a retrospective insight.
    Retrospective,
    /// Originated from a build log.
    Build,
    /// Originated from a detected pattern.
    Pattern,
    /// Supplied directly by a user.
    User,
    /// Synthesized by the engine itself.
    System,
}

/// Provenance metadata attached to every fragment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// What kind of event produced this fragment.
    pub source_type: SourceType,
    /// Identifier of the originating record (build id, task id, ...).
    pub source_id: String,
    /// When the originating event occurred (epoch ms).
    pub timestamp: i64,
    /// Agent that produced the fragment.
    pub originating_agent: String,
    /// Project the originating agent belonged to, if known.
    pub project: Option<String>,
}

impl Provenance {
    /// A provenance stub for fragments synthesized by the engine itself.
    #[must_use]
    pub fn system(now_ms: i64) -> Self {
        Self {
            source_type: SourceType::System,
            source_id: String::new(),
            timestamp: now_ms,
            originating_agent: String::new(),
            project: None,
        }
    }
}

/// A single atomic memory record.
///
/// The invariants this type must uphold
/// are enforced by [`crate::fragment::materialize`] and [`crate::fragment::validate`]
/// rather than by the type itself, since callers may hand-construct a fragment
/// (e.g. when deserializing an import document) before it has been validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFragment {
    /// Opaque globally unique id, assigned at creation, never reused.
    pub id: Id,
    /// Textual payload.
    pub content: String,
    /// One of episodic / procedural / semantic.
    #[serde(rename = "type")]
    pub fragment_type: FragmentType,
    /// Canonical `"<project>:<agent>"` isolation scope.
    pub namespace: String,
    /// Denormalized copy of the namespace's agent component.
    pub agent_id: String,
    /// Denormalized copy of the namespace's project component.
    pub project_id: String,
    /// Fixed-dimension similarity vector.
    pub embedding: Vec<f32>,
    /// Mutable relevance score in `[0, 1]`.
    pub relevance: f64,
    /// Write-once confidence score in `[0, 1]`.
    pub confidence: f64,
    /// Number of retrievals that have surfaced this fragment.
    pub access_count: u64,
    /// Epoch ms of the most recent retrieval that surfaced this fragment.
    pub last_accessed_at: i64,
    /// Epoch ms of creation.
    pub created_at: i64,
    /// Epoch ms of the most recent mutation.
    pub updated_at: i64,
    /// Optional epoch ms after which the fragment is invisible and deletable.
    pub expires_at: Option<i64>,
    /// Exempt from decay, archival, and deletion.
    pub is_pinned: bool,
    /// Retained on disk but invisible to default retrieval.
    pub is_archived: bool,
    /// Unordered caller-supplied tags.
    pub tags: HashSet<String>,
    /// Provenance of the originating event.
    pub provenance: Provenance,
    /// Opaque caller metadata, preserved verbatim.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl MemoryFragment {
    /// Whether this fragment is past its expiry and should be treated as invisible.
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|exp| now_ms >= exp)
    }

    /// Age in whole days since last access, given the current time.
    #[must_use]
    pub fn age_days_since_access(&self, now_ms: i64) -> f64 {
        ((now_ms - self.last_accessed_at).max(0) as f64) / 86_400_000.0
    }

    /// Age in whole days since creation, given the current time.
    #[must_use]
    pub fn age_days_since_creation(&self, now_ms: i64) -> f64 {
        ((now_ms - self.created_at).max(0) as f64) / 86_400_000.0
    }
}

/// A fragment bundled with its composite score and component scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredFragment {
    /// The underlying fragment.
    pub fragment: MemoryFragment,
    /// Weighted composite of similarity, recency, and frequency.
    pub composite: f64,
    /// Raw cosine similarity against the query embedding.
    pub similarity: f64,
    /// Recency component of the composite score.
    pub recency: f64,
    /// Frequency component of the composite score.
    pub frequency: f64,
}

/// The result of a budgeted retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalContext {
    /// Fragments surfaced, in composite-score order.
    pub fragments: Vec<MemoryFragment>,
    /// Fragments joined by a blank line, each prefixed with a short header.
    pub formatted: String,
    /// Estimated token count of `formatted`.
    pub token_count: u64,
    /// Per-fragment relevance, keyed by id.
    pub relevance_by_id: HashMap<Id, f64>,
    /// Set when the deadline expired before the planner finished walking candidates.
    pub truncated: bool,
}

/// Per-cluster record emitted by the deduplication phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupCluster {
    /// Id of the fragment that survived.
    pub survivor: Id,
    /// Ids of the fragments that were merged into the survivor and deleted.
    pub merged: Vec<Id>,
}

/// Summary of a consolidation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// Number of fragments removed as duplicates (excludes the surviving fragment).
    pub merged: u64,
    /// Number of dedup clusters that had a merge performed.
    pub compressed: u64,
    /// Number of fragments archived.
    pub archived: u64,
    /// Number of fragments whose relevance was decayed.
    pub decayed: u64,
    /// Number of fragments hard-deleted.
    pub deleted: u64,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
    /// Epoch ms when the run started.
    pub timestamp: i64,
    /// Per-fragment errors encountered; consolidation continues past these.
    pub errors: Vec<String>,
    /// Dedup cluster detail, one entry per cluster with a merge.
    pub clusters: Vec<DedupCluster>,
    /// True if the run was interrupted before completing phase 4.
    pub partial: bool,
}

/// Reason a source fragment was not copied during a merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SkipReason {
    /// A near-duplicate already existed in the target and was kept as-is save
    /// for the accumulated fields (access count, tags, confidence, recency).
    MergedIntoExisting(Id),
}

/// Summary of a namespace merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    /// Source namespace.
    pub source: String,
    /// Target namespace.
    pub target: String,
    /// Fragments copied into the target as new entries.
    pub merged_count: u64,
    /// Fragments that matched an existing target fragment and were folded in.
    pub skipped_count: u64,
    /// Source ids that were folded in, with the reason.
    pub conflicts: Vec<(Id, SkipReason)>,
}

/// Persistence document produced by `export_all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    /// Schema version of this document. Bump on any breaking field change.
    pub schema_version: u32,
    /// Epoch ms when the export was produced.
    pub exported_at: i64,
    /// All exported fragments.
    pub fragments: Vec<MemoryFragment>,
}

/// Current export schema version.
pub const EXPORT_SCHEMA_VERSION: u32 = 1;

/// Summary of an import operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    /// Fragments written.
    pub imported: u64,
    /// Fragments skipped due to a dimension mismatch against the configured `D`.
    pub skipped: u64,
}
