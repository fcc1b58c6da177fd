//! Fragment schema (C1): validation, defaulting, and id generation

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{MemoryError, Result};
use crate::types::{FragmentType, MemoryFragment, Provenance};

/// Caller-supplied fields for a new fragment. Anything left `None` is defaulted
/// by [`materialize`].
#[derive(Debug, Clone, Default)]
pub struct FragmentInput {
    /// Textual payload. Required.
    pub content: String,
    /// Fragment type. Required.
    pub fragment_type: Option<FragmentType>,
    /// Project component of the namespace. Required.
    pub project_id: String,
    /// Agent component of the namespace. Required.
    pub agent_id: String,
    /// Initial relevance; defaults to 0.5.
    pub relevance: Option<f64>,
    /// Initial confidence; defaults to 0.5.
    pub confidence: Option<f64>,
    /// Initial tags; defaults to empty.
    pub tags: Option<HashSet<String>>,
    /// Provenance; synthesized with `sourceType = system` if absent.
    pub provenance: Option<Provenance>,
    /// Opaque caller metadata, preserved verbatim.
    pub extra: HashMap<String, Value>,
    /// Optional expiry, epoch ms.
    pub expires_at: Option<i64>,
    /// Whether the fragment starts pinned.
    pub is_pinned: bool,
}

/// Generate a fresh, globally unique fragment id.
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Validate an already-constructed fragment against the fragment schema's
/// invariants. Used both after [`materialize`] and when deserializing an
/// import document.
pub fn validate(fragment: &MemoryFragment, dimension: usize) -> Result<()> {
    let expected_namespace = format!("{}:{}", fragment.project_id, fragment.agent_id);
    if fragment.namespace != expected_namespace {
        return Err(MemoryError::InvalidInput(format!(
            "namespace {:?} does not match project_id:agent_id ({:?})",
            fragment.namespace, expected_namespace
        )));
    }

    if fragment.embedding.len() != dimension {
        return Err(MemoryError::DimensionMismatch {
            expected: dimension,
            actual: fragment.embedding.len(),
        });
    }

    if !(0.0..=1.0).contains(&fragment.relevance) {
        return Err(MemoryError::InvalidInput(format!(
            "relevance {} out of range [0, 1]",
            fragment.relevance
        )));
    }

    if !(0.0..=1.0).contains(&fragment.confidence) {
        return Err(MemoryError::InvalidInput(format!(
            "confidence {} out of range [0, 1]",
            fragment.confidence
        )));
    }

    Ok(())
}

/// Build a complete, validated [`MemoryFragment`] from caller input and a
/// supplied embedding, filling in every default for an omitted field.
pub fn materialize(
    input: FragmentInput,
    embedding: Vec<f32>,
    dimension: usize,
    clock: &dyn Clock,
) -> Result<MemoryFragment> {
    if input.project_id.is_empty() || input.agent_id.is_empty() {
        return Err(MemoryError::InvalidInput(
            "project_id and agent_id are required".to_string(),
        ));
    }

    let now = clock.now_ms();
    let namespace = format!("{}:{}", input.project_id, input.agent_id);

    let fragment = MemoryFragment {
        id: generate_id(),
        content: input.content,
        fragment_type: input.fragment_type.unwrap_or(FragmentType::Episodic),
        namespace,
        agent_id: input.agent_id,
        project_id: input.project_id,
        embedding,
        relevance: input.relevance.unwrap_or(0.5),
        confidence: input.confidence.unwrap_or(0.5),
        access_count: 0,
        last_accessed_at: now,
        created_at: now,
        updated_at: now,
        expires_at: input.expires_at,
        is_pinned: input.is_pinned,
        is_archived: false,
        tags: input.tags.unwrap_or_default(),
        provenance: input.provenance.unwrap_or_else(|| Provenance::system(now)),
        extra: input.extra,
    };

    validate(&fragment, dimension)?;
    Ok(fragment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn input() -> FragmentInput {
        FragmentInput {
            content: "hello".to_string(),
            project_id: "proj".to_string(),
            agent_id: "agent".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn materialize_fills_defaults() {
        let clock = FixedClock::new(1000);
        let fragment = materialize(input(), vec![0.0; 4], 4, &clock).unwrap();

        assert_eq!(fragment.namespace, "proj:agent");
        assert_eq!(fragment.relevance, 0.5);
        assert_eq!(fragment.confidence, 0.5);
        assert_eq!(fragment.access_count, 0);
        assert!(!fragment.is_pinned);
        assert!(!fragment.is_archived);
        assert!(fragment.tags.is_empty());
        assert_eq!(fragment.created_at, 1000);
        assert_eq!(fragment.last_accessed_at, 1000);
        assert!(!fragment.id.is_empty());
    }

    #[test]
    fn materialize_rejects_wrong_dimension() {
        let clock = FixedClock::new(0);
        let err = materialize(input(), vec![0.0; 3], 4, &clock).unwrap_err();
        assert!(matches!(err, MemoryError::DimensionMismatch { .. }));
    }

    #[test]
    fn materialize_rejects_out_of_range_relevance() {
        let clock = FixedClock::new(0);
        let mut bad = input();
        bad.relevance = Some(1.5);
        let err = materialize(bad, vec![0.0; 4], 4, &clock).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
    }

    #[test]
    fn validate_rejects_namespace_mismatch() {
        let clock = FixedClock::new(0);
        let mut fragment = materialize(input(), vec![0.0; 4], 4, &clock).unwrap();
        fragment.namespace = "other:ns".to_string();
        let err = validate(&fragment, 4).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(generate_id(), generate_id());
    }
}
