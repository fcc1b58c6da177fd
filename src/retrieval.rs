//! Retrieval planner (C6): token-budgeted context assembly over C3

use std::sync::Arc;
use std::time::Instant;

use crate::config::ScoreWeights;
use crate::error::Result;
use crate::storage::{Filter, StorageBackend};
use crate::types::RetrievalContext;

/// Estimated tokens for `content`: `ceil(len / 4)`.
#[must_use]
pub fn estimate_tokens(content: &str) -> u64 {
    ((content.len() + 3) / 4) as u64
}

/// Wraps a [`StorageBackend`] to produce a ranked, token-budgeted retrieval
/// context.
pub struct RetrievalPlanner {
    backend: Arc<dyn StorageBackend>,
}

impl RetrievalPlanner {
    /// Build a planner over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Run retrieval: fetch scored candidates, walk them in rank order
    /// accumulating an estimated token count, stop before exceeding
    /// `token_budget`, bump `access_count`/`last_accessed_at` for every
    /// surfaced fragment, and assemble the formatted context.
    ///
    /// `deadline`, if set, causes the walk to stop early and the context to
    /// be marked `truncated` rather than failing.
    #[allow(clippy::too_many_arguments)]
    pub async fn retrieve(
        &self,
        embedding: &[f32],
        filter: Option<&Filter>,
        top_k: usize,
        token_budget: usize,
        similarity_floor: f64,
        weights: ScoreWeights,
        now_ms: i64,
        deadline: Option<Instant>,
    ) -> Result<RetrievalContext> {
        let candidates = self
            .backend
            .search_by_vector(embedding, top_k, filter, similarity_floor, weights, now_ms)
            .await?;

        let mut fragments = Vec::new();
        let mut relevance_by_id = std::collections::HashMap::new();
        let mut total_tokens: u64 = 0;
        let mut truncated = false;

        for scored in candidates {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    truncated = true;
                    break;
                }
            }

            let tokens = estimate_tokens(&scored.fragment.content);
            if total_tokens + tokens > token_budget as u64 {
                break;
            }

            self.backend.touch_access(&scored.fragment.id, now_ms).await?;

            total_tokens += tokens;
            relevance_by_id.insert(scored.fragment.id.clone(), scored.fragment.relevance);
            fragments.push(scored.fragment);
        }

        let formatted = format_context(&fragments);

        Ok(RetrievalContext {
            fragments,
            formatted,
            token_count: total_tokens,
            relevance_by_id,
            truncated,
        })
    }
}

/// Join fragments with a blank line, each prefixed by a short header showing
/// type and tags.
fn format_context(fragments: &[crate::types::MemoryFragment]) -> String {
    fragments
        .iter()
        .map(|f| {
            let mut tags: Vec<&str> = f.tags.iter().map(String::as_str).collect();
            tags.sort_unstable();
            format!("[{:?} | tags: {}]\n{}", f.fragment_type, tags.join(", "), f.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::ScoreWeights;
    use crate::fragment::{materialize, FragmentInput};
    use crate::storage::InMemoryBackend;

    fn make(content: &str, embedding: Vec<f32>, clock: &FixedClock) -> crate::types::MemoryFragment {
        materialize(
            FragmentInput {
                content: content.into(),
                project_id: "p".into(),
                agent_id: "a".into(),
                ..Default::default()
            },
            embedding,
            4,
            clock,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn token_budget_truncates_result_set() {
        let clock = FixedClock::new(1_000_000);
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());

        // ~40-token content (160 chars) x 10.
        let filler = "a".repeat(160);
        for _ in 0..10 {
            backend.write(make(&filler, vec![1.0, 0.0, 0.0, 0.0], &clock)).await.unwrap();
        }

        let planner = RetrievalPlanner::new(backend);
        let ctx = planner
            .retrieve(&[1.0, 0.0, 0.0, 0.0], None, 10, 100, 0.0, ScoreWeights::default(), 1_000_000, None)
            .await
            .unwrap();

        assert_eq!(ctx.fragments.len(), 2);
        assert!(ctx.token_count <= 100);
    }

    #[tokio::test]
    async fn retrieval_bumps_access_count() {
        let clock = FixedClock::new(1_000_000);
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let fragment = make("hello", vec![1.0, 0.0, 0.0, 0.0], &clock);
        let id = fragment.id.clone();
        backend.write(fragment).await.unwrap();

        let planner = RetrievalPlanner::new(backend.clone());
        planner
            .retrieve(&[1.0, 0.0, 0.0, 0.0], None, 10, 2000, 0.0, ScoreWeights::default(), 1_000_000, None)
            .await
            .unwrap();

        let after = backend.read(&id).await.unwrap().unwrap();
        assert_eq!(after.access_count, 1);
        assert_eq!(after.last_accessed_at, 1_000_000);
    }

    #[tokio::test]
    async fn zero_results_is_not_an_error() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let planner = RetrievalPlanner::new(backend);
        let ctx = planner
            .retrieve(&[1.0, 0.0, 0.0, 0.0], None, 10, 2000, 0.7, ScoreWeights::default(), 0, None)
            .await
            .unwrap();
        assert!(ctx.fragments.is_empty());
        assert!(!ctx.truncated);
    }
}
