//! Embedding procurement
//!
//! Mirrors the source crate's split between an injected provider (here,
//! [`Embedder`]) and a service wrapper that adds an engine-owned fallback when
//! no provider is configured. Unlike the source crate, the fallback here is
//! not a test stub: it is a documented, deterministic part of the engine's
//! contract used whenever a caller supplies content with
//! no embedding and no `Embedder` is injected.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// A pluggable embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Compute an embedding vector for `text`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimension of vectors this embedder produces.
    fn dimensions(&self) -> usize;
}

/// Wraps an optional injected [`Embedder`], falling back to a deterministic
/// pseudo-random embedding derived from the content hash when none is set.
///
/// The fallback is intentionally not a real embedding model: it exists so the
/// engine can always produce a fixed-dimension vector, preserving the
/// `embedding.len == D` invariant, even with no embedder configured. Callers
/// are warned via the returned `used_fallback` flag so they can surface this
/// to an operator.
pub struct EmbeddingService {
    provider: Option<Box<dyn Embedder>>,
    dimensions: usize,
}

impl EmbeddingService {
    /// Create a service with no injected provider; all calls use the fallback.
    #[must_use]
    pub fn fallback_only(dimensions: usize) -> Self {
        Self {
            provider: None,
            dimensions,
        }
    }

    /// Create a service backed by a real provider.
    #[must_use]
    pub fn with_provider(provider: Box<dyn Embedder>) -> Self {
        let dimensions = provider.dimensions();
        Self {
            provider: Some(provider),
            dimensions,
        }
    }

    /// Configured embedding dimension.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Produce an embedding for `text`, returning whether the deterministic
    /// fallback was used (no provider configured, or the provider failed).
    pub async fn embed(&self, text: &str) -> (Vec<f32>, bool) {
        if let Some(provider) = &self.provider {
            if let Ok(vector) = provider.embed(text).await {
                return (vector, false);
            }
        }
        (deterministic_fallback(text, self.dimensions), true)
    }
}

/// Deterministic pseudo-random embedding seeded from the SHA-256 of `text`.
///
/// Same content always yields the same vector, so retrieval stays
/// reproducible across runs even without a real embedder.
#[must_use]
pub fn deterministic_fallback(text: &str, dimensions: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let mut seed = u64::from_le_bytes(digest[0..8].try_into().unwrap_or_default());

    let mut out = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        // xorshift64*: cheap, deterministic, good enough for a non-semantic fallback.
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let unit = (seed >> 11) as f64 / (1u64 << 53) as f64; // [0, 1)
        out.push((unit * 2.0 - 1.0) as f32); // [-1, 1)
    }

    let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut out {
            *x /= norm;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_deterministic() {
        let a = deterministic_fallback("hello world", 16);
        let b = deterministic_fallback("hello world", 16);
        assert_eq!(a, b);
    }

    #[test]
    fn fallback_differs_by_content() {
        let a = deterministic_fallback("hello", 16);
        let b = deterministic_fallback("world", 16);
        assert_ne!(a, b);
    }

    #[test]
    fn fallback_has_requested_dimension() {
        let v = deterministic_fallback("x", 384);
        assert_eq!(v.len(), 384);
    }

    #[tokio::test]
    async fn service_without_provider_uses_fallback() {
        let service = EmbeddingService::fallback_only(8);
        let (vector, used_fallback) = service.embed("test").await;
        assert!(used_fallback);
        assert_eq!(vector.len(), 8);
    }
}
