//! Vector index (C3): similarity, recency, frequency, and composite ranking
//!
//! The scoring functions here are pure and backend-agnostic; both the
//! in-memory reference backend and any future backend compute ranking the
//! same way by calling into this module, keeping the composite-score
//! contract in one place.

use crate::config::ScoreWeights;
use crate::error::{MemoryError, Result};
use crate::types::MemoryFragment;

/// Cosine similarity between two equal-length vectors.
///
/// Defined as 0 when either vector has zero magnitude.
///
/// # Errors
///
/// Returns [`MemoryError::DimensionMismatch`] if `a.len() != b.len()`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(MemoryError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    Ok(dot / (norm_a * norm_b))
}

/// `recency(f) = exp(-0.1 * age_days)`, where `age_days` is measured from
/// `last_accessed_at` to `now_ms`. Range is `(0, 1]`.
#[must_use]
pub fn recency_score(fragment: &MemoryFragment, now_ms: i64) -> f64 {
    let age_days = fragment.age_days_since_access(now_ms);
    (-0.1 * age_days).exp()
}

/// `frequency(f) = ln(1 + access_count) / ln(1 + 100)`, saturating at 100
/// accesses.
#[must_use]
pub fn frequency_score(fragment: &MemoryFragment) -> f64 {
    ((1.0 + fragment.access_count as f64).ln()) / (101.0_f64).ln()
}

/// Weighted composite of similarity, recency, and frequency, clamped to
/// `[0, 1]`.
#[must_use]
pub fn composite_score(similarity: f64, recency: f64, frequency: f64, weights: ScoreWeights) -> f64 {
    let raw = weights.similarity * similarity + weights.recency * recency + weights.frequency * frequency;
    raw.clamp(0.0, 1.0)
}

/// Total order used to rank scored candidates: composite desc, then
/// similarity desc, then `last_accessed_at` desc, then id lexicographic.
pub fn rank_key(fragment: &MemoryFragment, composite: f64, similarity: f64) -> (i64, i64, i64, String) {
    // Multiply by a large constant and round so NaN-free f64 can be compared
    // via a totally-ordered integer key without relying on partial_cmp chains.
    let comp_key = (composite * 1e9).round() as i64;
    let sim_key = (similarity * 1e9).round() as i64;
    (comp_key, sim_key, fragment.last_accessed_at, fragment.id.clone())
}

/// Sort candidates descending by composite score, breaking ties deterministically.
pub fn sort_scored(scored: &mut [crate::types::ScoredFragment]) {
    scored.sort_by(|a, b| {
        let ka = rank_key(&a.fragment, a.composite, a.similarity);
        let kb = rank_key(&b.fragment, b.composite, b.similarity);
        // Descending on composite/similarity/last_accessed_at, ascending (lexicographic) on id.
        kb.0.cmp(&ka.0)
            .then(kb.1.cmp(&ka.1))
            .then(kb.2.cmp(&ka.2))
            .then(ka.3.cmp(&kb.3))
    });
}
