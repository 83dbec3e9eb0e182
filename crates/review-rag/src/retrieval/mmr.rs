//! Maximal Marginal Relevance selection over a candidate pool.

use crate::storage::VectorHit;

/// Cosine similarity between two vectors; 0.0 when either has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Greedy MMR: repeatedly pick the candidate maximizing
/// `lambda * relevance - (1 - lambda) * max-similarity-to-selected`.
/// `lambda` = 1 is pure relevance, 0 is pure diversity.
///
/// Returns up to `k` candidates ordered by selection (best first).
pub fn mmr_select(query: &[f32], candidates: Vec<VectorHit>, lambda: f32, k: usize) -> Vec<VectorHit> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, &c.vector))
        .collect();

    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let diversity_penalty = selected
                .iter()
                .map(|&s| cosine_similarity(&candidates[idx].vector, &candidates[s].vector))
                .fold(0.0f32, f32::max);

            let score = lambda * relevance[idx] - (1.0 - lambda) * diversity_penalty;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.swap_remove(best_pos));
    }

    let mut by_index: Vec<Option<VectorHit>> = candidates.into_iter().map(Some).collect();
    selected
        .into_iter()
        .filter_map(|idx| by_index[idx].take())
        .collect()
}
