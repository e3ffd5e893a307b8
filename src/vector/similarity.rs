//! Cosine similarity and thresholded ranking.
//!
//! Stores that keep their vectors in process memory share `rank_by_similarity`
//! so that every backend applies the threshold and the match cap the same way:
//! filter by threshold first, then sort descending, then truncate.

use rayon::prelude::*;

use crate::vector::{Score, SimilarityThreshold};

/// Below this many candidates a sequential scan beats rayon's fork overhead.
const PARALLEL_SCAN_MIN: usize = 2_048;

/// Calculates cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]. A zero-magnitude vector has similarity 0.0
/// with everything.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Scales a vector to unit length in place. Zero vectors are left untouched.
pub fn normalize_in_place(vector: &mut [f32]) {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

/// Scores every candidate against `query`, keeps those at or above
/// `threshold`, and returns at most `limit` of them, best first.
///
/// Candidates with equal scores keep their input order.
pub fn rank_by_similarity<K>(
    query: &[f32],
    candidates: &[(K, &[f32])],
    threshold: SimilarityThreshold,
    limit: usize,
) -> Vec<(K, Score)>
where
    K: Clone + Send + Sync,
{
    let mut matches: Vec<(K, Score)> = if candidates.len() >= PARALLEL_SCAN_MIN {
        candidates
            .par_iter()
            .filter_map(|(id, vector)| score_candidate(query, threshold, id, vector))
            .collect()
    } else {
        candidates
            .iter()
            .filter_map(|(id, vector)| score_candidate(query, threshold, id, vector))
            .collect()
    };

    // Stable sort keeps the store's native order for ties
    matches.sort_by(|a, b| b.1.cmp(&a.1));
    matches.truncate(limit);
    matches
}

fn score_candidate<K: Clone>(
    query: &[f32],
    threshold: SimilarityThreshold,
    id: &K,
    vector: &[f32],
) -> Option<(K, Score)> {
    Score::new(cosine_similarity(query, vector))
        .ok()
        .filter(|score| threshold.admits(*score))
        .map(|score| (id.clone(), score))
}
