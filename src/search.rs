//! Brute-force cosine similarity search over an in-memory index.
//!
//! Every entry is scored against the query vector and the best `k` are
//! returned. Ties are broken by `source_id` then `chunk_index` so that the
//! same index and query always produce the same ranking.

use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::index::IndexEntry;
use crate::models::RetrievalHit;

/// Return the `k` entries most similar to `query`, best first.
pub fn top_k(entries: &[IndexEntry], query: &[f32], k: usize) -> Vec<RetrievalHit> {
    if k == 0 || query.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f32, &IndexEntry)> = entries
        .iter()
        .map(|entry| (cosine_similarity(query, &entry.vector), entry))
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| rank(*sa, a, *sb, b));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(score, entry)| RetrievalHit {
            chunk: entry.chunk.clone(),
            source_id: entry.source_id.clone(),
            score,
        })
        .collect()
}

fn rank(sa: f32, a: &IndexEntry, sb: f32, b: &IndexEntry) -> Ordering {
    sb.total_cmp(&sa)
        .then_with(|| a.source_id.cmp(&b.source_id))
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
}
