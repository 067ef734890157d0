//! Similarity scoring used by the in-memory vector store.
//!
//! - Cosine similarity over dense embeddings
//! - Lexical similarity (cosine over term frequencies) when no embedder is configured

use std::collections::HashMap;

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length, empty, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Lower-cased alphanumeric terms with their counts.
pub fn term_frequencies(text: &str) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for term in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        *counts.entry(term.to_lowercase()).or_insert(0) += 1;
    }
    counts
}

/// Cosine similarity between the term-frequency vectors of two texts.
///
/// Returns a value in [0, 1]; 0.0 when either text has no terms.
pub fn lexical_similarity(a: &str, b: &str) -> f64 {
    let ta = term_frequencies(a);
    let tb = term_frequencies(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let dot: f64 = ta
        .iter()
        .filter_map(|(term, x)| tb.get(term).map(|y| f64::from(*x) * f64::from(*y)))
        .sum();
    let norm = |t: &HashMap<String, u32>| {
        t.values().map(|v| f64::from(*v).powi(2)).sum::<f64>().sqrt()
    };

    dot / (norm(&ta) * norm(&tb))
}
