use std::cmp::Ordering;

use super::model::EvidenceItem;

/// Lowercased whitespace tokens with surrounding ASCII punctuation and dandas removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| c.is_ascii_punctuation() || c == '।' || c == '॥')
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

/// Fraction of query tokens that occur inside, or contain, some token of `text`.
pub fn token_overlap(query: &str, text: &str) -> f32 {
    let q = tokenize(query);
    if q.is_empty() {
        return 0.0;
    }
    let doc = tokenize(text);
    let matches = q
        .iter()
        .filter(|qt| doc.iter().any(|dt| dt.contains(qt.as_str()) || qt.contains(dt.as_str())))
        .count();
    matches as f32 / q.len() as f32
}

/// Relevance descending; ties by source priority; otherwise input order is kept.
pub fn sort_evidence(items: &mut [EvidenceItem]) {
    items.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(Ordering::Equal)
            .then(a.source.priority().cmp(&b.source.priority()))
    });
}

pub fn clamp_relevance(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
