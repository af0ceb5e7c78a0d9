//! Output similarity
//!
//! Jaccard overlap of lower-cased word tokens. Punctuation splits tokens so
//! `"error:"` and `"error"` compare equal.

use std::collections::HashSet;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
        .collect()
}

/// Token-overlap ratio in `[0, 1]`; two empty texts are identical
pub fn similarity(a: &str, b: &str) -> f64 {
    let words_a = tokens(a);
    let words_b = tokens(b);

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();

    if union == 0 {
        return 0.0;
    }

    intersection as f64 / union as f64
}

/// Lowest similarity over every pair of `texts`
///
/// Returns `None` for fewer than two texts.
pub fn min_pairwise_similarity(texts: &[&str]) -> Option<f64> {
    if texts.len() < 2 {
        return None;
    }

    let mut lowest = f64::MAX;
    for (i, a) in texts.iter().enumerate() {
        for b in &texts[i + 1..] {
            lowest = lowest.min(similarity(a, b));
        }
    }
    Some(lowest)
}
