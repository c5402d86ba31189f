//! Search quality heuristic.
//!
//! Not a learned model: fixed thresholds on result count, content volume and
//! source diversity. The constants are part of the observable behaviour.

use super::{SearchResultCollection, SearchSource};

/// Fewer hits than this is never sufficient.
pub const MIN_RESULTS: usize = 2;
/// Less total content than this (chars) is never sufficient.
pub const MIN_CONTENT_CHARS: usize = 1000;
/// More total content than this (chars) earns the volume bonus.
pub const VOLUME_BONUS_CHARS: usize = 2000;
pub const DIVERSITY_BONUS: f64 = 0.1;
pub const VOLUME_BONUS: f64 = 0.05;

/// Recompute `confidence` and `is_sufficient` in place.
pub fn evaluate(collection: &mut SearchResultCollection) {
    collection.confidence = confidence(collection);
    collection.is_sufficient = is_sufficient(collection);
}

/// Mean prior score, plus bonuses for mixed sources and volume, clamped to `[0, 1]`.
pub fn confidence(collection: &SearchResultCollection) -> f64 {
    if collection.results.is_empty() {
        return 0.0;
    }

    let total: f64 = collection.results.iter().map(|r| r.score).sum();
    let mut confidence = total / collection.results.len() as f64;

    if collection.has_source(SearchSource::Internal) && collection.has_source(SearchSource::External) {
        confidence += DIVERSITY_BONUS;
    }
    if collection.content_len() > VOLUME_BONUS_CHARS {
        confidence += VOLUME_BONUS;
    }

    confidence.clamp(0.0, 1.0)
}

pub fn is_sufficient(collection: &SearchResultCollection) -> bool {
    if collection.results.len() < MIN_RESULTS {
        return false;
    }
    if collection.content_len() < MIN_CONTENT_CHARS {
        return false;
    }
    collection.has_source(SearchSource::Internal) || collection.has_source(SearchSource::External)
}
