//! Tiered substring matching over icon names and descriptions.

use crate::catalog::Catalog;
use crate::search::result::SearchResult;

/// Maximum number of results from the lexical path
pub const LEXICAL_LIMIT: usize = 200;

pub const SCORE_EXACT_NAME: u8 = 100;
pub const SCORE_NAME_PREFIX: u8 = 90;
pub const SCORE_DESCRIPTION: u8 = 80;
pub const SCORE_NAME_CONTAINS: u8 = 70;
pub const SCORE_OTHER: u8 = 50;

/// Normalize a query for comparison: trimmed and lower-cased
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Score one record against an already normalized query.
///
/// Returns `None` when neither the name nor the description contains the
/// query. Inputs must be lower-cased.
pub fn lexical_score(name: &str, description: &str, query: &str) -> Option<u8> {
    let in_name = name.contains(query);
    let in_description = description.contains(query);
    if !in_name && !in_description {
        return None;
    }

    let score = if name == query {
        SCORE_EXACT_NAME
    } else if name.starts_with(query) {
        SCORE_NAME_PREFIX
    } else if in_description {
        SCORE_DESCRIPTION
    } else if in_name {
        SCORE_NAME_CONTAINS
    } else {
        SCORE_OTHER
    };
    Some(score)
}

/// Rank catalog records by lexical score, highest first, ties by name.
///
/// An empty query matches nothing; callers handle the empty case.
pub fn lexical_search(catalog: &Catalog, query: &str, limit: usize) -> Vec<SearchResult> {
    let query = normalize_query(query);
    if query.is_empty() {
        return Vec::new();
    }

    let mut results: Vec<SearchResult> = catalog
        .entries()
        .iter()
        .filter_map(|entry| {
            lexical_score(&entry.name_lower, &entry.description_lower, &query)
                .map(|score| SearchResult::lexical(entry.record.clone(), score))
        })
        .collect();

    results.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.icon.name.cmp(&b.icon.name)));
    results.truncate(limit);

    tracing::debug!("Lexical search for '{}' matched {} icons", query, results.len());
    results
}
