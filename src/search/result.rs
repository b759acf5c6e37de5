use std::sync::Arc;

use serde::Serialize;

use crate::catalog::IconRecord;

/// Search result returned to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub icon: Arc<IconRecord>,
    /// Cosine similarity, set when ranked by the vector path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    /// Tier score, set when ranked by the lexical path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
}

impl SearchResult {
    pub fn unranked(icon: Arc<IconRecord>) -> Self {
        Self {
            icon,
            similarity: None,
            score: None,
        }
    }

    pub fn semantic(icon: Arc<IconRecord>, similarity: f32) -> Self {
        Self {
            icon,
            similarity: Some(similarity),
            score: None,
        }
    }

    pub fn lexical(icon: Arc<IconRecord>, score: u8) -> Self {
        Self {
            icon,
            similarity: None,
            score: Some(score),
        }
    }

    pub fn name(&self) -> &str {
        &self.icon.name
    }
}

/// Which ranking produced a result list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPath {
    /// Empty query: the whole catalog in name order
    All,
    Semantic,
    Lexical,
}

/// Ranked results for one query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub path: SearchPath,
    /// The embedding model was unavailable, so only lexical matching ran
    pub degraded: bool,
    pub results: Vec<SearchResult>,
}

impl SearchOutcome {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.results.iter().map(SearchResult::name).collect()
    }
}
