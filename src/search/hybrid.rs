//! Hybrid search: semantic ranking first, lexical matching as the fallback.
//!
//! The two rankings are never blended. A query is answered by the vector
//! path when the model is available and finds candidates, otherwise by the
//! lexical path.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::search::embeddings::QueryEmbedder;
use crate::search::lexical::{lexical_search, LEXICAL_LIMIT};
use crate::search::result::{SearchOutcome, SearchPath, SearchResult};
use crate::search::similarity::{vector_search, VECTOR_LIMIT};

/// Result-size caps for each path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    pub vector: usize,
    pub lexical: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            vector: VECTOR_LIMIT,
            lexical: LEXICAL_LIMIT,
        }
    }
}

/// Hybrid search engine over a loaded catalog
pub struct HybridSearch<'a> {
    catalog: &'a Catalog,
    embedder: Option<&'a QueryEmbedder>,
    limits: SearchLimits,
}

impl<'a> HybridSearch<'a> {
    /// Create a new hybrid search engine. Without an embedder every query is
    /// answered lexically.
    pub fn new(catalog: &'a Catalog, embedder: Option<&'a QueryEmbedder>) -> Self {
        Self {
            catalog,
            embedder,
            limits: SearchLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: SearchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Search with the default hybrid policy
    pub async fn search(&self, query: &str) -> SearchOutcome {
        self.search_with_mode(query, SearchMode::Hybrid).await
    }

    pub async fn search_with_mode(&self, query: &str, mode: SearchMode) -> SearchOutcome {
        if query.trim().is_empty() {
            return self.all(query);
        }

        match mode {
            SearchMode::Keyword => self.keyword_search(query),
            SearchMode::Semantic => match self.semantic_search(query).await {
                Ok(results) => self.outcome(query, SearchPath::Semantic, false, results),
                Err(e) => {
                    tracing::debug!("Semantic search for '{}' failed: {}", query, e);
                    self.outcome(query, SearchPath::Semantic, is_model_failure(&e), Vec::new())
                }
            },
            SearchMode::Hybrid => {
                let degraded = match self.semantic_search(query).await {
                    Ok(results) if !results.is_empty() => {
                        return self.outcome(query, SearchPath::Semantic, false, results);
                    }
                    Ok(_) => {
                        tracing::debug!("No semantic candidates for '{}', using lexical search", query);
                        false
                    }
                    Err(e) => {
                        tracing::debug!("Semantic search for '{}' unavailable ({}), using lexical search", query, e);
                        is_model_failure(&e)
                    }
                };

                let results = lexical_search(self.catalog, query, self.limits.lexical);
                self.outcome(query, SearchPath::Lexical, degraded, results)
            }
        }
    }

    /// Lexical-only search
    pub fn keyword_search(&self, query: &str) -> SearchOutcome {
        if query.trim().is_empty() {
            return self.all(query);
        }
        let results = lexical_search(self.catalog, query, self.limits.lexical);
        self.outcome(query, SearchPath::Lexical, false, results)
    }

    /// Vector-only search. Fails when no embedder is configured, the query
    /// cannot be embedded, or the model's vectors cannot be compared with the
    /// catalog's.
    pub async fn semantic_search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let embedder = self
            .embedder
            .ok_or_else(|| Error::ModelUnavailable("semantic search is disabled".to_string()))?;
        let query_embedding = embedder.embed_query(query).await?;
        if let Some(dim) = self.catalog.dimension()
            && dim != query_embedding.len()
        {
            return Err(Error::ModelUnavailable(format!(
                "model {} produces {}-dimensional embeddings but the catalog uses {}",
                embedder.model_name(),
                query_embedding.len(),
                dim
            )));
        }
        Ok(vector_search(self.catalog, &query_embedding, self.limits.vector))
    }

    /// The whole catalog in name order, unranked
    fn all(&self, query: &str) -> SearchOutcome {
        let results = self.catalog.records().cloned().map(SearchResult::unranked).collect();
        self.outcome(query, SearchPath::All, false, results)
    }

    fn outcome(&self, query: &str, path: SearchPath, degraded: bool, results: Vec<SearchResult>) -> SearchOutcome {
        SearchOutcome {
            query: query.to_string(),
            path,
            degraded,
            results,
        }
    }
}

/// Only a missing model counts as reduced capability; a bad query embedding
/// from a working model does not.
fn is_model_failure(e: &Error) -> bool {
    matches!(e, Error::ModelUnavailable(_))
}

/// Search mode for the search tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchMode {
    /// Semantic search with lexical fallback
    #[default]
    Hybrid,
    /// Lexical matching only
    Keyword,
    /// Embedding similarity only, no fallback
    Semantic,
}

impl SearchMode {
    /// Parse search mode from string
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "keyword" | "lexical" | "text" => SearchMode::Keyword,
            "semantic" | "embedding" | "vector" => SearchMode::Semantic,
            _ => SearchMode::Hybrid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::icon;
    use crate::catalog::IconRecord;
    use crate::search::embeddings::tests::{letter_vector, FakeLoader};
    use crate::search::lexical::SCORE_EXACT_NAME;

    fn embedded(name: &str, description: &str) -> IconRecord {
        icon(name, description, Some(letter_vector(name)))
    }

    fn sample_catalog() -> Catalog {
        Catalog::from_records(
            vec![
                embedded("notepad", "a text editor"),
                embedded("calculator", "a simple calculator tool"),
                embedded("axe", "a woodcutting axe"),
                embedded("box", "a cardboard box"),
                icon("unprocessed", "an icon without an embedding", None),
            ],
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_query_returns_whole_catalog_sorted() {
        let catalog = sample_catalog();
        let embedder = QueryEmbedder::new(FakeLoader::failing());
        let engine = HybridSearch::new(&catalog, Some(&embedder));

        for query in ["", "   ", "\t\n"] {
            let outcome = engine.search(query).await;
            assert_eq!(outcome.path, SearchPath::All);
            assert_eq!(outcome.names(), vec!["axe", "box", "calculator", "notepad", "unprocessed"]);
            assert!(outcome.results.iter().all(|r| r.similarity.is_none() && r.score.is_none()));
        }

        // The model is never touched for an empty query
        assert_eq!(embedder.status(), crate::search::embeddings::ModelStatus::Unloaded);
    }

    #[tokio::test]
    async fn test_semantic_path_preferred() {
        let catalog = sample_catalog();
        let embedder = QueryEmbedder::new(FakeLoader::ready());
        let engine = HybridSearch::new(&catalog, Some(&embedder));

        let outcome = engine.search("ax").await;
        assert_eq!(outcome.path, SearchPath::Semantic);
        assert!(!outcome.degraded);
        assert_eq!(outcome.results[0].name(), "axe");
        assert!(outcome.results.iter().all(|r| r.similarity.is_some()));
        assert!(outcome.names().iter().all(|n| *n != "unprocessed"));
        assert!(outcome.len() <= VECTOR_LIMIT);
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_lexical() {
        let catalog = sample_catalog();
        let embedder = QueryEmbedder::new(FakeLoader::failing());
        let engine = HybridSearch::new(&catalog, Some(&embedder));

        let outcome = engine.search("calculator").await;
        assert_eq!(outcome.path, SearchPath::Lexical);
        assert!(outcome.degraded);
        assert_eq!(outcome.names(), vec!["calculator"]);
        assert_eq!(outcome.results[0].score, Some(SCORE_EXACT_NAME));
    }

    #[tokio::test]
    async fn test_no_embedder_is_lexical() {
        let catalog = sample_catalog();
        let engine = HybridSearch::new(&catalog, None);

        let outcome = engine.search("editor").await;
        assert_eq!(outcome.path, SearchPath::Lexical);
        assert_eq!(outcome.names(), vec!["notepad"]);
    }

    #[tokio::test]
    async fn test_empty_vector_candidates_fall_back() {
        // Zero vectors have no direction, so the vector scan finds nothing
        // and the lexical path answers
        let catalog = Catalog::from_records(
            vec![
                icon("axe", "a woodcutting axe", Some(vec![0.0; 4])),
                icon("box", "a cardboard box", Some(vec![0.0; 4])),
            ],
            None,
        )
        .unwrap();
        let embedder = QueryEmbedder::new(FakeLoader::ready());
        let engine = HybridSearch::new(&catalog, Some(&embedder));

        let outcome = engine.search("cardboard").await;
        assert_eq!(outcome.path, SearchPath::Lexical);
        assert!(!outcome.degraded);
        assert_eq!(outcome.names(), vec!["box"]);
    }

    #[tokio::test]
    async fn test_model_dimension_mismatch_is_degraded() {
        // The fake model produces 4-d vectors; the catalog is 2-d
        let catalog = Catalog::from_records(
            vec![
                icon("axe", "a woodcutting axe", Some(vec![1.0, 0.0])),
                icon("box", "a cardboard box", Some(vec![0.0, 1.0])),
            ],
            None,
        )
        .unwrap();
        let embedder = QueryEmbedder::new(FakeLoader::ready());
        let engine = HybridSearch::new(&catalog, Some(&embedder));

        let outcome = engine.search("cardboard").await;
        assert_eq!(outcome.path, SearchPath::Lexical);
        assert!(outcome.degraded);
        assert_eq!(outcome.names(), vec!["box"]);

        let outcome = engine.search_with_mode("cardboard", SearchMode::Semantic).await;
        assert!(outcome.is_empty());
        assert!(outcome.degraded);
    }

    #[tokio::test]
    async fn test_bad_query_embedding_falls_back_without_degrading() {
        let catalog = sample_catalog();
        let embedder = QueryEmbedder::new(FakeLoader::ready());
        let engine = HybridSearch::new(&catalog, Some(&embedder));

        // No tracked letters, so the fake model yields a zero vector
        let outcome = engine.search("simpl").await;
        assert_eq!(outcome.path, SearchPath::Lexical);
        assert!(!outcome.degraded);
        assert_eq!(outcome.names(), vec!["calculator"]);
    }

    #[tokio::test]
    async fn test_search_is_idempotent() {
        let catalog = sample_catalog();
        let embedder = QueryEmbedder::new(FakeLoader::ready());
        let engine = HybridSearch::new(&catalog, Some(&embedder));

        let first = engine.search("a box").await;
        let second = engine.search("a box").await;
        assert_eq!(first, second);

        let first = engine.keyword_search("a");
        let second = engine.keyword_search("a");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_modes() {
        let catalog = sample_catalog();
        let embedder = QueryEmbedder::new(FakeLoader::failing());
        let engine = HybridSearch::new(&catalog, Some(&embedder));

        let outcome = engine.search_with_mode("axe", SearchMode::Semantic).await;
        assert_eq!(outcome.path, SearchPath::Semantic);
        assert!(outcome.is_empty());
        assert!(outcome.degraded);

        let outcome = engine.search_with_mode("axe", SearchMode::Keyword).await;
        assert_eq!(outcome.path, SearchPath::Lexical);
        assert!(!outcome.degraded);
        assert_eq!(outcome.names(), vec!["axe"]);
    }

    #[tokio::test]
    async fn test_custom_limits() {
        let catalog = sample_catalog();
        let engine = HybridSearch::new(&catalog, None).with_limits(SearchLimits { vector: 1, lexical: 2 });

        let outcome = engine.search("a").await;
        assert_eq!(outcome.len(), 2);
    }

    #[test]
    fn test_search_mode_parse() {
        assert_eq!(SearchMode::parse("keyword"), SearchMode::Keyword);
        assert_eq!(SearchMode::parse(" Lexical "), SearchMode::Keyword);
        assert_eq!(SearchMode::parse("vector"), SearchMode::Semantic);
        assert_eq!(SearchMode::parse("whatever"), SearchMode::Hybrid);
    }
}
