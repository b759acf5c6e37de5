//! Brute-force cosine similarity scan over the catalog's embeddings.
//!
//! A few thousand short vectors is small enough that a linear pass beats
//! maintaining an approximate index.

use std::cmp::Ordering;

use crate::catalog::Catalog;
use crate::error::Error;
use crate::search::result::SearchResult;

/// Maximum number of results from the vector path
pub const VECTOR_LIMIT: usize = 50;

/// Cosine similarity `dot(a,b) / (|a| * |b|)`.
///
/// Returns `None` when the lengths differ, either vector has zero magnitude,
/// or the result is not finite.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let similarity = dot / (norm_a * norm_b);
    similarity.is_finite().then_some(similarity)
}

/// Scale a vector to unit length in place. Returns false for zero or
/// non-finite vectors, which are left untouched.
pub fn l2_normalize(vec: &mut [f32]) -> bool {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for val in vec.iter_mut() {
        *val /= norm;
    }
    true
}

/// Rank catalog records by similarity to `query_embedding`.
///
/// Records without an embedding are ignored. Records whose embedding does not
/// match the query's dimension, or the catalog's declared one, are skipped and
/// logged without aborting the scan.
pub fn vector_search(catalog: &Catalog, query_embedding: &[f32], limit: usize) -> Vec<SearchResult> {
    if let Some(dim) = catalog.dimension()
        && dim != query_embedding.len()
    {
        tracing::warn!(
            "Query embedding has {} dimensions but the catalog uses {}",
            query_embedding.len(),
            dim
        );
    }

    let mut skipped = 0usize;
    let mut results: Vec<SearchResult> = Vec::new();

    for record in catalog.records() {
        let Some(embedding) = record.embedding.as_deref() else {
            continue;
        };

        let declared_ok = catalog.dimension().is_none_or(|d| d == embedding.len());
        let similarity = if declared_ok {
            cosine_similarity(query_embedding, embedding)
        } else {
            None
        };

        match similarity {
            Some(similarity) => results.push(SearchResult::semantic(record.clone(), similarity)),
            None => {
                skipped += 1;
                let anomaly = Error::MalformedRecord {
                    name: record.name.clone(),
                    reason: format!(
                        "embedding of {} dimensions not comparable with a {}-dimensional query",
                        embedding.len(),
                        query_embedding.len()
                    ),
                };
                tracing::debug!("Skipping in vector scan: {}", anomaly);
            }
        }
    }

    if skipped > 0 {
        tracing::warn!("Vector scan skipped {} icons with malformed embeddings", skipped);
    }

    results.sort_by(compare_by_similarity);
    results.truncate(limit);
    results
}

/// Similarity descending, then name ascending.
///
/// Scores are finite here, so `partial_cmp` is total; it also treats `0.0`
/// and `-0.0` as equal, leaving that tie to the name.
fn compare_by_similarity(a: &SearchResult, b: &SearchResult) -> Ordering {
    let sa = a.similarity.unwrap_or(f32::NEG_INFINITY);
    let sb = b.similarity.unwrap_or(f32::NEG_INFINITY);
    sb.partial_cmp(&sa)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.icon.name.cmp(&b.icon.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::icon;
    use proptest::prelude::*;

    #[test]
    fn test_cosine_basic() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]), Some(-1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        assert!(l2_normalize(&mut v));
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        assert!(!l2_normalize(&mut zero));
    }

    #[test]
    fn test_vector_search_ranks_and_breaks_ties_by_name() {
        let catalog = Catalog::from_records(
            vec![
                icon("telephone", "a desk phone", Some(vec![1.0, 0.0, 0.0])),
                icon("bell", "a bell", Some(vec![0.0, 2.0, 0.0])),
                icon("alarm", "an alarm", Some(vec![0.0, 1.0, 0.0])),
                icon("modem", "a dial-up modem", Some(vec![0.7, 0.7, 0.0])),
                icon("folder", "a folder", None),
            ],
            None,
        )
        .unwrap();

        let results = vector_search(&catalog, &[0.0, 1.0, 0.0], VECTOR_LIMIT);
        let names: Vec<&str> = results.iter().map(SearchResult::name).collect();
        assert_eq!(names, vec!["alarm", "bell", "modem", "telephone"]);
        assert!((results[0].similarity.unwrap() - 1.0).abs() < 1e-6);
        assert!(results.iter().all(|r| r.score.is_none()));
    }

    #[test]
    fn test_signed_zero_similarity_ties_by_name() {
        let catalog = Catalog::from_records(
            vec![
                icon("b", "", Some(vec![0.0, 1.0])),
                icon("a", "", Some(vec![-0.0, 1.0])),
            ],
            None,
        )
        .unwrap();

        let results = vector_search(&catalog, &[1.0, -0.0], VECTOR_LIMIT);
        let names: Vec<&str> = results.iter().map(SearchResult::name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(results.iter().all(|r| r.similarity == Some(0.0)));
    }

    #[test]
    fn test_vector_search_skips_mismatched_dimension() {
        let mut records: Vec<_> = (0..5)
            .map(|i| {
                let mut e = vec![0.0f32; 768];
                e[i] = 1.0;
                icon(&format!("icon-{}", i), "", Some(e))
            })
            .collect();
        records.push(icon("odd-one", "", Some(vec![1.0; 384])));
        let catalog = Catalog::from_records(records, None).unwrap();
        assert_eq!(catalog.dimension(), Some(768));

        let mut query = vec![0.0f32; 768];
        query[0] = 1.0;
        let results = vector_search(&catalog, &query, VECTOR_LIMIT);
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].name(), "icon-0");
        assert!(results.iter().all(|r| r.name() != "odd-one"));
    }

    #[test]
    fn test_vector_search_truncates() {
        let records = (0..120)
            .map(|i| icon(&format!("icon-{:03}", i), "", Some(vec![1.0, i as f32])))
            .collect();
        let catalog = Catalog::from_records(records, None).unwrap();

        let results = vector_search(&catalog, &[1.0, 1.0], VECTOR_LIMIT);
        assert_eq!(results.len(), VECTOR_LIMIT);
    }

    #[test]
    fn test_vector_search_query_dimension_mismatch_is_empty() {
        let catalog =
            Catalog::from_records(vec![icon("a", "", Some(vec![1.0, 0.0, 0.0]))], None).unwrap();
        assert!(vector_search(&catalog, &[1.0, 0.0], VECTOR_LIMIT).is_empty());
    }

    fn vector(len: usize) -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(-100.0f32..100.0, len)
    }

    proptest! {
        #[test]
        fn prop_self_similarity_is_one(v in vector(16)) {
            prop_assume!(v.iter().any(|x| x.abs() > 1e-3));
            let sim = cosine_similarity(&v, &v).unwrap();
            prop_assert!((sim - 1.0).abs() < 1e-4);
        }

        #[test]
        fn prop_similarity_is_symmetric(a in vector(8), b in vector(8)) {
            prop_assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
        }

        #[test]
        fn prop_similarity_is_bounded(a in vector(8), b in vector(8)) {
            if let Some(sim) = cosine_similarity(&a, &b) {
                prop_assert!((-1.0001..=1.0001).contains(&sim));
            }
        }
    }
}
