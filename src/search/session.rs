//! Debounced search session where the latest request wins.
//!
//! Every submission takes a new generation number. After the debounce delay,
//! and again once its results are ready, a submission checks that no newer
//! one has arrived; if one has, its work is dropped and nothing is published.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::catalog::Catalog;
use crate::search::embeddings::QueryEmbedder;
use crate::search::hybrid::{HybridSearch, SearchMode};
use crate::search::result::SearchOutcome;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// What happened to a submitted query
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The query was the latest one; its outcome is now the visible state
    Applied(Arc<SearchOutcome>),
    /// A newer query arrived first; this one's result was discarded
    Superseded,
}

impl Submission {
    pub fn applied(self) -> Option<Arc<SearchOutcome>> {
        match self {
            Submission::Applied(outcome) => Some(outcome),
            Submission::Superseded => None,
        }
    }
}

pub struct SearchSession {
    catalog: Arc<Catalog>,
    embedder: Option<Arc<QueryEmbedder>>,
    debounce: Duration,
    generation: AtomicU64,
    visible: watch::Sender<Option<Arc<SearchOutcome>>>,
}

impl SearchSession {
    pub fn new(catalog: Arc<Catalog>, embedder: Option<Arc<QueryEmbedder>>, debounce: Duration) -> Self {
        let (visible, _) = watch::channel(None);
        Self {
            catalog,
            embedder,
            debounce,
            generation: AtomicU64::new(0),
            visible,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn embedder(&self) -> Option<&Arc<QueryEmbedder>> {
        self.embedder.as_ref()
    }

    /// Watch the visible results. Only applied outcomes are ever published.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<SearchOutcome>>> {
        self.visible.subscribe()
    }

    /// The most recently applied outcome
    pub fn latest(&self) -> Option<Arc<SearchOutcome>> {
        self.visible.borrow().clone()
    }

    /// Discard whatever is in flight without starting a new search
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn submit(&self, query: &str) -> Submission {
        self.submit_with_mode(query, SearchMode::Hybrid).await
    }

    pub async fn submit_with_mode(&self, query: &str, mode: SearchMode) -> Submission {
        let token = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
        }
        if !self.is_current(token) {
            tracing::debug!("Query '{}' superseded during debounce", query);
            return Submission::Superseded;
        }

        let engine = HybridSearch::new(&self.catalog, self.embedder.as_deref());
        let outcome = Arc::new(engine.search_with_mode(query, mode).await);

        // Checked under the channel's write lock so a stale result can never
        // overwrite a newer one
        let published = self.visible.send_if_modified(|visible| {
            if self.is_current(token) {
                *visible = Some(Arc::clone(&outcome));
                true
            } else {
                false
            }
        });

        if published {
            tracing::debug!(
                "Applied {} results for '{}' ({:?} path)",
                outcome.len(),
                query,
                outcome.path
            );
            Submission::Applied(outcome)
        } else {
            tracing::debug!("Discarding late results for superseded query '{}'", query);
            Submission::Superseded
        }
    }

    /// Run a search right away, outside the debounce and generation
    /// tracking. Nothing is published to subscribers.
    pub async fn search_now(&self, query: &str, mode: SearchMode) -> SearchOutcome {
        HybridSearch::new(&self.catalog, self.embedder.as_deref())
            .search_with_mode(query, mode)
            .await
    }

    fn is_current(&self, token: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == token
    }
}
