//! Semantic and lexical search over a pre-built icon catalog.
//!
//! The catalog (a SQLite file with precomputed sentence embeddings) is loaded
//! once with [`load_catalog`]. Queries go through [`HybridSearch`], which
//! ranks by cosine similarity to the query's embedding and falls back to
//! tiered substring matching when the model is unavailable or finds nothing.
//! [`SearchSession`] adds debouncing and discards superseded queries.

pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod search;
pub mod server;

pub use catalog::{load_catalog, Catalog, IconRecord};
pub use config::Config;
pub use error::{Error, Result};
pub use search::{HybridSearch, QueryEmbedder, SearchMode, SearchOutcome, SearchResult, SearchSession};
