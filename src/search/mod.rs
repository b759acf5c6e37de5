pub mod embeddings;
pub mod hybrid;
pub mod lexical;
mod result;
pub mod session;
pub mod similarity;

pub use embeddings::{Embedder, ModelEvent, ModelLoader, ModelStatus, OnnxModelLoader, QueryEmbedder};
pub use hybrid::{HybridSearch, SearchLimits, SearchMode};
pub use lexical::lexical_search;
pub use result::{SearchOutcome, SearchPath, SearchResult};
pub use session::{SearchSession, Submission};
pub use similarity::{cosine_similarity, vector_search};
