pub mod cag;
pub mod embed;
pub mod engine;
pub mod error;
pub mod index;
pub mod keywords;

pub use cag::CagBuilder;
pub use embed::{Embedder, FastEmbedder};
pub use engine::{RetrievalEngine, ScoredEvent, SearchFilters};
pub use error::RetrievalError;
pub use index::VectorIndex;
