//! Retrieval building blocks for code suggestion.
//!
//! # Architecture
//!
//! - `embeddings`: Wraps fastembed for query and corpus embedding
//! - `index`: In-memory embedding matrix with top-k dot-product search
//! - `storage`: Binary file I/O for the per-family embedding store
//! - `lexical`: Fuzzy string scoring over the code catalog
//! - `hybrid`: Threshold gate and merge of semantic and lexical candidates

pub mod embeddings;
pub mod hybrid;
pub mod index;
pub mod lexical;
pub mod storage;

pub use embeddings::{embed_query, model_id, EmbeddingError, EmbeddingModel, QueryEmbedder};
pub use hybrid::{merge_candidates, needs_lexical, Score, SuggestMethod, Suggestion};
pub use index::{EmbeddingMatrix, IndexError, SearchResult};
pub use lexical::{LexicalResult, LexicalScorer, WeightedRatio};
pub use storage::{EmbeddingStorage, StoreError};
