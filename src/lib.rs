//! Medical code suggestion.
//!
//! Matches free-text clinical descriptions against ICD-10 diagnosis codes and
//! CPT-4 procedure codes. Semantic top-k search over precomputed embeddings
//! runs first; fuzzy lexical matching fills in when the semantic side is not
//! confident enough.

pub mod catalog;
pub mod config;
pub mod family;
pub mod prepare;
pub mod registry;
pub mod semantic;

#[cfg(test)]
mod tests;

pub use catalog::{Catalog, CatalogEntry, CatalogError};
pub use config::{Config, ConfigError, Thresholds};
pub use family::CodeFamily;
pub use prepare::{ImportFormat, PrepareError};
pub use registry::{CodeRegistry, EmbedderFactory, ErrorKind, SuggestError};
pub use semantic::{Score, SuggestMethod, Suggestion};
