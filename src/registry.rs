//! Code registry: owns the loaded catalogs, embedding stores and model.
//!
//! Provides the public suggestion entry points:
//! - Lazy-loads each family's catalog and embedding store on first use
//! - Lazy-loads the embedding model once and shares it across families
//! - Applies the hybrid threshold policy per family
//!
//! Every cache slot is a `Mutex<Option<Arc<_>>>`. The lock is held while the
//! slot is filled, so concurrent first use loads exactly once, and afterwards
//! only long enough to clone the `Arc`. Queries run on the shared immutable
//! data without holding any lock. `clear_cache` empties the slots; queries
//! already running keep their own `Arc` and finish on the old data.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::catalog::{Catalog, CatalogError};
use crate::config::{Config, Thresholds};
use crate::family::CodeFamily;
use crate::semantic::embeddings::{embed_query, model_id, EmbeddingError, EmbeddingModel, QueryEmbedder};
use crate::semantic::hybrid::{merge_candidates, needs_lexical, SuggestMethod, Suggestion};
use crate::semantic::index::{EmbeddingMatrix, IndexError};
use crate::semantic::lexical::{self, LexicalScorer, WeightedRatio};
use crate::semantic::storage::{EmbeddingStorage, StoreError};

/// Builds the query embedder on first semantic use.
pub type EmbedderFactory =
    Box<dyn Fn() -> Result<Arc<dyn QueryEmbedder>, EmbeddingError> + Send + Sync>;

/// Errors surfaced by suggestion operations.
#[derive(Debug, thiserror::Error)]
pub enum SuggestError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a `SuggestError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required artifact or model is missing or unreadable
    Configuration,
    /// Artifacts violate a structural invariant and must be regenerated
    CorruptData,
    /// The query itself cannot be processed
    InvalidInput,
    Internal,
}

impl SuggestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SuggestError::Catalog(CatalogError::Parse { .. }) => ErrorKind::CorruptData,
            SuggestError::Catalog(_) => ErrorKind::Configuration,
            SuggestError::Store(StoreError::Corrupt { .. } | StoreError::ModelMismatch { .. }) => {
                ErrorKind::CorruptData
            }
            SuggestError::Store(_) => ErrorKind::Configuration,
            SuggestError::Index(_) => ErrorKind::CorruptData,
            SuggestError::Embedding(EmbeddingError::EmptyInput) => ErrorKind::InvalidInput,
            SuggestError::Embedding(EmbeddingError::EmbeddingFailed(_)) => ErrorKind::Internal,
            SuggestError::Embedding(_) => ErrorKind::Configuration,
            SuggestError::Internal(_) => ErrorKind::Internal,
        }
    }
}

type Slot<T> = Mutex<Option<Arc<T>>>;

/// Per-family cache slots.
#[derive(Default)]
struct FamilySlots {
    catalog: Slot<Catalog>,
    matrix: Slot<EmbeddingMatrix>,
}

/// Owned cache of everything a suggestion needs.
pub struct CodeRegistry {
    data_dir: PathBuf,
    storage: EmbeddingStorage,
    thresholds: Thresholds,
    overfetch_factor: usize,
    /// Model id stores must carry, when verification is on
    expected_model: Option<[u8; 32]>,
    embedder_factory: EmbedderFactory,
    scorer: Arc<dyn LexicalScorer>,
    embedder: Slot<dyn QueryEmbedder>,
    diagnosis: FamilySlots,
    procedure: FamilySlots,
}

impl CodeRegistry {
    /// Registry backed by the configured fastembed model and `WeightedRatio`.
    ///
    /// Nothing is loaded until the first query or `preload`.
    pub fn new(config: &Config) -> Self {
        let model = config.model.clone();
        let cache_dir = config.base_path().to_path_buf();
        let timeout = Duration::from_secs(config.download_timeout_secs);

        let factory: EmbedderFactory = Box::new(move || {
            let model = EmbeddingModel::new(&model, cache_dir.clone(), Some(timeout))?;
            Ok(Arc::new(model) as Arc<dyn QueryEmbedder>)
        });

        Self::with_components(config, factory, Arc::new(WeightedRatio))
    }

    /// Registry with an injected embedder factory and lexical scorer.
    pub fn with_components(
        config: &Config,
        embedder_factory: EmbedderFactory,
        scorer: Arc<dyn LexicalScorer>,
    ) -> Self {
        let data_dir = config.data_path();
        Self {
            storage: EmbeddingStorage::new(data_dir.clone()),
            data_dir,
            thresholds: config.thresholds.clone(),
            overfetch_factor: config.overfetch_factor.max(1),
            expected_model: config.verify_model.then(|| model_id(&config.model)),
            embedder_factory,
            scorer,
            embedder: Mutex::new(None),
            diagnosis: FamilySlots::default(),
            procedure: FamilySlots::default(),
        }
    }

    pub fn storage(&self) -> &EmbeddingStorage {
        &self.storage
    }

    fn slots(&self, family: CodeFamily) -> &FamilySlots {
        match family {
            CodeFamily::Diagnosis => &self.diagnosis,
            CodeFamily::Procedure => &self.procedure,
        }
    }

    /// Suggest up to `limit` codes of `family` for free-text `query`.
    ///
    /// An empty or whitespace-only query yields no suggestions. Missing or
    /// corrupt artifacts are reported as errors, never as an empty result.
    pub fn suggest(
        &self,
        query: &str,
        family: CodeFamily,
        limit: usize,
        method: SuggestMethod,
    ) -> Result<Vec<Suggestion>, SuggestError> {
        if query.trim().is_empty() {
            log::debug!("Empty {} query, nothing to suggest", family);
            return Ok(vec![]);
        }

        match method {
            SuggestMethod::Semantic => self.semantic_suggest(query, family, limit),
            SuggestMethod::Fuzzy => self.fuzzy_suggest(query, family, limit),
            SuggestMethod::Hybrid => self.hybrid_suggest(query, family, limit),
        }
    }

    /// Semantic-only suggestions. An empty query is an `EmbeddingError::EmptyInput`.
    pub fn semantic_suggest(
        &self,
        query: &str,
        family: CodeFamily,
        limit: usize,
    ) -> Result<Vec<Suggestion>, SuggestError> {
        let matrix = self.matrix(family)?;
        let catalog = self.catalog(family)?;
        let embedder = self.embedder()?;

        let vector = embed_query(embedder.as_ref(), query)?;
        let results = matrix.search(&vector, limit)?;

        Ok(results
            .into_iter()
            .map(|result| {
                if !catalog.contains(&result.code) {
                    log::warn!("{} code {} has no catalog description", family, result.code);
                }
                let description = catalog.description(&result.code);
                Suggestion::from_semantic(result, description)
            })
            .collect())
    }

    /// Lexical-only suggestions over `"{code} {description}"`.
    pub fn fuzzy_suggest(
        &self,
        query: &str,
        family: CodeFamily,
        limit: usize,
    ) -> Result<Vec<Suggestion>, SuggestError> {
        let catalog = self.catalog(family)?;
        let results = lexical::search(query, &catalog, limit, self.scorer.as_ref());
        Ok(results.into_iter().map(Suggestion::from_lexical).collect())
    }

    fn hybrid_suggest(
        &self,
        query: &str,
        family: CodeFamily,
        limit: usize,
    ) -> Result<Vec<Suggestion>, SuggestError> {
        let threshold = self.thresholds.for_family(family);
        let mut semantic =
            self.semantic_suggest(query, family, limit.saturating_mul(self.overfetch_factor))?;

        if needs_lexical(&semantic, threshold) {
            log::debug!(
                "Semantic {} match under threshold {} ({} candidates), adding lexical results",
                family,
                threshold,
                semantic.len()
            );
            let lexical = self.fuzzy_suggest(query, family, limit)?;
            return Ok(merge_candidates(semantic, lexical, limit));
        }

        log::debug!("Semantic {} match above threshold {}", family, threshold);
        semantic.truncate(limit);
        Ok(semantic)
    }

    /// The catalog of `family`, loading it on first use.
    pub fn catalog(&self, family: CodeFamily) -> Result<Arc<Catalog>, SuggestError> {
        let path = self.data_dir.join(family.catalog_file());
        get_or_load(&self.slots(family).catalog, || {
            Ok(Arc::new(Catalog::load(&path, family.as_str())?))
        })
    }

    /// The embedding store of `family`, loading it on first use.
    pub fn matrix(&self, family: CodeFamily) -> Result<Arc<EmbeddingMatrix>, SuggestError> {
        get_or_load(&self.slots(family).matrix, || {
            let start = Instant::now();
            let matrix = self.storage.load(family, self.expected_model.as_ref())?;
            log::info!(
                "Loaded {} {} embeddings ({} dimensions) in {:?}",
                matrix.len(),
                family,
                matrix.dimensions(),
                start.elapsed()
            );
            Ok(Arc::new(matrix))
        })
    }

    fn embedder(&self) -> Result<Arc<dyn QueryEmbedder>, SuggestError> {
        get_or_load(&self.embedder, || {
            let start = Instant::now();
            let embedder = (self.embedder_factory)()?;
            log::info!(
                "Embedding model '{}' ready in {:?}",
                embedder.model_name(),
                start.elapsed()
            );
            Ok(embedder)
        })
    }

    /// Eagerly load the catalog, embedding store and model for `family`.
    pub fn preload(&self, family: CodeFamily) -> Result<(), SuggestError> {
        self.catalog(family)?;
        self.matrix(family)?;
        self.embedder()?;
        Ok(())
    }

    /// Whether both the catalog and the embedding store of `family` are cached.
    pub fn is_loaded(&self, family: CodeFamily) -> bool {
        let slots = self.slots(family);
        is_filled(&slots.catalog) && is_filled(&slots.matrix)
    }

    pub fn is_model_loaded(&self) -> bool {
        is_filled(&self.embedder)
    }

    /// Drop every cached catalog, store and the model. The next query reloads.
    pub fn clear_cache(&self) {
        for family in CodeFamily::ALL {
            let slots = self.slots(family);
            clear(&slots.catalog);
            clear(&slots.matrix);
        }
        clear(&self.embedder);
        log::debug!("Cleared code registry cache");
    }
}

/// Clone the cached value, or fill the slot with `load` under its lock.
fn get_or_load<T, F>(slot: &Slot<T>, load: F) -> Result<Arc<T>, SuggestError>
where
    T: ?Sized,
    F: FnOnce() -> Result<Arc<T>, SuggestError>,
{
    let mut guard = slot
        .lock()
        .map_err(|e| SuggestError::Internal(format!("Lock poisoned: {}", e)))?;

    if let Some(value) = guard.as_ref() {
        return Ok(Arc::clone(value));
    }

    let value = load()?;
    *guard = Some(Arc::clone(&value));
    Ok(value)
}

fn is_filled<T: ?Sized>(slot: &Slot<T>) -> bool {
    slot.lock().map(|guard| guard.is_some()).unwrap_or(false)
}

fn clear<T: ?Sized>(slot: &Slot<T>) {
    // a poisoned slot is emptied too
    let mut guard = match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let missing = SuggestError::from(StoreError::NotFound {
            family: CodeFamily::Diagnosis,
            path: PathBuf::from("icd10_embeddings.bin"),
        });
        assert_eq!(missing.kind(), ErrorKind::Configuration);

        let corrupt = SuggestError::from(StoreError::Corrupt {
            path: PathBuf::from("icd10_embeddings.bin"),
            reason: "3 codes vs 2 rows".to_string(),
        });
        assert_eq!(corrupt.kind(), ErrorKind::CorruptData);

        let empty = SuggestError::from(EmbeddingError::EmptyInput);
        assert_eq!(empty.kind(), ErrorKind::InvalidInput);

        let model = SuggestError::from(EmbeddingError::ModelUnavailable("offline".into()));
        assert_eq!(model.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_store_error_message_is_passed_through() {
        let err = SuggestError::from(StoreError::NotFound {
            family: CodeFamily::Procedure,
            path: PathBuf::from("/data/cpt4_embeddings.bin"),
        });
        let message = err.to_string();
        assert!(message.contains("/data/cpt4_embeddings.bin"));
        assert!(message.contains("medcode build-index --family procedure"));
    }

    #[test]
    fn test_get_or_load_loads_once() {
        let slot: Slot<usize> = Mutex::new(None);
        let mut calls = 0;

        let first = get_or_load(&slot, || {
            calls += 1;
            Ok(Arc::new(7))
        })
        .unwrap();
        let second = get_or_load(&slot, || -> Result<Arc<usize>, SuggestError> {
            unreachable!("slot already filled")
        })
        .unwrap();

        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&first, &second));

        clear(&slot);
        assert!(!is_filled(&slot));
    }

    #[test]
    fn test_failed_load_leaves_slot_empty() {
        let slot: Slot<usize> = Mutex::new(None);
        let result = get_or_load(&slot, || Err(SuggestError::Internal("boom".into())));
        assert!(result.is_err());
        assert!(!is_filled(&slot));
    }
}
