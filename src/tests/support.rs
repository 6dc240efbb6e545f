//! Test doubles and on-disk fixtures shared by the scenario tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::family::CodeFamily;
use crate::registry::{CodeRegistry, EmbedderFactory};
use crate::semantic::embeddings::{model_id, EmbeddingError, QueryEmbedder};
use crate::semantic::index::EmbeddingMatrix;
use crate::semantic::lexical::{LexicalScorer, WeightedRatio};
use crate::semantic::storage::EmbeddingStorage;

pub const MODEL_NAME: &str = "keyword-test";

/// One dimension per keyword.
pub const KEYWORDS: [&str; 4] = ["cholera", "varicella", "appendicitis", "pain"];

/// Embeds text as keyword occurrence counts, so similarity is predictable.
#[derive(Debug, Default)]
pub struct KeywordEmbedder;

impl QueryEmbedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.to_lowercase();
        Ok(KEYWORDS
            .iter()
            .map(|keyword| text.matches(keyword).count() as f32)
            .collect())
    }
}

/// `WeightedRatio` that counts how often it is consulted.
#[derive(Debug, Default)]
pub struct SpyScorer {
    calls: AtomicUsize,
}

impl SpyScorer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LexicalScorer for SpyScorer {
    fn score(&self, query: &str, candidate: &str) -> f64 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        WeightedRatio.score(query, candidate)
    }
}

/// Diagnosis catalog: three codes with embeddings plus one lexical-only code.
pub fn diagnosis_catalog() -> Catalog {
    Catalog::from_entries([
        ("A00", "Cholera"),
        ("B01", "Varicella"),
        ("C02", "Acute appendicitis"),
        ("D03", "Chest pain"),
    ])
}

/// Unit rows for A00, B01 and C02 along the first three keyword axes.
pub fn diagnosis_matrix() -> EmbeddingMatrix {
    EmbeddingMatrix::from_rows(
        vec!["A00".into(), "B01".into(), "C02".into()],
        KEYWORDS.len(),
        vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0],
        ],
    )
    .unwrap()
}

/// A temporary base directory with config, artifacts and spies.
pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    pub scorer: Arc<SpyScorer>,
    pub factory_calls: Arc<AtomicUsize>,
}

impl Fixture {
    /// No artifacts on disk.
    pub fn empty() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_base_path(dir.path());
        config.model = MODEL_NAME.to_string();

        Self {
            dir,
            config,
            scorer: Arc::new(SpyScorer::default()),
            factory_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Diagnosis catalog and embedding store in place; procedure absent.
    pub fn with_diagnosis() -> Self {
        let fixture = Self::empty();
        fixture.write_catalog(CodeFamily::Diagnosis, &diagnosis_catalog());
        fixture.write_matrix(CodeFamily::Diagnosis, &diagnosis_matrix(), MODEL_NAME);
        fixture
    }

    pub fn storage(&self) -> EmbeddingStorage {
        EmbeddingStorage::new(self.config.data_path())
    }

    pub fn write_catalog(&self, family: CodeFamily, catalog: &Catalog) {
        catalog.save(&self.config.catalog_path(family)).unwrap();
    }

    pub fn write_matrix(&self, family: CodeFamily, matrix: &EmbeddingMatrix, model: &str) {
        self.storage().save(family, matrix, &model_id(model)).unwrap();
    }

    pub fn registry(&self) -> CodeRegistry {
        let calls = Arc::clone(&self.factory_calls);
        let factory: EmbedderFactory = Box::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(KeywordEmbedder) as Arc<dyn QueryEmbedder>)
        });

        CodeRegistry::with_components(
            &self.config,
            factory,
            Arc::clone(&self.scorer) as Arc<dyn LexicalScorer>,
        )
    }

    pub fn embedder_loads(&self) -> usize {
        self.factory_calls.load(Ordering::SeqCst)
    }
}

pub fn codes(suggestions: &[crate::semantic::Suggestion]) -> Vec<&str> {
    suggestions.iter().map(|s| s.code.as_str()).collect()
}
