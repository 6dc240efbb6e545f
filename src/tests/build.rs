use crate::catalog::Catalog;
use crate::family::CodeFamily;
use crate::prepare::{build_index, import_file, ImportFormat};
use crate::semantic::embeddings::model_id;
use crate::semantic::hybrid::{Score, SuggestMethod};
use crate::tests::support::{Fixture, KeywordEmbedder, MODEL_NAME};

#[test]
fn test_import_build_and_suggest() {
    let fixture = Fixture::empty();
    let source = fixture.dir.path().join("ICD10.json");
    std::fs::write(
        &source,
        r#"[
            {"code": "A000", "disease": "Cholera due to Vibrio cholerae"},
            {"code": "B019", "disease": "Varicella without complication"},
            {"code": "K3580", "disease": "Unspecified acute appendicitis"},
            {"code": "R0789", "disease": "Other chest pain"}
        ]"#,
    )
    .unwrap();

    let catalog_path = fixture.config.catalog_path(CodeFamily::Diagnosis);
    let catalog = import_file(&source, &catalog_path, CodeFamily::Diagnosis, ImportFormat::Json)
        .unwrap();
    assert_eq!(codes_of(&catalog), vec!["A00.0", "B01.9", "K35.80", "R07.89"]);

    let matrix = build_index(
        &catalog,
        CodeFamily::Diagnosis,
        &KeywordEmbedder,
        &fixture.storage(),
        3,
        false,
    )
    .unwrap();
    assert_eq!(matrix.len(), 4);
    assert_eq!(matrix.dimensions(), 4);

    let loaded = fixture
        .storage()
        .load(CodeFamily::Diagnosis, Some(&model_id(MODEL_NAME)))
        .unwrap();
    assert_eq!(loaded.codes(), matrix.codes());
    for row in 0..loaded.len() {
        let norm = loaded.row(row).iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    let registry = fixture.registry();
    let results = registry
        .suggest("varicella", CodeFamily::Diagnosis, 2, SuggestMethod::Hybrid)
        .unwrap();
    assert_eq!(results[0].code, "B01.9");
    assert_eq!(results[0].description, "Varicella without complication");
    assert_eq!(results[0].score, Score::Semantic(1.0));
    assert_eq!(fixture.scorer.calls(), 0);
}

#[test]
fn test_build_index_keeps_zero_rows() {
    let fixture = Fixture::empty();
    let catalog = Catalog::from_entries([("Z00.00", "General adult examination"), ("A00", "")]);

    let matrix = build_index(
        &catalog,
        CodeFamily::Diagnosis,
        &KeywordEmbedder,
        &fixture.storage(),
        512,
        false,
    )
    .unwrap();

    assert_eq!(matrix.row(0), &[0.0f32; 4]);
    assert_eq!(matrix.row(1), &[0.0f32; 4]);
}

#[test]
fn test_build_index_empty_catalog() {
    let fixture = Fixture::empty();
    let matrix = build_index(
        &Catalog::default(),
        CodeFamily::Procedure,
        &KeywordEmbedder,
        &fixture.storage(),
        512,
        false,
    )
    .unwrap();

    assert!(matrix.is_empty());
    assert_eq!(matrix.dimensions(), 4);

    let loaded = fixture
        .storage()
        .load(CodeFamily::Procedure, None)
        .unwrap();
    assert!(loaded.is_empty());
}

fn codes_of(catalog: &Catalog) -> Vec<&str> {
    catalog.entries().iter().map(|e| e.code.as_str()).collect()
}
