//! Offline corpus preparation.
//!
//! Turns raw code tables into the artifacts the registry reads:
//! - `import_file` converts a JSON, CSV or CMS order file into a family catalog
//! - `build_index` embeds every catalog entry and writes the embedding store

use std::path::{Path, PathBuf};
use std::str::FromStr;

use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::catalog::Catalog;
use crate::family::CodeFamily;
use crate::semantic::embeddings::{l2_normalize, model_id, EmbeddingError, QueryEmbedder};
use crate::semantic::index::{EmbeddingMatrix, IndexError};
use crate::semantic::storage::{EmbeddingStorage, StoreError};

const DIAGNOSIS_CODE_KEYS: &[&str] = &["code", "Code", "CODE", "icd_code", "icd10"];
const DIAGNOSIS_DESCRIPTION_KEYS: &[&str] = &[
    "disease",
    "disease_name",
    "diseaseDescription",
    "description",
    "desc",
    "name",
    "term",
];
const PROCEDURE_CODE_KEYS: &[&str] = &["code", "cpt", "cpt4", "CPT4", "CPT"];
const PROCEDURE_DESCRIPTION_KEYS: &[&str] = &[
    "procedure",
    "Procedure",
    "proc",
    "description",
    "desc",
    "name",
];
/// Used only when no description key is present
const FALLBACK_DESCRIPTION_KEY: &str = "category";

/// CMS order file column offsets (code, level, long description).
const ORDER_CODE: (usize, usize) = (6, 14);
const ORDER_LEVEL: usize = 14;
const ORDER_LONG: usize = 77;

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {message}")]
    Json { path: PathBuf, message: String },

    #[error("Invalid CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Unsupported source layout in {path}: {message}")]
    Layout { path: PathBuf, message: String },

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Layout of a raw code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    /// `{code: description}` object or an array of records
    Json,
    /// Headerless `code,description` rows
    Csv,
    /// CMS/CDC ICD-10-CM order file
    Cdc,
}

impl FromStr for ImportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ImportFormat::Json),
            "csv" => Ok(ImportFormat::Csv),
            "cdc" | "cms" | "order" => Ok(ImportFormat::Cdc),
            other => Err(format!("unknown format '{other}' (expected json, csv or cdc)")),
        }
    }
}

static WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));

/// Code-looking values in diagnosis records
static DIAGNOSIS_CODE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[A-Z0-9.]+$").expect("Failed to compile diagnosis code regex"));

/// Code-looking values in procedure records
static PROCEDURE_CODE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{3,6}[A-Z]?$").expect("Failed to compile procedure code regex"));

/// Clean up a raw description: HTML entities, curly quotes, runs of whitespace.
pub fn normalize_description(raw: &str) -> String {
    let unescaped = raw
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    let quoted = unescaped
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201c}', '\u{201d}'], "\"");

    WHITESPACE_REGEX.replace_all(&quoted, " ").trim().to_string()
}

/// Uppercase a diagnosis code and put the dot after the category (`R509` -> `R50.9`).
pub fn format_diagnosis_code(raw: &str) -> String {
    let code = raw.trim().to_uppercase();
    if code.contains('.') || code.chars().count() <= 3 {
        return code;
    }

    let split = code
        .char_indices()
        .nth(3)
        .map(|(idx, _)| idx)
        .unwrap_or(code.len());
    format!("{}.{}", &code[..split], &code[split..])
}

pub fn format_procedure_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn format_code(family: CodeFamily, raw: &str) -> String {
    match family {
        CodeFamily::Diagnosis => format_diagnosis_code(raw),
        CodeFamily::Procedure => format_procedure_code(raw),
    }
}

/// Convert `input` into a catalog for `family` and write it to `output`.
pub fn import_file(
    input: &Path,
    output: &Path,
    family: CodeFamily,
    format: ImportFormat,
) -> Result<Catalog, PrepareError> {
    let catalog = match format {
        ImportFormat::Json => {
            let raw = read_to_string(input)?;
            let value: Value = serde_json::from_str(&raw).map_err(|e| PrepareError::Json {
                path: input.to_path_buf(),
                message: e.to_string(),
            })?;
            convert_json(&value, family).map_err(|message| PrepareError::Layout {
                path: input.to_path_buf(),
                message,
            })?
        }
        ImportFormat::Csv => {
            let file = std::fs::File::open(input).map_err(|source| PrepareError::Read {
                path: input.to_path_buf(),
                source,
            })?;
            convert_csv(file, family).map_err(|source| PrepareError::Csv {
                path: input.to_path_buf(),
                source,
            })?
        }
        ImportFormat::Cdc => convert_order_file(&read_to_string(input)?),
    };

    if catalog.is_empty() {
        log::warn!("No {} codes found in {}", family, input.display());
    }

    catalog.save(output).map_err(|source| PrepareError::Write {
        path: output.to_path_buf(),
        source,
    })?;

    log::info!(
        "Imported {} {} codes from {} into {}",
        catalog.len(),
        family,
        input.display(),
        output.display()
    );
    Ok(catalog)
}

fn read_to_string(path: &Path) -> Result<String, PrepareError> {
    std::fs::read_to_string(path).map_err(|source| PrepareError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Convert a parsed JSON source. Objects map code to description directly;
/// arrays hold one record per code and are mined with key heuristics.
pub fn convert_json(value: &Value, family: CodeFamily) -> Result<Catalog, String> {
    match value {
        Value::Object(map) => Ok(Catalog::from_entries(map.iter().map(|(code, desc)| {
            (
                format_code(family, code),
                normalize_description(&value_text(desc)),
            )
        }))),
        Value::Array(records) => Ok(Catalog::from_entries(
            records
                .iter()
                .filter_map(Value::as_object)
                .filter_map(|record| convert_record(record, family)),
        )),
        _ => Err("expected a JSON object or an array of records".to_string()),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// First non-empty value among `keys`, in key order.
fn first_present(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| record.get(*key))
        .map(value_text)
        .find(|text| !text.trim().is_empty())
}

fn convert_record(record: &Map<String, Value>, family: CodeFamily) -> Option<(String, String)> {
    let (code_keys, description_keys, code_re) = match family {
        CodeFamily::Diagnosis => (
            DIAGNOSIS_CODE_KEYS,
            DIAGNOSIS_DESCRIPTION_KEYS,
            &*DIAGNOSIS_CODE_REGEX,
        ),
        CodeFamily::Procedure => (
            PROCEDURE_CODE_KEYS,
            PROCEDURE_DESCRIPTION_KEYS,
            &*PROCEDURE_CODE_REGEX,
        ),
    };

    let strings: Vec<&str> = record.values().filter_map(Value::as_str).collect();

    let code = first_present(record, code_keys).or_else(|| {
        strings
            .iter()
            .find(|s| code_re.is_match(s.trim()))
            .map(|s| s.to_string())
    })?;

    let description = first_present(record, description_keys)
        .or_else(|| first_present(record, &[FALLBACK_DESCRIPTION_KEY]))
        .or_else(|| longest_text(&strings))
        .unwrap_or_default();

    Some((format_code(family, &code), normalize_description(&description)))
}

/// Longest string that is not all digits, else the longest string.
fn longest_text(strings: &[&str]) -> Option<String> {
    let mut sorted = strings.to_vec();
    // stable: equal lengths keep record order
    sorted.sort_by_key(|s| std::cmp::Reverse(s.len()));

    sorted
        .iter()
        .find(|s| !s.trim().chars().all(|c| c.is_ascii_digit()))
        .or_else(|| sorted.first())
        .map(|s| s.to_string())
}

/// Convert headerless `code,description` rows. Short rows are skipped.
pub fn convert_csv<R: std::io::Read>(reader: R, family: CodeFamily) -> Result<Catalog, csv::Error> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut pairs = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        if let (Some(code), Some(description)) = (record.get(0), record.get(1)) {
            if code.trim().is_empty() {
                continue;
            }
            pairs.push((format_code(family, code), normalize_description(description)));
        }
    }

    Ok(Catalog::from_entries(pairs))
}

/// Convert a CMS ICD-10-CM order file, keeping billable (level 1) codes only.
///
/// Lines in the fixed-width layout are sliced by column; shorter lines fall
/// back to whitespace fields `order code level short long`.
pub fn convert_order_file(contents: &str) -> Catalog {
    Catalog::from_entries(contents.lines().filter_map(parse_order_line))
}

fn parse_order_line(line: &str) -> Option<(String, String)> {
    let line = line.trim_end();

    let (code, level, long) = if line.is_ascii() && line.len() > ORDER_LONG {
        (
            line[ORDER_CODE.0..ORDER_CODE.1].trim(),
            line[ORDER_LEVEL..ORDER_LEVEL + 1].trim(),
            line[ORDER_LONG..].trim(),
        )
    } else {
        let mut rest = line.trim_start();
        let mut fields = Vec::with_capacity(4);
        for _ in 0..4 {
            let end = rest.find(char::is_whitespace)?;
            fields.push(&rest[..end]);
            rest = rest[end..].trim_start();
        }
        if rest.is_empty() {
            return None;
        }
        // whitespace layout cannot tell short from long text, keep the tail
        (fields[1], fields[2], rest)
    };

    if level != "1" || code.is_empty() {
        return None;
    }

    Some((format_diagnosis_code(code), normalize_description(long)))
}

/// Text embedded for a catalog entry: `"{code} {description}"`, or the bare
/// code when the description is empty.
pub fn embedding_text(code: &str, description: &str) -> String {
    if description.is_empty() {
        code.to_string()
    } else {
        format!("{} {}", code, description)
    }
}

/// Embed every entry of `catalog` and write the `family` embedding store.
///
/// Rows are unit-normalized before saving; zero rows are stored as-is.
pub fn build_index(
    catalog: &Catalog,
    family: CodeFamily,
    embedder: &dyn QueryEmbedder,
    storage: &EmbeddingStorage,
    batch_size: usize,
    show_progress: bool,
) -> Result<EmbeddingMatrix, PrepareError> {
    let batch_size = batch_size.max(1);
    let codes: Vec<String> = catalog.entries().iter().map(|e| e.code.clone()).collect();
    let texts: Vec<String> = catalog
        .entries()
        .iter()
        .map(|e| embedding_text(&e.code, &e.description))
        .collect();

    let progress = if show_progress {
        let bar = ProgressBar::new(texts.len() as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{msg} [{elapsed_precise}] {bar:40} {pos}/{len} ({eta})",
        ) {
            bar.set_style(style);
        }
        bar.set_message(format!("Embedding {}", family));
        bar
    } else {
        ProgressBar::hidden()
    };

    let mut rows: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        let mut embedded = embedder.embed_batch(batch)?;
        if embedded.len() != batch.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "model returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            ))
            .into());
        }
        for row in embedded.iter_mut() {
            l2_normalize(row);
        }
        rows.extend(embedded);
        progress.inc(batch.len() as u64);
    }
    progress.finish_and_clear();

    let dimensions = rows
        .first()
        .map(|row| row.len())
        .unwrap_or_else(|| embedder.dimensions());

    let matrix = EmbeddingMatrix::from_rows(codes, dimensions, rows)?;
    storage.save(family, &matrix, &model_id(embedder.model_name()))?;

    log::info!(
        "Built {} embedding store: {} codes, {} dimensions",
        family,
        matrix.len(),
        matrix.dimensions()
    );
    Ok(matrix)
}
