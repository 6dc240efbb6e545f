//! In-memory code catalog: code -> human-readable description.
//!
//! Loaded once per family from `<data_dir>/<family>.json` and never mutated
//! afterwards. Entry order follows the file so lexical ties resolve the same
//! way on every run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Code catalog not found at {path}. Run: medcode import --family {family} <source>")]
    NotFound { path: PathBuf, family: String },

    #[error("Failed to read code catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Code catalog {path} is not a JSON object of code -> description: {message}")]
    Parse { path: PathBuf, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub code: String,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    positions: HashMap<String, usize>,
}

impl Catalog {
    /// Build a catalog from (code, description) pairs.
    ///
    /// A repeated code keeps its first position and takes the last description,
    /// matching how a JSON object with duplicate keys is read.
    pub fn from_entries<I, C, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, D)>,
        C: Into<String>,
        D: Into<String>,
    {
        let mut catalog = Catalog::default();
        for (code, description) in pairs {
            catalog.upsert(code.into(), description.into());
        }
        catalog
    }

    fn upsert(&mut self, code: String, description: String) {
        match self.positions.get(&code) {
            Some(&idx) => self.entries[idx].description = description,
            None => {
                self.positions.insert(code.clone(), self.entries.len());
                self.entries.push(CatalogEntry { code, description });
            }
        }
    }

    /// Load a catalog file. `family` only feeds the remediation hint.
    pub fn load(path: &Path, family: &str) -> Result<Self, CatalogError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CatalogError::NotFound {
                    path: path.to_path_buf(),
                    family: family.to_string(),
                })
            }
            Err(source) => {
                return Err(CatalogError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let map: Map<String, Value> =
            serde_json::from_str(&raw).map_err(|e| CatalogError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let catalog = Self::from_entries(map.into_iter().map(|(code, value)| {
            let description = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (code, description)
        }));

        log::info!("Loaded {} codes from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// Write the catalog as a pretty-printed JSON object, atomically.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let mut map = Map::with_capacity(self.entries.len());
        for entry in &self.entries {
            map.insert(entry.code.clone(), Value::String(entry.description.clone()));
        }
        let json = serde_json::to_string_pretty(&Value::Object(map))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn contains(&self, code: &str) -> bool {
        self.positions.contains_key(code)
    }

    /// Description for `code`, empty when the code is unknown.
    pub fn description(&self, code: &str) -> &str {
        self.positions
            .get(code)
            .map(|&idx| self.entries[idx].description.as_str())
            .unwrap_or("")
    }

    /// Synthetic lexical search string for the entry at `idx`.
    pub fn search_text(&self, idx: usize) -> String {
        let entry = &self.entries[idx];
        format!("{} {}", entry.code, entry.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_preserves_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icd10.json");
        std::fs::write(
            &path,
            r#"{"R50.9": "Fever, unspecified", "A00.0": "Cholera", "R07.9": null}"#,
        )
        .unwrap();

        let catalog = Catalog::load(&path, "diagnosis").unwrap();
        let codes: Vec<&str> = catalog.entries().iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["R50.9", "A00.0", "R07.9"]);
        assert_eq!(catalog.description("A00.0"), "Cholera");
        assert_eq!(catalog.description("R07.9"), "");
    }

    #[test]
    fn test_missing_description_is_empty() {
        let catalog = Catalog::from_entries([("A00", "Cholera")]);
        assert_eq!(catalog.description("Z99"), "");
        assert!(!catalog.contains("Z99"));
    }

    #[test]
    fn test_missing_file_names_import_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpt4.json");

        let err = Catalog::load(&path, "procedure").unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
        let message = err.to_string();
        assert!(message.contains("cpt4.json"));
        assert!(message.contains("medcode import --family procedure"));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icd10.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let err = Catalog::load(&path, "diagnosis").unwrap_err();
        assert!(matches!(err, CatalogError::Parse { .. }));
    }

    #[test]
    fn test_duplicate_codes_keep_first_position() {
        let catalog = Catalog::from_entries([("A", "one"), ("B", "two"), ("A", "three")]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.entries()[0].code, "A");
        assert_eq!(catalog.description("A"), "three");
    }

    #[test]
    fn test_search_text() {
        let catalog = Catalog::from_entries([("99213", "Office visit"), ("0001U", "")]);
        assert_eq!(catalog.search_text(0), "99213 Office visit");
        assert_eq!(catalog.search_text(1), "0001U ");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cpt4.json");
        let catalog = Catalog::from_entries([("44950", "Appendectomy"), ("10060", "Drainage")]);

        catalog.save(&path).unwrap();
        let loaded = Catalog::load(&path, "procedure").unwrap();

        assert_eq!(loaded.entries(), catalog.entries());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
