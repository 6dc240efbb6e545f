use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::family::CodeFamily;

const CONFIG_FILE: &str = "config.yaml";

/// Default embedding model
const DEFAULT_MODEL: &str = "bge-base-en-v1.5";
/// Default similarity threshold under which lexical results are mixed in
const DEFAULT_THRESHOLD: f32 = 0.35;
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_DATA_DIR: &str = "medical_codes";
const DEFAULT_LIMIT: usize = 5;
const DEFAULT_OVERFETCH_FACTOR: usize = 2;
const DEFAULT_BUILD_BATCH_SIZE: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config {path} is malformed: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid config value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Per-family semantic confidence thresholds, cosine similarity in [0.0, 1.0].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_threshold")]
    pub diagnosis: f32,

    #[serde(default = "default_threshold")]
    pub procedure: f32,
}

impl Thresholds {
    pub fn for_family(&self, family: CodeFamily) -> f32 {
        match family {
            CodeFamily::Diagnosis => self.diagnosis,
            CodeFamily::Procedure => self.procedure,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            diagnosis: DEFAULT_THRESHOLD,
            procedure: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding catalogs and embedding stores, relative to the base path
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Model name for embeddings (e.g., "bge-base-en-v1.5")
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub thresholds: Thresholds,

    /// Number of suggestions returned when the caller does not ask otherwise
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Hybrid search asks the semantic side for `limit * overfetch_factor` candidates
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,

    /// Texts per embedding batch when building a store
    #[serde(default = "default_build_batch_size")]
    pub build_batch_size: usize,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Refuse stores built with a different model
    #[serde(default = "default_verify_model")]
    pub verify_model: bool,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            model: default_model(),
            thresholds: Thresholds::default(),
            default_limit: DEFAULT_LIMIT,
            overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
            build_batch_size: DEFAULT_BUILD_BATCH_SIZE,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            verify_model: true,
            base_path: PathBuf::new(),
        }
    }
}

fn default_data_dir() -> String {
    DEFAULT_DATA_DIR.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_overfetch_factor() -> usize {
    DEFAULT_OVERFETCH_FACTOR
}

fn default_build_batch_size() -> usize {
    DEFAULT_BUILD_BATCH_SIZE
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_verify_model() -> bool {
    true
}

impl Config {
    /// Default configuration rooted at `base_path`, without touching disk.
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("thresholds.diagnosis", self.thresholds.diagnosis),
            ("thresholds.procedure", self.thresholds.procedure),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be between 0.0 and 1.0, got {}", value),
                ));
            }
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::invalid("model", "must not be empty"));
        }
        if self.data_dir.trim().is_empty() {
            return Err(ConfigError::invalid("data_dir", "must not be empty"));
        }
        if self.default_limit == 0 {
            return Err(ConfigError::invalid("default_limit", "must be greater than 0"));
        }
        if self.overfetch_factor == 0 {
            return Err(ConfigError::invalid("overfetch_factor", "must be greater than 0"));
        }
        if self.build_batch_size == 0 {
            return Err(ConfigError::invalid("build_batch_size", "must be greater than 0"));
        }
        if self.download_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "download_timeout_secs",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults first if absent.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE);
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(base_path).map_err(io_err)?;

        // create new if does not exist
        if !path.exists() {
            let defaults = serde_yml::to_string(&Self::default()).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?;
            std::fs::write(&path, defaults).map_err(io_err)?;
        }

        let config_str = std::fs::read_to_string(&path).map_err(io_err)?;
        let mut config: Self = serde_yml::from_str(&config_str).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if let Ok(normalized) = serde_yml::to_string(&config) {
            if normalized != config_str {
                config.save()?;
            }
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.base_path.join(CONFIG_FILE);
        let config_str = serde_yml::to_string(&self).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, config_str).map_err(|source| ConfigError::Io { path, source })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Absolute data directory: `data_dir` as-is when absolute, else under the base path.
    pub fn data_path(&self) -> PathBuf {
        let dir = Path::new(&self.data_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.base_path.join(dir)
        }
    }

    pub fn catalog_path(&self, family: CodeFamily) -> PathBuf {
        self.data_path().join(family.catalog_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load_with(dir.path()).unwrap();

        assert!(dir.path().join(CONFIG_FILE).exists());
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.default_limit, 5);
        assert_eq!(config.overfetch_factor, 2);
        assert!(config.verify_model);
        assert_eq!(config.data_path(), dir.path().join("medical_codes"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "thresholds:\n  procedure: 0.5\ndata_dir: /srv/codes\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path()).unwrap();

        assert_eq!(config.thresholds.for_family(CodeFamily::Procedure), 0.5);
        assert_eq!(config.thresholds.for_family(CodeFamily::Diagnosis), 0.35);
        assert_eq!(config.data_path(), PathBuf::from("/srv/codes"));
        assert_eq!(
            config.catalog_path(CodeFamily::Procedure),
            PathBuf::from("/srv/codes/cpt4.json")
        );

        // Missing fields were written back.
        let saved = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("overfetch_factor"));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "thresholds:\n  diagnosis: 1.5\n").unwrap();

        let err = Config::load_with(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "thresholds.diagnosis"));
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = Config::default();
        config.overfetch_factor = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.build_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.default_limit = 0;
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "thresholds: [oops").unwrap();

        let result = Config::load_with(dir.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
