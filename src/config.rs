use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

/// Application-level constants
pub const APP_NAME: &str = "medlab-ocr";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix of every environment variable read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "MEDLAB_";

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "medlab_ocr=info,warn"
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Runtime settings for the OCR structuring engine.
///
/// Every field has a default, so a partial JSON document (or an empty
/// environment) yields a usable configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parameters strictly below this confidence are excluded from the record.
    pub confidence_threshold: f32,
    /// Records whose overall confidence falls below this are flagged.
    pub low_confidence_warning: f32,
    /// Upper bound on a single OCR engine call.
    pub ocr_timeout_secs: u64,
    /// Language hint forwarded to the OCR engine.
    pub language: String,
    /// Minimum normalized Levenshtein similarity for fuzzy name matches.
    pub fuzzy_similarity_floor: f64,
    /// Surface unknown parameter names in a separate low-confidence bucket.
    pub include_unclassified: bool,
    /// External parameter catalogue; the bundled one is used when absent.
    pub dictionary_path: Option<PathBuf>,
    pub max_image_bytes: usize,
    /// Entry bound of the in-memory record cache.
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            low_confidence_warning: 0.5,
            ocr_timeout_secs: 300,
            language: "pt".into(),
            fuzzy_similarity_floor: 0.80,
            include_unclassified: false,
            dictionary_path: None,
            max_image_bytes: 10 * 1024 * 1024,
            cache_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from `MEDLAB_*` environment variables.
    ///
    /// Unset variables keep their default. Unparseable or out-of-range values
    /// are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::default().overlaid(lookup)
    }

    /// Settings from a JSON file, then `MEDLAB_*` overrides on top.
    /// Without a file this is [`from_env`](Self::from_env).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) => Self::from_json_file(p)?,
            None => Self::default(),
        };
        Ok(base.overlaid(|key| std::env::var(key).ok()))
    }

    /// Read a JSON configuration file. Missing keys keep their default.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Configuration file loaded");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let unit = |field: &'static str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::Invalid { field, reason: format!("{v} outside [0, 1]") })
            }
        };
        unit("confidence_threshold", self.confidence_threshold)?;
        unit("low_confidence_warning", self.low_confidence_warning)?;
        if self.ocr_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "ocr_timeout_secs",
                reason: "must be positive".into(),
            });
        }
        if !(self.fuzzy_similarity_floor > 0.0 && self.fuzzy_similarity_floor <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "fuzzy_similarity_floor",
                reason: format!("{} outside (0, 1]", self.fuzzy_similarity_floor),
            });
        }
        Ok(())
    }

    /// Apply `MEDLAB_*` variables from `lookup` over these settings.
    ///
    /// Unparseable or out-of-range values are logged and ignored.
    pub fn overlaid<F>(self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self;
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = parse_var::<f32>(&var, "CONFIDENCE_THRESHOLD") {
            if (0.0..=1.0).contains(&v) {
                config.confidence_threshold = v;
            } else {
                tracing::warn!(value = v, "MEDLAB_CONFIDENCE_THRESHOLD outside [0, 1], keeping default");
            }
        }
        if let Some(v) = parse_var::<f32>(&var, "LOW_CONFIDENCE_WARNING") {
            if (0.0..=1.0).contains(&v) {
                config.low_confidence_warning = v;
            } else {
                tracing::warn!(value = v, "MEDLAB_LOW_CONFIDENCE_WARNING outside [0, 1], keeping default");
            }
        }
        if let Some(v) = parse_var::<u64>(&var, "OCR_TIMEOUT_SECS") {
            if v > 0 {
                config.ocr_timeout_secs = v;
            } else {
                tracing::warn!("MEDLAB_OCR_TIMEOUT_SECS must be positive, keeping default");
            }
        }
        if let Some(v) = var("LANGUAGE") {
            let v = v.trim();
            if !v.is_empty() {
                config.language = v.to_string();
            }
        }
        if let Some(v) = parse_var::<f64>(&var, "FUZZY_SIMILARITY_FLOOR") {
            if v > 0.0 && v <= 1.0 {
                config.fuzzy_similarity_floor = v;
            } else {
                tracing::warn!(value = v, "MEDLAB_FUZZY_SIMILARITY_FLOOR outside (0, 1], keeping default");
            }
        }
        if let Some(v) = parse_var::<bool>(&var, "INCLUDE_UNCLASSIFIED") {
            config.include_unclassified = v;
        }
        if let Some(v) = var("DICTIONARY_PATH") {
            if !v.trim().is_empty() {
                config.dictionary_path = Some(PathBuf::from(v.trim()));
            }
        }
        if let Some(v) = parse_var::<usize>(&var, "MAX_IMAGE_BYTES") {
            config.max_image_bytes = v;
        }
        if let Some(v) = parse_var::<usize>(&var, "CACHE_CAPACITY") {
            config.cache_capacity = v;
        }

        config
    }

    /// Overall timeout of one OCR call.
    pub fn ocr_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ocr_timeout_secs)
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = var(name)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(
                variable = format!("{ENV_PREFIX}{name}"),
                value = raw.as_str(),
                "Unparseable configuration value, keeping default"
            );
            None
        }
    }
}
