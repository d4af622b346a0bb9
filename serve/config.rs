use crate::artifact::{self, ArtifactError, ArtifactSource, SourceArtifactStore};
use crate::pipeline::{DISORDER_MODEL_ID, SUBCLASS_MODEL_ID};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CACHE_DIR_NAME: &str = "genoclass-models";
const DEFAULT_LOCAL_MODEL_DIR: &str = "models";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where to fetch one model from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSourceConfig {
    pub id: String,
    /// An `http(s)://` URL, a `file://` URL or a local path.
    pub source: String,
}

/// Service settings, typically read from a TOML file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Load both models before binding the listener.
    #[serde(default = "default_preload")]
    pub preload: bool,
    #[serde(default = "default_models")]
    pub models: Vec<ModelSourceConfig>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cache_dir() -> PathBuf {
    env::temp_dir().join(DEFAULT_CACHE_DIR_NAME)
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_preload() -> bool {
    true
}

fn default_models() -> Vec<ModelSourceConfig> {
    [DISORDER_MODEL_ID, SUBCLASS_MODEL_ID]
        .into_iter()
        .map(|id| ModelSourceConfig {
            id: id.to_string(),
            source: format!("{DEFAULT_LOCAL_MODEL_DIR}/{id}.toml"),
        })
        .collect()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cache_dir: default_cache_dir(),
            download_timeout_secs: default_download_timeout_secs(),
            preload: default_preload(),
            models: default_models(),
        }
    }
}

impl ServiceConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "download_timeout_secs must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if !artifact::is_valid_model_id(&model.id) {
                return Err(ConfigError::Invalid(format!(
                    "model id '{}' may only contain letters, digits, '-', '_' or '.'",
                    model.id
                )));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "model id '{}' is configured more than once",
                    model.id
                )));
            }
            if model.source.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "model '{}' has an empty source",
                    model.id
                )));
            }
        }

        for required in [DISORDER_MODEL_ID, SUBCLASS_MODEL_ID] {
            if !seen.contains(required) {
                return Err(ConfigError::Invalid(format!(
                    "no source configured for required model '{required}'"
                )));
            }
        }
        Ok(())
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn sources(&self) -> HashMap<String, ArtifactSource> {
        self.models
            .iter()
            .map(|m| (m.id.clone(), ArtifactSource::parse(&m.source)))
            .collect()
    }

    pub fn build_store(&self) -> Result<SourceArtifactStore, ArtifactError> {
        SourceArtifactStore::new(
            self.cache_dir.clone(),
            self.download_timeout(),
            self.sources(),
        )
    }
}
