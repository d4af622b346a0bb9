// ========================================================================================
//
//                               MODEL ARTIFACT STORE
//
// ========================================================================================

use crate::shared::files::{self, StagedFile};
use log::{debug, info, warn};
use reqwest::blocking::Client;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File extension of cached artifacts.
const ARTIFACT_EXTENSION: &str = "toml";

// ========================================================================================
//                              PUBLIC API
// ========================================================================================

/// Resolves a logical model id to a readable local file.
///
/// This is the only capability the model cache needs from storage, so backends
/// (HTTP, local disk, test doubles) are interchangeable.
pub trait ArtifactStore: Send + Sync {
    fn fetch(&self, model_id: &str) -> Result<PathBuf, ArtifactError>;
}

/// Where one model's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// An `http://` or `https://` URL, downloaded into the cache directory on demand.
    Remote(String),
    /// A file already on local disk, used in place.
    Local(PathBuf),
}

impl ArtifactSource {
    /// Classifies a source string. URLs with an HTTP scheme are remote, `file://`
    /// URLs and bare paths are local.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ArtifactSource::Remote(trimmed.to_string())
        } else if lower.starts_with("file://") {
            ArtifactSource::Local(PathBuf::from(&trimmed["file://".len()..]))
        } else {
            ArtifactSource::Local(PathBuf::from(trimmed))
        }
    }
}

/// Model ids double as cache file names, so they are restricted to a conservative
/// character set and may not start with a dot.
pub fn is_valid_model_id(model_id: &str) -> bool {
    !model_id.is_empty()
        && !model_id.starts_with('.')
        && model_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Every way an artifact can fail to materialize. All of them mean the model is
/// unavailable; none are retried here.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("No artifact source is configured for model '{0}'")]
    UnknownModel(String),
    #[error("Invalid model id '{0}': use letters, digits, '-', '_' or '.'")]
    InvalidModelId(String),
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request for {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Download of {url} failed with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Download of {url} was interrupted: {source}")]
    Transfer {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("Download of {url} is truncated: expected {expected} bytes, received {received}")]
    Truncated {
        url: String,
        expected: u64,
        received: u64,
    },
    #[error("Download of {url} returned an empty body")]
    EmptyBody { url: String },
    #[error("I/O error for '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Local artifact '{}' does not exist or is not a file", .0.display())]
    MissingLocal(PathBuf),
}

/// The production store: one configured source per model id, with remote sources
/// cached under `cache_dir/<model_id>.toml`.
pub struct SourceArtifactStore {
    cache_dir: PathBuf,
    client: Client,
    sources: HashMap<String, ArtifactSource>,
}

impl SourceArtifactStore {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        timeout: Duration,
        sources: HashMap<String, ArtifactSource>,
    ) -> Result<Self, ArtifactError> {
        let client = files::build_http_client(timeout).map_err(ArtifactError::Client)?;
        Self::with_client(cache_dir, client, sources)
    }

    /// Like [`SourceArtifactStore::new`], with a caller-configured HTTP client
    /// (proxies, TLS roots, timeouts).
    pub fn with_client(
        cache_dir: impl Into<PathBuf>,
        client: Client,
        sources: HashMap<String, ArtifactSource>,
    ) -> Result<Self, ArtifactError> {
        if let Some(bad) = sources.keys().find(|id| !is_valid_model_id(id)) {
            return Err(ArtifactError::InvalidModelId(bad.clone()));
        }
        Ok(Self {
            cache_dir: cache_dir.into(),
            client,
            sources,
        })
    }

    /// The deterministic cache location for a model id.
    pub fn cache_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{model_id}.{ARTIFACT_EXTENSION}"))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Streams `url` into a staged file and renames it to `dest` only after the full
    /// body has arrived and been synced.
    fn download(&self, model_id: &str, url: &str, dest: &Path) -> Result<(), ArtifactError> {
        info!(
            "Downloading model '{}' from {} to {}...",
            model_id,
            url,
            dest.display()
        );

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|source| ArtifactError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtifactError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let expected = response.content_length();

        let io_err = |source| ArtifactError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut staged = StagedFile::create(dest).map_err(io_err)?;
        let received =
            io::copy(&mut response, staged.file_mut()).map_err(|source| ArtifactError::Transfer {
                url: url.to_string(),
                source,
            })?;

        if let Some(expected) = expected {
            if received != expected {
                return Err(ArtifactError::Truncated {
                    url: url.to_string(),
                    expected,
                    received,
                });
            }
        }
        if received == 0 {
            return Err(ArtifactError::EmptyBody {
                url: url.to_string(),
            });
        }

        staged.commit().map_err(io_err)?;
        info!("Downloaded {received} bytes for model '{model_id}'");
        Ok(())
    }
}

impl ArtifactStore for SourceArtifactStore {
    fn fetch(&self, model_id: &str) -> Result<PathBuf, ArtifactError> {
        let source = self
            .sources
            .get(model_id)
            .ok_or_else(|| ArtifactError::UnknownModel(model_id.to_string()))?;

        match source {
            ArtifactSource::Local(path) => {
                if files::is_materialized(path) {
                    debug!("Using local artifact {} for '{model_id}'", path.display());
                    Ok(path.clone())
                } else {
                    Err(ArtifactError::MissingLocal(path.clone()))
                }
            }
            ArtifactSource::Remote(url) => {
                let dest = self.cache_path(model_id);
                if files::is_materialized(&dest) {
                    debug!("Artifact for '{model_id}' already cached at {}", dest.display());
                    return Ok(dest);
                }
                self.download(model_id, url, &dest).inspect_err(|e| {
                    warn!("Could not fetch model '{model_id}': {e}");
                })?;
                Ok(dest)
            }
        }
    }
}
