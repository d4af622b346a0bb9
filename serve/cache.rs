// ========================================================================================
//                                    MODEL CACHE
// ========================================================================================

use crate::artifact::{ArtifactError, ArtifactStore};
use crate::memory;
use crate::model::{ModelError, TrainedClassifier};
use crate::schema::FeatureSchema;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// One cache entry. The mutex serializes loaders for a single id; `None` means the
/// model has not been loaded successfully yet.
type Slot = Arc<Mutex<Option<Arc<TrainedClassifier>>>>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Model '{model_id}' is unavailable: {source}")]
    Artifact {
        model_id: String,
        #[source]
        source: ArtifactError,
    },
    #[error("Model '{model_id}' could not be loaded: {source}")]
    Load {
        model_id: String,
        #[source]
        source: ModelError,
    },
}

/// Process-wide store of deserialized classifiers, keyed by model id.
///
/// Each id is fetched and parsed at most once: concurrent first callers queue on the
/// id's slot while a single caller loads, then all of them read the same `Arc`.
/// Failures store nothing, so the next caller starts over. Entries are never evicted.
pub struct ModelCache {
    store: Arc<dyn ArtifactStore>,
    schema: FeatureSchema,
    slots: DashMap<String, Slot>,
}

impl ModelCache {
    pub fn new(store: Arc<dyn ArtifactStore>, schema: FeatureSchema) -> Self {
        Self {
            store,
            schema,
            slots: DashMap::new(),
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn get(&self, model_id: &str) -> Result<Arc<TrainedClassifier>, CacheError> {
        let slot = self.slot(model_id);
        // A loader that panicked left the slot empty, which is a valid state to retry from.
        let mut entry = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(model) = entry.as_ref() {
            debug!("Model cache hit for '{model_id}'");
            return Ok(Arc::clone(model));
        }

        let path = self
            .store
            .fetch(model_id)
            .map_err(|source| CacheError::Artifact {
                model_id: model_id.to_string(),
                source,
            })?;

        info!("Loading model '{}' from {}...", model_id, path.display());
        let model = TrainedClassifier::load_for_schema(&path, &self.schema).map_err(|source| {
            warn!("Model '{model_id}' at {} failed to load: {source}", path.display());
            CacheError::Load {
                model_id: model_id.to_string(),
                source,
            }
        })?;

        let model = Arc::new(model);
        *entry = Some(Arc::clone(&model));
        memory::log_memory_usage(&format!("after loading '{model_id}'"));
        Ok(model)
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.slots.get(model_id).is_some_and(|slot| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }

    fn slot(&self, model_id: &str) -> Slot {
        if let Some(slot) = self.slots.get(model_id) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(model_id.to_string()).or_default().value())
    }
}
