// ========================================================================================
//
//                             THE PREDICTION PIPELINE
//
// ========================================================================================
//
// Request payload -> schema normalizer -> inference (via the model cache, which
// consults the artifact store on a miss) -> result encoder -> response payload.
//
// Every request either resolves both labels for every record or fails as a whole.

use crate::artifact::{ArtifactError, ArtifactStore};
use crate::cache::{CacheError, ModelCache};
use crate::infer::{self, InferenceError};
use crate::labels::{self, LabelError, LabelTable, PredictionResult};
use crate::memory;
use crate::model::{ModelError, Predictor, TrainedClassifier};
use crate::schema::{self, FeatureSchema, PatientRecord, SchemaError};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub const DISORDER_MODEL_ID: &str = "disorder-classifier";
pub const SUBCLASS_MODEL_ID: &str = "subclass-classifier";

/// The exact message clients receive for an empty payload.
pub const NO_INPUT_MESSAGE: &str = "No input data provided";

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Model '{model_id}' is unavailable: {source}")]
    ArtifactUnavailable {
        model_id: String,
        #[source]
        source: ArtifactError,
    },
    #[error("Model '{model_id}' failed to load: {source}")]
    ModelLoad {
        model_id: String,
        #[source]
        source: ModelError,
    },
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    UnknownLabelCode(#[from] LabelError),
    #[error("{0}")]
    InvalidRequest(String),
}

impl PredictionError {
    /// Whether the caller, rather than the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PredictionError::InvalidRequest(_))
    }
}

impl From<CacheError> for PredictionError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Artifact { model_id, source } => {
                PredictionError::ArtifactUnavailable { model_id, source }
            }
            CacheError::Load { model_id, source } => PredictionError::ModelLoad { model_id, source },
        }
    }
}

impl From<SchemaError> for PredictionError {
    fn from(err: SchemaError) -> Self {
        PredictionError::InvalidRequest(err.to_string())
    }
}

/// One of the two classifiers the service runs, with the table that names its outputs.
#[derive(Debug, Clone)]
pub struct ModelRole {
    pub model_id: String,
    pub labels: LabelTable,
}

/// The response body: a single object for a single record, an array otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionResponse {
    Single(PredictionResult),
    Batch(Vec<PredictionResult>),
}

/// Owns the model cache and runs the full pipeline for each request.
pub struct PredictionService {
    cache: ModelCache,
    disorder: ModelRole,
    subclass: ModelRole,
}

impl PredictionService {
    /// A service for the canonical 19-feature schema and the two genetic disorder
    /// classifiers, loading artifacts from `store`.
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            cache: ModelCache::new(store, FeatureSchema::genetic_disorder()),
            disorder: ModelRole {
                model_id: DISORDER_MODEL_ID.to_string(),
                labels: LabelTable::disorder(),
            },
            subclass: ModelRole {
                model_id: SUBCLASS_MODEL_ID.to_string(),
                labels: LabelTable::subclass(),
            },
        }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn roles(&self) -> [&ModelRole; 2] {
        [&self.disorder, &self.subclass]
    }

    /// Fetches a role's model through the cache and checks that its label table
    /// covers every class the model can emit.
    pub fn load_role(&self, role: &ModelRole) -> Result<Arc<TrainedClassifier>, PredictionError> {
        let model = self.cache.get(&role.model_id)?;
        role.labels
            .ensure_covers(&role.model_id, model.class_codes())?;
        Ok(model)
    }

    /// Loads and validates both classifiers before any request arrives.
    pub fn warm_up(&self) -> Result<(), PredictionError> {
        info!("Loading models into memory...");
        for role in self.roles() {
            self.load_role(role)?;
        }
        memory::log_memory_usage("after warm-up");
        Ok(())
    }

    /// Classifies one record.
    pub fn predict_record(
        &self,
        record: &PatientRecord,
        patient_id: i64,
    ) -> Result<PredictionResult, PredictionError> {
        let vector = schema::normalize(record, self.cache.schema());
        let disorder_model = self.load_role(&self.disorder)?;
        let subclass_model = self.load_role(&self.subclass)?;

        let raw = infer::infer(&vector, disorder_model.as_ref(), subclass_model.as_ref())?;
        debug!(
            "Patient {patient_id}: raw disorder code {}, raw subclass code {}",
            raw.disorder_code, raw.subclass_code
        );

        Ok(labels::encode_with(
            &self.disorder.labels,
            &self.subclass.labels,
            patient_id,
            raw.disorder_code,
            raw.subclass_code,
        )?)
    }

    /// Classifies a parsed JSON payload: one object, or an array of objects.
    ///
    /// Records without their own `Patient Id` are numbered by 1-based position. All
    /// records are validated before any model is touched. Empty and falsy payloads
    /// (`null`, `{}`, `[]`, `false`, `0`, `""`) count as no input.
    pub fn predict_payload(&self, payload: &Value) -> Result<PredictionResponse, PredictionError> {
        match payload {
            Value::Object(object) if !object.is_empty() => {
                let record = PatientRecord::from_json(object, self.cache.schema())?;
                let id = record.patient_id().unwrap_or(1);
                Ok(PredictionResponse::Single(self.predict_record(&record, id)?))
            }
            Value::Array(items) if !items.is_empty() => {
                let records = items
                    .iter()
                    .enumerate()
                    .map(|(idx, item)| match item {
                        Value::Object(object) => {
                            Ok(PatientRecord::from_json(object, self.cache.schema())?)
                        }
                        _ => Err(PredictionError::InvalidRequest(format!(
                            "Record {} is not a JSON object",
                            idx + 1
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                let results = records
                    .iter()
                    .zip(1i64..)
                    .map(|(record, position)| {
                        self.predict_record(record, record.patient_id().unwrap_or(position))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PredictionResponse::Batch(results))
            }
            Value::Null | Value::Object(_) | Value::Array(_) | Value::Bool(false) => {
                Err(PredictionError::InvalidRequest(NO_INPUT_MESSAGE.to_string()))
            }
            Value::String(s) if s.is_empty() => {
                Err(PredictionError::InvalidRequest(NO_INPUT_MESSAGE.to_string()))
            }
            Value::Number(n) if n.as_f64() == Some(0.0) => {
                Err(PredictionError::InvalidRequest(NO_INPUT_MESSAGE.to_string()))
            }
            _ => Err(PredictionError::InvalidRequest(
                "Expected a JSON object or an array of objects".to_string(),
            )),
        }
    }

    /// Classifies a raw request body. An empty or whitespace-only body counts as no input.
    pub fn predict_body(&self, body: &[u8]) -> Result<PredictionResponse, PredictionError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(PredictionError::InvalidRequest(NO_INPUT_MESSAGE.to_string()));
        }
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| PredictionError::InvalidRequest(format!("Invalid JSON payload: {e}")))?;
        self.predict_payload(&payload)
    }
}
