use crate::model::{PredictError, Predictor};
use crate::schema::NormalizedFeatureVector;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("The {model} classifier rejected the input: {source}")]
pub struct InferenceError {
    pub model: &'static str,
    #[source]
    pub source: PredictError,
}

/// Raw class codes straight from the two classifiers, before label lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPrediction {
    pub disorder_code: i64,
    pub subclass_code: i64,
}

/// Runs both classifiers on the same vector. The two calls share no state, so they
/// run in parallel; both must finish before this returns.
pub fn infer(
    vector: &NormalizedFeatureVector,
    disorder_model: &dyn Predictor,
    subclass_model: &dyn Predictor,
) -> Result<RawPrediction, InferenceError> {
    let features = vector.as_slice();
    let (disorder, subclass) = rayon::join(
        || disorder_model.predict_one(features),
        || subclass_model.predict_one(features),
    );

    let disorder_code = disorder.map_err(|source| InferenceError {
        model: "disorder",
        source,
    })?;
    let subclass_code = subclass.map_err(|source| InferenceError {
        model: "subclass",
        source,
    })?;

    Ok(RawPrediction {
        disorder_code,
        subclass_code,
    })
}
