// ========================================================================================
//
//                               FEATURE SCHEMA NORMALIZER
//
// ========================================================================================

use ndarray::ArrayView1;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

/// The value written into every schema slot the record does not provide.
pub const FILL_VALUE: f64 = 0.0;

/// The payload field that carries the caller's patient identifier. It is not a
/// model feature and never reaches the predictors.
pub const PATIENT_ID_FIELD: &str = "Patient Id";

/// Feature names in the exact order the classifiers were trained on.
///
/// Spelling is part of the contract: the heart-rate name really does lack its
/// closing parenthesis.
pub const GENETIC_DISORDER_FEATURES: [&str; 19] = [
    "White Blood cell count (thousand per microliter)",
    "Blood cell count (mcL)",
    "Patient Age",
    "Father's age",
    "Mother's age",
    "No. of previous abortion",
    "Blood test result",
    "Gender",
    "Birth asphyxia",
    "Symptom 5",
    "Heart Rate (rates/min",
    "Respiratory Rate (breaths/min)",
    "Folic acid details (peri-conceptional)",
    "History of anomalies in previous pregnancies",
    "Autopsy shows birth defect (if applicable)",
    "Assisted conception IVF/ART",
    "Symptom 4",
    "Follow-up",
    "Birth defects",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Field '{field}' must be a number, got {found}")]
    NonNumeric { field: String, found: &'static str },
    #[error("Field 'Patient Id' must be an integer, got {0}")]
    InvalidPatientId(String),
}

/// An ordered list of named feature slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// The 19-slot schema both genetic disorder classifiers consume.
    pub fn genetic_disorder() -> Self {
        Self::new(GENETIC_DISORDER_FEATURES)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|slot| slot == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|slot| slot == name)
    }
}

/// A sparse patient record: any subset of schema fields with numeric values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientRecord {
    values: HashMap<String, f64>,
    patient_id: Option<i64>,
}

impl PatientRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn patient_id(&self) -> Option<i64> {
        self.patient_id
    }

    /// Coerces a JSON object into a typed record.
    ///
    /// Schema fields must hold JSON numbers; `null` is treated as absent. Fields the
    /// schema does not know are dropped without inspecting their values, so clients
    /// may send extra columns freely.
    pub fn from_json(object: &Map<String, Value>, schema: &FeatureSchema) -> Result<Self, SchemaError> {
        let mut record = Self::new();

        if let Some(raw_id) = object.get(PATIENT_ID_FIELD) {
            record.patient_id = match raw_id {
                Value::Null => None,
                Value::Number(n) => match n.as_i64() {
                    Some(id) => Some(id),
                    None => return Err(SchemaError::InvalidPatientId(n.to_string())),
                },
                other => return Err(SchemaError::InvalidPatientId(other.to_string())),
            };
        }

        for (name, value) in object {
            if !schema.contains(name) {
                continue;
            }
            match value {
                Value::Null => {}
                Value::Number(n) => {
                    let numeric = n.as_f64().ok_or_else(|| SchemaError::NonNumeric {
                        field: name.clone(),
                        found: "number",
                    })?;
                    record.values.insert(name.clone(), numeric);
                }
                other => {
                    return Err(SchemaError::NonNumeric {
                        field: name.clone(),
                        found: json_kind(other),
                    });
                }
            }
        }

        Ok(record)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A dense, schema-ordered feature vector. Every slot is populated.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFeatureVector {
    values: Vec<f64>,
}

impl NormalizedFeatureVector {
    pub fn view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(self.values.as_slice())
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Projects `record` onto `schema`: one output slot per schema name, in schema order,
/// taking the record's value when present and [`FILL_VALUE`] otherwise.
pub fn normalize(record: &PatientRecord, schema: &FeatureSchema) -> NormalizedFeatureVector {
    let values = schema
        .names()
        .iter()
        .map(|name| record.get(name).unwrap_or(FILL_VALUE))
        .collect();
    NormalizedFeatureVector { values }
}
