// ========================================================================================
//                                   RESULT ENCODER
// ========================================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Disorder labels, indexed by the class code the disorder classifier emits.
pub const DISORDER_LABELS: [&str; 3] = [
    "Mitochondrial genetic inheritance disorders",
    "Multifactorial genetic inheritance disorders",
    "Single-gene inheritance diseases",
];

/// Subclass labels, indexed by the class code the subclass classifier emits.
pub const SUBCLASS_LABELS: [&str; 9] = [
    "Alzheimer's",
    "Cancer",
    "Cystic fibrosis",
    "Diabetes",
    "Hemochromatosis",
    "Leber's hereditary optic neuropathy",
    "Leigh syndrome",
    "Mitochondrial myopathy",
    "Tay-Sachs",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("Class code {code} has no entry in the {table} label table")]
    UnknownCode { table: &'static str, code: i64 },
    #[error(
        "Model '{model_id}' can emit class codes {missing:?} that the {table} label table does not cover"
    )]
    Incomplete {
        table: &'static str,
        model_id: String,
        missing: Vec<i64>,
    },
}

/// An exhaustive mapping from dense class codes `0..n` to label strings.
#[derive(Debug, Clone, Copy)]
pub struct LabelTable {
    name: &'static str,
    labels: &'static [&'static str],
}

impl LabelTable {
    pub const fn new(name: &'static str, labels: &'static [&'static str]) -> Self {
        Self { name, labels }
    }

    pub const fn disorder() -> Self {
        Self::new("disorder", &DISORDER_LABELS)
    }

    pub const fn subclass() -> Self {
        Self::new("subclass", &SUBCLASS_LABELS)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn label(&self, code: i64) -> Result<&'static str, LabelError> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| self.labels.get(idx).copied())
            .ok_or(LabelError::UnknownCode {
                table: self.name,
                code,
            })
    }

    /// Checks that every class code a model declares has a label.
    pub fn ensure_covers(&self, model_id: &str, classes: &[i64]) -> Result<(), LabelError> {
        let missing: Vec<i64> = classes
            .iter()
            .copied()
            .filter(|&code| self.label(code).is_err())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(LabelError::Incomplete {
                table: self.name,
                model_id: model_id.to_string(),
                missing,
            })
        }
    }
}

/// The response unit for one patient record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResult {
    #[serde(rename = "Patient Id")]
    pub patient_id: i64,
    #[serde(rename = "Genetic Disorder")]
    pub disorder: String,
    #[serde(rename = "Disorder Subclass")]
    pub subclass: String,
}

/// Resolves both raw class codes through their tables. Either code missing from its
/// table fails the whole record.
pub fn encode(
    patient_id: i64,
    raw_disorder_code: i64,
    raw_subclass_code: i64,
) -> Result<PredictionResult, LabelError> {
    encode_with(
        &LabelTable::disorder(),
        &LabelTable::subclass(),
        patient_id,
        raw_disorder_code,
        raw_subclass_code,
    )
}

pub fn encode_with(
    disorder_table: &LabelTable,
    subclass_table: &LabelTable,
    patient_id: i64,
    raw_disorder_code: i64,
    raw_subclass_code: i64,
) -> Result<PredictionResult, LabelError> {
    Ok(PredictionResult {
        patient_id,
        disorder: disorder_table.label(raw_disorder_code)?.to_string(),
        subclass: subclass_table.label(raw_subclass_code)?.to_string(),
    })
}
