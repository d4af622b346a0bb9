use crate::schema::FeatureSchema;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the on-disk format of a trained classifier artifact. Artifacts
// are TOML documents so they can be inspected and diffed by hand.

/// A single node of a decision tree. Node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    /// Routes `x[feature] <= threshold` to `left`, everything else to `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Per-class weights (sample counts or probabilities), one per declared class.
    Leaf { weights: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

/// The predictor family stored in an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Multinomial linear model. `coefficients` has shape `[n_classes, n_features]`.
    Linear {
        coefficients: Array2<f64>,
        intercepts: Array1<f64>,
    },
    /// Averaged ensemble of decision trees.
    Forest { trees: Vec<DecisionTree> },
}

/// The top-level, self-contained, trained classifier artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedClassifier {
    pub model_id: String,
    /// The feature order used at training time. Must equal the serving schema.
    pub feature_names: Vec<String>,
    /// Class codes in output-column order.
    pub classes: Vec<i64>,
    pub predictor: ClassifierKind,
}

/// Errors raised while reading, writing or validating an artifact.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML model file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error(
        "Model was trained on {found} features but the serving schema has {expected}; first difference at slot {position}"
    )]
    FeatureMismatch {
        expected: usize,
        found: usize,
        position: usize,
    },
    #[error("Model declares no output classes")]
    NoClasses,
    #[error("Model declares class code {0} more than once")]
    DuplicateClass(i64),
    #[error("Malformed {kind} predictor: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

/// Errors raised by a predictor for a single input row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictError {
    #[error("Predictor expects {expected} features but received {found}")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("Tree {tree} cannot be traversed from node {node}")]
    MalformedTree { tree: usize, node: usize },
    #[error("Predictor produced no finite class score")]
    NoFiniteScore,
}

/// The single operation the serving pipeline needs from a trained model.
pub trait Predictor: Send + Sync {
    /// Every class code this predictor can emit.
    fn class_codes(&self) -> &[i64];

    /// Predicts the class code for one schema-ordered feature row.
    fn predict_one(&self, features: &[f64]) -> Result<i64, PredictError>;
}

impl TrainedClassifier {
    /// Per-class probabilities for one row, in `classes` order.
    pub fn predict_proba(&self, features: &[f64]) -> Result<Array1<f64>, PredictError> {
        if features.len() != self.feature_names.len() {
            return Err(PredictError::FeatureCountMismatch {
                expected: self.feature_names.len(),
                found: features.len(),
            });
        }
        let x = ArrayView1::from(features);

        match &self.predictor {
            ClassifierKind::Linear {
                coefficients,
                intercepts,
            } => {
                if coefficients.ncols() != x.len() || coefficients.nrows() != intercepts.len() {
                    return Err(PredictError::FeatureCountMismatch {
                        expected: coefficients.ncols(),
                        found: x.len(),
                    });
                }
                let scores = coefficients.dot(&x) + intercepts;
                Ok(internal::softmax(scores))
            }
            ClassifierKind::Forest { trees } => {
                let mut totals = Array1::<f64>::zeros(self.classes.len());
                for (tree_idx, tree) in trees.iter().enumerate() {
                    let weights = internal::traverse(tree, tree_idx, x)?;
                    let sum: f64 = weights.iter().sum();
                    if sum > 0.0 {
                        for (total, &w) in totals.iter_mut().zip(weights) {
                            *total += w / sum;
                        }
                    }
                }
                if !trees.is_empty() {
                    totals /= trees.len() as f64;
                }
                Ok(totals)
            }
        }
    }

    /// Checks the artifact against the serving schema and its own internal shape
    /// constraints. Every check here would otherwise surface as a wrong answer or a
    /// panic at request time.
    pub fn validate(&self, schema: &FeatureSchema) -> Result<(), ModelError> {
        if self.feature_names.as_slice() != schema.names() {
            let position = self
                .feature_names
                .iter()
                .zip(schema.names())
                .position(|(a, b)| a != b)
                .unwrap_or_else(|| self.feature_names.len().min(schema.len()));
            return Err(ModelError::FeatureMismatch {
                expected: schema.len(),
                found: self.feature_names.len(),
                position,
            });
        }

        if self.classes.is_empty() {
            return Err(ModelError::NoClasses);
        }
        let mut seen = HashSet::with_capacity(self.classes.len());
        for &code in &self.classes {
            if !seen.insert(code) {
                return Err(ModelError::DuplicateClass(code));
            }
        }

        let n_classes = self.classes.len();
        let n_features = self.feature_names.len();
        match &self.predictor {
            ClassifierKind::Linear {
                coefficients,
                intercepts,
            } => internal::validate_linear(coefficients, intercepts, n_classes, n_features),
            ClassifierKind::Forest { trees } => {
                internal::validate_forest(trees, n_classes, n_features)
            }
        }
    }

    /// Saves the classifier in its TOML artifact format.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let io_err = |source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = BufWriter::new(fs::File::create(path).map_err(io_err)?);
        file.write_all(toml_string.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        Ok(())
    }

    /// Loads a classifier from a TOML artifact without validating it.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = toml::from_str(&toml_string)?;
        Ok(model)
    }

    /// Loads a classifier and rejects it unless it fits `schema`.
    pub fn load_for_schema(path: &Path, schema: &FeatureSchema) -> Result<Self, ModelError> {
        let model = Self::load(path)?;
        model.validate(schema)?;
        Ok(model)
    }
}

impl Predictor for TrainedClassifier {
    fn class_codes(&self) -> &[i64] {
        &self.classes
    }

    fn predict_one(&self, features: &[f64]) -> Result<i64, PredictError> {
        let proba = self.predict_proba(features)?;
        let column = internal::argmax(proba.view()).ok_or(PredictError::NoFiniteScore)?;
        self.classes
            .get(column)
            .copied()
            .ok_or(PredictError::NoFiniteScore)
    }
}

/// Internal module for prediction-specific implementation details.
mod internal {
    use super::*;

    /// Normalized class probabilities. Scores that overflowed to `+inf` share all of
    /// the mass between them.
    pub(super) fn softmax(scores: Array1<f64>) -> Array1<f64> {
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if max == f64::INFINITY {
            let winners = scores.iter().filter(|&&s| s == f64::INFINITY).count() as f64;
            return scores.mapv(|s| if s == f64::INFINITY { 1.0 / winners } else { 0.0 });
        }
        if !max.is_finite() {
            return scores;
        }
        let exp = scores.mapv(|s| (s - max).exp());
        let sum = exp.sum();
        exp / sum
    }

    /// Index of the largest finite value. Ties resolve to the lowest index.
    pub(super) fn argmax(values: ArrayView1<f64>) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, &value) in values.iter().enumerate() {
            if !value.is_finite() {
                continue;
            }
            match best {
                Some((_, current)) if value <= current => {}
                _ => best = Some((idx, value)),
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Walks one tree to its leaf. The step bound stops cyclic node graphs in
    /// artifacts that skipped validation.
    pub(super) fn traverse<'a>(
        tree: &'a DecisionTree,
        tree_idx: usize,
        x: ArrayView1<f64>,
    ) -> Result<&'a [f64], PredictError> {
        let mut node_idx = 0;
        for _ in 0..tree.nodes.len() {
            let malformed = PredictError::MalformedTree {
                tree: tree_idx,
                node: node_idx,
            };
            match tree.nodes.get(node_idx).ok_or(malformed.clone())? {
                TreeNode::Leaf { weights } => return Ok(weights.as_slice()),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = *x.get(*feature).ok_or(malformed)?;
                    node_idx = if value <= *threshold { *left } else { *right };
                }
            }
        }
        Err(PredictError::MalformedTree {
            tree: tree_idx,
            node: node_idx,
        })
    }

    pub(super) fn validate_linear(
        coefficients: &Array2<f64>,
        intercepts: &Array1<f64>,
        n_classes: usize,
        n_features: usize,
    ) -> Result<(), ModelError> {
        let malformed = |reason: String| ModelError::Malformed {
            kind: "linear",
            reason,
        };
        if coefficients.dim() != (n_classes, n_features) {
            return Err(malformed(format!(
                "coefficient matrix is {:?}, expected ({n_classes}, {n_features})",
                coefficients.dim()
            )));
        }
        if intercepts.len() != n_classes {
            return Err(malformed(format!(
                "{} intercepts for {n_classes} classes",
                intercepts.len()
            )));
        }
        if coefficients.iter().chain(intercepts.iter()).any(|v| !v.is_finite()) {
            return Err(malformed("non-finite parameter".to_string()));
        }
        Ok(())
    }

    /// Children must have larger indices than their parent. This keeps every tree
    /// acyclic, so traversal always reaches a leaf.
    pub(super) fn validate_forest(
        trees: &[DecisionTree],
        n_classes: usize,
        n_features: usize,
    ) -> Result<(), ModelError> {
        let malformed = |reason: String| ModelError::Malformed {
            kind: "forest",
            reason,
        };
        if trees.is_empty() {
            return Err(malformed("ensemble has no trees".to_string()));
        }
        for (tree_idx, tree) in trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(malformed(format!("tree {tree_idx} has no nodes")));
            }
            for (node_idx, node) in tree.nodes.iter().enumerate() {
                match node {
                    TreeNode::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } => {
                        if *feature >= n_features {
                            return Err(malformed(format!(
                                "tree {tree_idx} node {node_idx} splits on feature {feature} of {n_features}"
                            )));
                        }
                        if !threshold.is_finite() {
                            return Err(malformed(format!(
                                "tree {tree_idx} node {node_idx} has a non-finite threshold"
                            )));
                        }
                        for &child in [left, right] {
                            if child <= node_idx || child >= tree.nodes.len() {
                                return Err(malformed(format!(
                                    "tree {tree_idx} node {node_idx} points at invalid child {child}"
                                )));
                            }
                        }
                    }
                    TreeNode::Leaf { weights } => {
                        if weights.len() != n_classes {
                            return Err(malformed(format!(
                                "tree {tree_idx} leaf {node_idx} has {} weights for {n_classes} classes",
                                weights.len()
                            )));
                        }
                        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                            return Err(malformed(format!(
                                "tree {tree_idx} leaf {node_idx} has a negative or non-finite weight"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
