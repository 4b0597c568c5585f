//! Fitted additive model and its reference evaluator
//!
//! `raw_score = intercept + Σ main-effect scores + Σ interaction scores`, computed
//! once per head (one head for regression/binary, one per class for multiclass),
//! then mapped to the output space by the link function.

use crate::bins::{BinTable, BoundaryRule, InteractionTable};
use crate::calibration::Calibration;
use crate::errors::{ModelError, Result};
use crate::serde_canon::{hash_canonical_hex, to_canonical_json};
use crate::value::{Row, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Current normalized model format version
pub const MODEL_FORMAT_VERSION: i32 = 1;

/// Learning task of a fitted model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Binary,
    Multiclass,
    Regression,
}

impl Task {
    pub fn as_str(self) -> &'static str {
        match self {
            Task::Binary => "binary",
            Task::Multiclass => "multiclass",
            Task::Regression => "regression",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Task {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binary" => Ok(Task::Binary),
            "multiclass" => Ok(Task::Multiclass),
            "regression" => Ok(Task::Regression),
            other => Err(ModelError::UnsupportedModelKind(format!("unknown task '{other}'"))),
        }
    }
}

/// Link from raw score to output space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Link {
    Identity,
    Logit,
    Softmax,
}

impl Link {
    /// Parse the fitting library's link name
    pub fn from_export_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "identity" => Ok(Link::Identity),
            "logit" => Ok(Link::Logit),
            "mlogit" | "vlogit" | "softmax" => Ok(Link::Softmax),
            other => Err(ModelError::UnsupportedModelKind(format!("unrecognized link '{other}'"))),
        }
    }

    /// The task this link implies
    pub fn task(self) -> Task {
        match self {
            Link::Identity => Task::Regression,
            Link::Logit => Task::Binary,
            Link::Softmax => Task::Multiclass,
        }
    }
}

/// Numerically stable logistic function
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Softmax with the row maximum subtracted before exponentiation
pub fn softmax(raw: &[f64]) -> Vec<f64> {
    let max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = raw.iter().map(|r| (r - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Score tables producing one raw score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHead {
    /// Class label for multiclass heads
    #[serde(default)]
    pub label: Option<String>,
    pub intercept: f64,
    pub mains: Vec<BinTable>,
    #[serde(default)]
    pub interactions: Vec<InteractionTable>,
}

impl ScoreHead {
    /// Sum terms in declaration order: intercept, mains, interactions
    pub fn raw_score(&self, row: &Row, boundary: BoundaryRule) -> f64 {
        let mut sum = self.intercept;
        for table in &self.mains {
            sum += table.score(lookup(row, &table.feature), boundary);
        }
        for table in &self.interactions {
            sum += table.score(
                lookup(row, &table.features[0]),
                lookup(row, &table.features[1]),
                boundary,
            );
        }
        sum
    }

    pub fn term_count(&self) -> usize {
        self.mains.len() + self.interactions.len()
    }

    /// Term names in declaration order, `a & b` for interactions
    pub fn term_names(&self) -> Vec<String> {
        self.mains
            .iter()
            .map(|t| t.feature.clone())
            .chain(self.interactions.iter().map(InteractionTable::name))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.intercept.is_finite() {
            return Err(ModelError::MalformedBins(format!(
                "non-finite intercept {}",
                self.intercept
            )));
        }
        for table in &self.mains {
            table.validate()?;
        }
        for table in &self.interactions {
            table.validate()?;
        }
        Ok(())
    }
}

fn lookup<'a>(row: &'a Row, feature: &str) -> &'a Value {
    static NULL: Value = Value::Null;
    row.get(feature).unwrap_or(&NULL)
}

/// Model outputs aligned with [`FittedAdditiveModel::output_columns`]
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub values: Vec<f64>,
}

/// Normalized description of a fitted binned additive model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedAdditiveModel {
    pub version: i32,
    pub task: Task,
    pub link: Link,
    /// Class labels (binary and multiclass); empty for regression
    #[serde(default)]
    pub classes: Vec<String>,
    /// Ordered feature list
    pub features: Vec<String>,
    #[serde(default)]
    pub boundary: BoundaryRule,
    pub heads: Vec<ScoreHead>,
}

impl FittedAdditiveModel {
    /// Check structural invariants
    pub fn validate(&self) -> Result<()> {
        if self.version != MODEL_FORMAT_VERSION {
            return Err(ModelError::UnsupportedModelKind(format!(
                "unsupported model format version: {}",
                self.version
            )));
        }
        if self.link.task() != self.task {
            return Err(ModelError::UnsupportedModelKind(format!(
                "link {:?} does not fit task {}",
                self.link, self.task
            )));
        }

        let expected_heads = match self.task {
            Task::Regression => {
                if !self.classes.is_empty() {
                    return Err(ModelError::UnsupportedModelKind(format!(
                        "regression model declares {} classes",
                        self.classes.len()
                    )));
                }
                1
            }
            Task::Binary => {
                if self.classes.len() != 2 {
                    return Err(ModelError::UnsupportedModelKind(format!(
                        "binary model declares {} classes",
                        self.classes.len()
                    )));
                }
                1
            }
            Task::Multiclass => {
                if self.classes.len() < 3 {
                    return Err(ModelError::UnsupportedModelKind(format!(
                        "multiclass model declares {} classes",
                        self.classes.len()
                    )));
                }
                self.classes.len()
            }
        };
        if self.heads.len() != expected_heads {
            return Err(ModelError::UnsupportedModelKind(format!(
                "{} model has {} score heads, expected {expected_heads}",
                self.task,
                self.heads.len()
            )));
        }

        for head in &self.heads {
            head.validate()?;
            let unknown = head
                .mains
                .iter()
                .map(|t| &t.feature)
                .chain(head.interactions.iter().flat_map(|t| t.features.iter()))
                .find(|f| !self.features.contains(f));
            if let Some(feature) = unknown {
                return Err(ModelError::MalformedBins(format!(
                    "term references undeclared feature '{feature}'"
                )));
            }
        }

        // every class scores the same terms in the same order
        if let Some((first, rest)) = self.heads.split_first() {
            let layout = first.term_names();
            if let Some((k, head)) = rest
                .iter()
                .enumerate()
                .find(|(_, h)| h.term_names() != layout)
            {
                return Err(ModelError::MalformedBins(format!(
                    "score head {} has terms {:?}, head 0 has {:?}",
                    k + 1,
                    head.term_names(),
                    layout
                )));
            }
        }
        Ok(())
    }

    /// Output column names, in output order (case-sensitive contract)
    pub fn output_columns(&self) -> Vec<String> {
        match self.task {
            Task::Regression => vec!["prediction".to_string()],
            Task::Binary => vec!["probability".to_string()],
            Task::Multiclass => self
                .classes
                .iter()
                .map(|label| format!("probability_{label}"))
                .collect(),
        }
    }

    pub fn raw_scores(&self, row: &Row) -> Vec<f64> {
        self.heads
            .iter()
            .map(|head| head.raw_score(row, self.boundary))
            .collect()
    }

    /// Direct evaluation: raw scores through the link
    pub fn predict(&self, row: &Row) -> Prediction {
        let raw = self.raw_scores(row);
        let values = match self.link {
            Link::Identity => raw,
            Link::Logit => raw.into_iter().map(sigmoid).collect(),
            Link::Softmax => softmax(&raw),
        };
        Prediction { values }
    }

    /// Direct evaluation followed by an optional calibration stage
    pub fn predict_calibrated(&self, row: &Row, calibration: Option<&Calibration>) -> Prediction {
        let prediction = self.predict(row);
        match calibration {
            Some(calibration) => Prediction {
                values: calibration.apply(self, &prediction.values),
            },
            None => prediction,
        }
    }

    pub fn to_canonical_json(&self) -> Result<String> {
        Ok(to_canonical_json(self)?)
    }

    /// Blake3 hash of the canonical JSON form, as hex
    pub fn hash_hex(&self) -> Result<String> {
        Ok(hash_canonical_hex(self)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = self.to_canonical_json()?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a normalized model and validate it
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let model: FittedAdditiveModel = serde_json::from_str(&json)?;
        model.validate()?;
        Ok(model)
    }
}
