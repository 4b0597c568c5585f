//! Model introspection
//!
//! Normalizes the fitting library's JSON export into a [`FittedAdditiveModel`].
//! The export keeps the library's own layout: term scores are flattened
//! row-major, each axis ordered `[missing, bin_1 .. bin_n, unknown]`, with a
//! trailing class dimension for multiclass models.

use crate::bins::{BinTable, Bins, BoundaryRule, InteractionTable};
use crate::errors::{ModelError, Result};
use crate::model::{FittedAdditiveModel, Link, ScoreHead, Task, MODEL_FORMAT_VERSION};
use crate::registry::ModelKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

fn default_model_kind() -> String {
    ModelKind::Ebm.as_str().to_string()
}

/// Class labels may be exported as strings or numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassLabel {
    Text(String),
    Integer(i64),
    Number(f64),
}

impl ClassLabel {
    pub fn to_label(&self) -> String {
        match self {
            ClassLabel::Text(s) => s.clone(),
            ClassLabel::Integer(i) => i.to_string(),
            ClassLabel::Number(n) => n.to_string(),
        }
    }
}

/// Intercept exported either as a scalar or one value per class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Intercept {
    Scalar(f64),
    PerClass(Vec<f64>),
}

impl Intercept {
    fn values(&self) -> Vec<f64> {
        match self {
            Intercept::Scalar(v) => vec![*v],
            Intercept::PerClass(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureExport {
    Continuous { name: String, cuts: Vec<f64> },
    Nominal { name: String, categories: Vec<String> },
}

impl FeatureExport {
    pub fn name(&self) -> &str {
        match self {
            FeatureExport::Continuous { name, .. } | FeatureExport::Nominal { name, .. } => name,
        }
    }

    fn bins(&self) -> Bins {
        match self {
            FeatureExport::Continuous { cuts, .. } => Bins::Continuous { cuts: cuts.clone() },
            FeatureExport::Nominal { categories, .. } => Bins::Nominal {
                categories: categories.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermExport {
    /// Indices into the export's feature list
    pub features: Vec<usize>,
    pub scores: Vec<f64>,
}

/// Fitted model as exported by the training collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelExport {
    #[serde(default = "default_model_kind")]
    pub model_kind: String,
    pub link: String,
    #[serde(default)]
    pub classes: Vec<ClassLabel>,
    pub intercept: Intercept,
    pub features: Vec<FeatureExport>,
    #[serde(default)]
    pub terms: Vec<TermExport>,
    #[serde(default)]
    pub boundary: BoundaryRule,
}

impl ModelExport {
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Task metadata declared by the caller alongside the export
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredTask {
    pub task: Task,
    /// Expected class labels, checked when present
    pub classes: Option<Vec<String>>,
}

impl DeclaredTask {
    pub fn new(task: Task) -> Self {
        Self { task, classes: None }
    }

    pub fn with_classes(mut self, classes: Vec<String>) -> Self {
        self.classes = Some(classes);
        self
    }
}

/// Normalize an export into the structural model description
pub fn introspect(export: &ModelExport, declared: &DeclaredTask) -> Result<FittedAdditiveModel> {
    let kind: ModelKind = export.model_kind.parse()?;
    if !kind.supports_sql_export() {
        return Err(ModelError::UnsupportedModelKind(format!(
            "{kind} models have no additive binned-score representation"
        )));
    }

    let link = Link::from_export_name(&export.link)?;
    let task = link.task();
    if task != declared.task {
        return Err(ModelError::UnsupportedModelKind(format!(
            "declared task {} but model link '{}' implies {task}",
            declared.task, export.link
        )));
    }

    let classes: Vec<String> = export.classes.iter().map(ClassLabel::to_label).collect();
    check_classes(task, &classes)?;
    if let Some(expected) = &declared.classes {
        if expected != &classes {
            return Err(ModelError::UnsupportedModelKind(format!(
                "declared classes {expected:?} differ from model classes {classes:?}"
            )));
        }
    }

    let head_count = if task == Task::Multiclass { classes.len() } else { 1 };
    let intercepts = export.intercept.values();
    if intercepts.len() != head_count {
        return Err(ModelError::UnsupportedModelKind(format!(
            "{task} model exports {} intercepts, expected {head_count}",
            intercepts.len()
        )));
    }

    let feature_bins: Vec<Bins> = export.features.iter().map(FeatureExport::bins).collect();
    for (feature, bins) in export.features.iter().zip(&feature_bins) {
        bins.validate(&format!("feature '{}'", feature.name()))?;
    }

    let mut heads: Vec<ScoreHead> = intercepts
        .iter()
        .enumerate()
        .map(|(k, &intercept)| ScoreHead {
            label: (task == Task::Multiclass).then(|| classes[k].clone()),
            intercept,
            mains: Vec::new(),
            interactions: Vec::new(),
        })
        .collect();

    for (term_idx, term) in export.terms.iter().enumerate() {
        if let Some(&bad) = term.features.iter().find(|&&f| f >= export.features.len()) {
            return Err(ModelError::MalformedBins(format!(
                "term {term_idx} references feature index {bad}, model has {} features",
                export.features.len()
            )));
        }
        match term.features.as_slice() {
            &[f] => {
                let bins = &feature_bins[f];
                let slots = bins.len() + 2;
                check_term_len(term_idx, term, slots * head_count)?;
                for (k, head) in heads.iter_mut().enumerate() {
                    let at = |slot: usize| term.scores[slot * head_count + k];
                    head.mains.push(BinTable {
                        feature: export.features[f].name().to_string(),
                        bins: bins.clone(),
                        scores: (1..=bins.len()).map(at).collect(),
                        missing: at(0),
                        unknown: at(bins.len() + 1),
                    });
                }
            }
            &[a, b] => {
                let (n_a, n_b) = (feature_bins[a].len(), feature_bins[b].len());
                check_term_len(term_idx, term, (n_a + 2) * (n_b + 2) * head_count)?;
                for (k, head) in heads.iter_mut().enumerate() {
                    let scores = (0..n_a + 2)
                        .map(|row| {
                            (0..n_b + 2)
                                .map(|col| {
                                    let flat = export_slot(row, n_a) * (n_b + 2) + export_slot(col, n_b);
                                    term.scores[flat * head_count + k]
                                })
                                .collect()
                        })
                        .collect();
                    head.interactions.push(InteractionTable {
                        features: [
                            export.features[a].name().to_string(),
                            export.features[b].name().to_string(),
                        ],
                        axes: [feature_bins[a].clone(), feature_bins[b].clone()],
                        scores,
                    });
                }
            }
            other => {
                return Err(ModelError::MalformedBins(format!(
                    "term {term_idx} has {} features; only main effects and pairs are supported",
                    other.len()
                )))
            }
        }
    }

    let model = FittedAdditiveModel {
        version: MODEL_FORMAT_VERSION,
        task,
        link,
        classes,
        features: export.features.iter().map(|f| f.name().to_string()).collect(),
        boundary: export.boundary,
        heads,
    };
    model.validate()?;

    debug!(
        "Introspected {} model: {} features, {} terms, {} heads",
        model.task,
        model.features.len(),
        export.terms.len(),
        model.heads.len()
    );
    Ok(model)
}

/// Map a normalized slot index (bins, missing, unknown) to the export's
/// `[missing, bins.., unknown]` order.
fn export_slot(slot: usize, bins: usize) -> usize {
    if slot < bins {
        slot + 1
    } else if slot == bins {
        0
    } else {
        bins + 1
    }
}

fn check_term_len(term_idx: usize, term: &TermExport, expected: usize) -> Result<()> {
    if term.scores.len() != expected {
        return Err(ModelError::MalformedBins(format!(
            "term {term_idx} has {} scores, expected {expected}",
            term.scores.len()
        )));
    }
    Ok(())
}

fn check_classes(task: Task, classes: &[String]) -> Result<()> {
    let ok = match task {
        Task::Regression => classes.is_empty(),
        Task::Binary => classes.len() == 2,
        Task::Multiclass => classes.len() >= 3,
    };
    if !ok {
        return Err(ModelError::UnsupportedModelKind(format!(
            "{task} model exports {} classes",
            classes.len()
        )));
    }
    Ok(())
}
