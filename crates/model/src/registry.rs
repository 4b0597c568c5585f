//! Model-family registry
//!
//! Fitting and plotting are done by external collaborators. The registry only
//! routes a [`ModelKind`] to the family that knows how to drive them, and is
//! built once per process.

use crate::errors::{ModelError, Result};
use crate::model::{FittedAdditiveModel, Prediction, Task};
use crate::value::Row;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Closed set of supported model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Ebm,
    DecisionRule,
    DecisionTree,
    LinearRegression,
}

impl ModelKind {
    pub const ALL: [ModelKind; 4] = [
        ModelKind::Ebm,
        ModelKind::DecisionRule,
        ModelKind::DecisionTree,
        ModelKind::LinearRegression,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Ebm => "ebm",
            ModelKind::DecisionRule => "decision_rule",
            ModelKind::DecisionTree => "decision_tree",
            ModelKind::LinearRegression => "linear_regression",
        }
    }

    /// Only binned additive models have a SQL form
    pub fn supports_sql_export(self) -> bool {
        matches!(self, ModelKind::Ebm)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ebm" => Ok(ModelKind::Ebm),
            "decision_rule" => Ok(ModelKind::DecisionRule),
            "decision_tree" => Ok(ModelKind::DecisionTree),
            "l_regression" | "linear_regression" => Ok(ModelKind::LinearRegression),
            other => Err(ModelError::UnsupportedModelKind(format!(
                "unknown model family '{other}'"
            ))),
        }
    }
}

/// Output format for explanation plots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    #[default]
    Html,
    Png,
}

impl FileType {
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Html => "html",
            FileType::Png => "png",
        }
    }
}

impl FromStr for FileType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(FileType::Html),
            "png" => Ok(FileType::Png),
            other => Err(ModelError::External(format!("unsupported plot file type '{other}'"))),
        }
    }
}

/// Rows handed to a trainer
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub features: Vec<String>,
    pub target: String,
    pub rows: Vec<Row>,
}

/// Opaque hyperparameters, passed through to the trainer untouched
pub type ModelParams = BTreeMap<String, serde_json::Value>;

/// A model returned by a trainer
pub trait FittedModel: Send + Sync {
    fn kind(&self) -> ModelKind;
    fn task(&self) -> Task;
    fn predict(&self, row: &Row) -> Prediction;
    /// Per-term importance, in term order
    fn feature_importance(&self) -> Vec<(String, f64)>;
    /// Structural description, when the model is a binned additive model
    fn as_additive(&self) -> Option<&FittedAdditiveModel> {
        None
    }
}

impl FittedModel for FittedAdditiveModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Ebm
    }

    fn task(&self) -> Task {
        self.task
    }

    fn predict(&self, row: &Row) -> Prediction {
        FittedAdditiveModel::predict(self, row)
    }

    /// Mean absolute bin score, averaged over the heads that carry the term
    fn feature_importance(&self) -> Vec<(String, f64)> {
        let Some(first) = self.heads.first() else {
            return Vec::new();
        };
        let mean_abs = |scores: &mut dyn Iterator<Item = f64>| {
            let (sum, n) = scores.fold((0.0, 0usize), |(s, n), v| (s + v.abs(), n + 1));
            if n == 0 {
                0.0
            } else {
                sum / n as f64
            }
        };
        let average = |per_head: Vec<f64>| per_head.iter().sum::<f64>() / per_head.len().max(1) as f64;

        let mut importance = Vec::with_capacity(first.term_count());
        for (i, table) in first.mains.iter().enumerate() {
            let per_head = self
                .heads
                .iter()
                .filter_map(|h| h.mains.get(i).filter(|t| t.feature == table.feature))
                .map(|t| mean_abs(&mut t.scores.iter().copied()))
                .collect();
            importance.push((table.feature.clone(), average(per_head)));
        }
        for (i, table) in first.interactions.iter().enumerate() {
            let per_head = self
                .heads
                .iter()
                .filter_map(|h| h.interactions.get(i).filter(|t| t.features == table.features))
                .map(|t| mean_abs(&mut t.scores.iter().flatten().copied()))
                .collect();
            importance.push((table.name(), average(per_head)));
        }
        importance
    }

    fn as_additive(&self) -> Option<&FittedAdditiveModel> {
        Some(self)
    }
}

/// Fits models on request
pub trait Trainer {
    fn fit(&self, kind: ModelKind, set: &TrainingSet, params: &ModelParams) -> Result<Box<dyn FittedModel>>;
}

/// Explanation plot handed to a sink
#[derive(Debug, Clone, PartialEq)]
pub enum PlotRequest {
    FeatureImportance {
        entries: Vec<(String, f64)>,
    },
    Shape {
        term: String,
        labels: Vec<String>,
        scores: Vec<f64>,
    },
}

/// Renders plots
pub trait PlotSink {
    fn render(&mut self, request: &PlotRequest, file_type: FileType) -> Result<()>;
}

/// Operations every model family offers
pub trait ModelFamily: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn fit(&self, trainer: &dyn Trainer, set: &TrainingSet, params: &ModelParams) -> Result<Box<dyn FittedModel>> {
        let model = trainer.fit(self.kind(), set, params)?;
        if model.kind() != self.kind() {
            return Err(ModelError::External(format!(
                "trainer returned a {} model for family {}",
                model.kind(),
                self.kind()
            )));
        }
        Ok(model)
    }

    fn predict(&self, model: &dyn FittedModel, row: &Row) -> Result<Prediction> {
        if model.kind() != self.kind() {
            return Err(ModelError::UnsupportedModelKind(format!(
                "{} family cannot evaluate a {} model",
                self.kind(),
                model.kind()
            )));
        }
        Ok(model.predict(row))
    }

    fn post_plots(&self, model: &dyn FittedModel, sink: &mut dyn PlotSink, file_type: FileType) -> Result<()> {
        sink.render(
            &PlotRequest::FeatureImportance {
                entries: model.feature_importance(),
            },
            file_type,
        )
    }
}

pub struct EbmFamily;
pub struct DecisionRuleFamily;
pub struct DecisionTreeFamily;
pub struct LinearRegressionFamily;

impl ModelFamily for EbmFamily {
    fn kind(&self) -> ModelKind {
        ModelKind::Ebm
    }

    /// Importance plus one shape plot per main-effect term of the first head
    fn post_plots(&self, model: &dyn FittedModel, sink: &mut dyn PlotSink, file_type: FileType) -> Result<()> {
        let additive = model.as_additive();
        if let Some(additive) = additive {
            additive.validate()?;
        }
        sink.render(
            &PlotRequest::FeatureImportance {
                entries: model.feature_importance(),
            },
            file_type,
        )?;
        let Some(additive) = additive else {
            return Ok(());
        };
        for table in additive.heads.iter().take(1).flat_map(|h| h.mains.iter()) {
            sink.render(
                &PlotRequest::Shape {
                    term: table.feature.clone(),
                    labels: table.bins.labels(),
                    scores: table.scores.clone(),
                },
                file_type,
            )?;
        }
        Ok(())
    }
}

impl ModelFamily for DecisionRuleFamily {
    fn kind(&self) -> ModelKind {
        ModelKind::DecisionRule
    }
}

impl ModelFamily for DecisionTreeFamily {
    fn kind(&self) -> ModelKind {
        ModelKind::DecisionTree
    }
}

impl ModelFamily for LinearRegressionFamily {
    fn kind(&self) -> ModelKind {
        ModelKind::LinearRegression
    }
}

/// Families keyed by kind
pub struct Registry {
    families: HashMap<ModelKind, Box<dyn ModelFamily>>,
}

impl Registry {
    fn build() -> Self {
        let families: Vec<Box<dyn ModelFamily>> = vec![
            Box::new(EbmFamily),
            Box::new(DecisionRuleFamily),
            Box::new(DecisionTreeFamily),
            Box::new(LinearRegressionFamily),
        ];
        let families: HashMap<_, _> = families.into_iter().map(|f| (f.kind(), f)).collect();
        debug!("Model registry built with {} families", families.len());
        Self { families }
    }

    pub fn family(&self, kind: ModelKind) -> Result<&dyn ModelFamily> {
        self.families
            .get(&kind)
            .map(|f| f.as_ref())
            .ok_or_else(|| ModelError::UnsupportedModelKind(format!("no family registered for {kind}")))
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::build);

/// Process-wide family registry
pub fn registry() -> &'static Registry {
    &REGISTRY
}
