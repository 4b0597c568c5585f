//! Build pipeline
//!
//! Drives one build through
//! `Idle → Introspected → ExpressionsBuilt → [CalibrationApplied] → Assembled → Written`.
//! Transitions are sequential; the first error aborts the build and nothing is
//! written.

use crate::assembler::{assemble, QueryPlan};
use crate::builder::build_terms;
use crate::calibration::CalibrationEncoder;
use crate::config::ExportConfig;
use crate::errors::{ExportError, Result};
use crate::formatter::{artifact_path, format_query, write_artifact, ArtifactHeader, CompiledQuery};
use glassbox_model::{introspect, Calibration, DeclaredTask, FittedAdditiveModel, ModelExport, ModelKind};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Introspected,
    ExpressionsBuilt,
    CalibrationApplied,
    Assembled,
    Written,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Idle => "idle",
            BuildState::Introspected => "introspected",
            BuildState::ExpressionsBuilt => "expressions-built",
            BuildState::CalibrationApplied => "calibration-applied",
            BuildState::Assembled => "assembled",
            BuildState::Written => "written",
        };
        f.write_str(name)
    }
}

/// Compiled query together with the plan it was rendered from
#[derive(Debug, Clone)]
pub struct Compilation {
    pub plan: QueryPlan,
    pub query: CompiledQuery,
}

/// Single-use driver for one build
#[derive(Debug)]
pub struct SqlExporter<'a> {
    config: &'a ExportConfig,
    state: BuildState,
}

impl<'a> SqlExporter<'a> {
    pub fn new(config: &'a ExportConfig) -> Self {
        Self {
            config,
            state: BuildState::Idle,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    fn advance(&mut self, next: BuildState) {
        debug!("SQL export: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Introspect an export, then compile it
    pub fn compile_export(
        &mut self,
        export: &ModelExport,
        declared: &DeclaredTask,
        calibration: Option<&Calibration>,
    ) -> Result<(FittedAdditiveModel, Compilation)> {
        self.state = BuildState::Idle;
        let model = introspect(export, declared)?;
        self.advance(BuildState::Introspected);
        let compilation = self.compile_introspected(&model, calibration)?;
        Ok((model, compilation))
    }

    /// Compile an already normalized model
    pub fn compile(&mut self, model: &FittedAdditiveModel, calibration: Option<&Calibration>) -> Result<Compilation> {
        self.state = BuildState::Idle;
        model.validate()?;
        self.advance(BuildState::Introspected);
        self.compile_introspected(model, calibration)
    }

    fn compile_introspected(
        &mut self,
        model: &FittedAdditiveModel,
        calibration: Option<&Calibration>,
    ) -> Result<Compilation> {
        let config = self.config;
        let heads = build_terms(model);
        self.advance(BuildState::ExpressionsBuilt);

        let encoder = match (&config.calibration, calibration) {
            (Some(method), Some(curve)) => {
                let encoder = CalibrationEncoder::new(model, curve, method)?;
                self.advance(BuildState::CalibrationApplied);
                Some(encoder)
            }
            (Some(method), None) => {
                return Err(ExportError::MissingCalibrationCurve(format!(
                    "calibration '{method}' is configured but no curve was supplied"
                )))
            }
            (None, Some(_)) => {
                debug!("Calibration curve supplied but calibration is disabled; ignoring it");
                None
            }
            (None, None) => None,
        };

        let plan = assemble(model, &heads, encoder.as_ref(), config);
        check_column_collisions(model, &plan)?;
        debug!(
            "Assembled {} plan: {} stages, {} expression nodes",
            plan.packaging,
            plan.stages.len(),
            plan.node_count()
        );
        self.advance(BuildState::Assembled);

        let header = ArtifactHeader {
            task: model.task,
            model_hash: model.hash_hex()?,
            calibration: encoder.as_ref().map(|e| {
                let forms: Vec<String> = e.forms().iter().map(|f| format!("{f:?}").to_lowercase()).collect();
                format!("{} ({})", e.method(), forms.join(", "))
            }),
        };
        let query = format_query(&plan, config.dialect, &header);
        Ok(Compilation { plan, query })
    }

    /// Compile and write the artifact under `run_dir`; returns its path
    pub fn export(
        &mut self,
        model: &FittedAdditiveModel,
        calibration: Option<&Calibration>,
        run_dir: &Path,
    ) -> Result<PathBuf> {
        let compilation = self.compile(model, calibration)?;
        let path = artifact_path(run_dir, ModelKind::Ebm);
        write_artifact(&compilation.query, &path)?;
        self.advance(BuildState::Written);
        info!(
            "Exported {} model to {} ({} columns)",
            model.task,
            path.display(),
            compilation.query.columns.len()
        );
        Ok(path)
    }
}

/// Stages select `*` from their source, so a generated column may not reuse
/// the name of an input feature.
fn check_column_collisions(model: &FittedAdditiveModel, plan: &QueryPlan) -> Result<()> {
    match plan
        .generated_columns()
        .find(|c| model.features.iter().any(|f| f == c))
    {
        Some(column) => Err(ExportError::InvalidConfig(format!(
            "input feature '{column}' has the same name as a generated {} column; rename the feature",
            plan.packaging
        ))),
        None => Ok(()),
    }
}

/// Compile a model with a fresh exporter
pub fn compile(
    model: &FittedAdditiveModel,
    calibration: Option<&Calibration>,
    config: &ExportConfig,
) -> Result<Compilation> {
    SqlExporter::new(config).compile(model, calibration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glassbox_model::{BinTable, BoundaryRule, CalibrationMap, Link, ScoreHead, Task, MODEL_FORMAT_VERSION};

    fn model() -> FittedAdditiveModel {
        FittedAdditiveModel {
            version: MODEL_FORMAT_VERSION,
            task: Task::Binary,
            link: Link::Logit,
            classes: vec!["0".into(), "1".into()],
            features: vec!["age".into()],
            boundary: BoundaryRule::LeftClosed,
            heads: vec![ScoreHead {
                label: None,
                intercept: -0.05,
                mains: vec![BinTable::continuous("age", vec![30.0, 60.0], vec![0.1, 0.4, 0.9], 0.0)],
                interactions: vec![],
            }],
        }
    }

    #[test]
    fn test_state_transitions() {
        let config = ExportConfig::default();
        let mut exporter = SqlExporter::new(&config);
        assert_eq!(exporter.state(), BuildState::Idle);
        exporter.compile(&model(), None).unwrap();
        assert_eq!(exporter.state(), BuildState::Assembled);

        let config = ExportConfig {
            calibration: Some("isotonic".into()),
            ..ExportConfig::default()
        };
        let curve = Calibration::Shared(CalibrationMap::linear(vec![0.0, 1.0], vec![0.0, 1.0]));
        let mut exporter = SqlExporter::new(&config);
        let compilation = exporter.compile(&model(), Some(&curve)).unwrap();
        assert_eq!(exporter.state(), BuildState::Assembled);
        assert!(compilation.query.text.contains("-- calibration: isotonic (linear)"));
    }

    #[test]
    fn test_missing_curve_aborts() {
        let config = ExportConfig {
            calibration: Some("isotonic".into()),
            ..ExportConfig::default()
        };
        let mut exporter = SqlExporter::new(&config);
        let err = exporter.compile(&model(), None).unwrap_err();
        assert!(matches!(err, ExportError::MissingCalibrationCurve(_)));
        assert_eq!(exporter.state(), BuildState::ExpressionsBuilt);
    }

    #[test]
    fn test_feature_named_like_output_is_rejected() {
        let mut model = model();
        model.features = vec!["probability".into()];
        model.heads[0].mains[0].feature = "probability".into();

        let err = compile(&model, None, &ExportConfig::default()).unwrap_err();
        assert!(matches!(err, ExportError::InvalidConfig(ref m) if m.contains("'probability'")));
    }

    #[test]
    fn test_feature_named_like_stage_column_is_rejected() {
        let mut model = model();
        model.features = vec!["term_0".into()];
        model.heads[0].mains[0].feature = "term_0".into();

        // single packaging generates no term columns
        compile(&model, None, &ExportConfig::default()).unwrap();

        let split = ExportConfig {
            split: true,
            ..ExportConfig::default()
        };
        let mut exporter = SqlExporter::new(&split);
        let err = exporter.compile(&model, None).unwrap_err();
        assert!(matches!(err, ExportError::InvalidConfig(_)));
        assert_eq!(exporter.state(), BuildState::ExpressionsBuilt);
    }

    #[test]
    fn test_curve_ignored_when_disabled() {
        let curve = Calibration::Shared(CalibrationMap::step(vec![0.0], vec![0.5]));
        let config = ExportConfig::default();
        let with_curve = compile(&model(), Some(&curve), &config).unwrap();
        let without = compile(&model(), None, &config).unwrap();
        assert_eq!(with_curve.query.text, without.query.text);
    }
}
