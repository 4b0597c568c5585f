//! Fitted additive models for Glassbox
//!
//! Describes binned generalized additive models (per-feature step functions,
//! optional pairwise interaction grids, an intercept and a link function) and
//! evaluates them directly. The SQL compiler in `glassbox-sql` consumes the
//! structures defined here and is checked against [`FittedAdditiveModel::predict`].
//!
//! Modules:
//! - `bins`: Bin layouts, main-effect tables and interaction grids
//! - `model`: Normalized model, link functions and the reference evaluator
//! - `introspect`: Conversion from the fitting library's export format
//! - `calibration`: Post-hoc calibration curves
//! - `registry`: Model-family dispatch and external collaborator boundaries
//! - `serde_canon`: Canonical JSON and model hashing
//! - `value`: Row values with SQL-style null

pub mod bins;
pub mod calibration;
pub mod errors;
pub mod introspect;
pub mod model;
pub mod registry;
pub mod serde_canon;
pub mod value;

pub use bins::{BinTable, Bins, BoundaryRule, InteractionTable, Slot};
pub use calibration::{Calibration, CalibrationMap, SegmentForm};
pub use errors::{ModelError, Result};
pub use introspect::{introspect, DeclaredTask, ModelExport};
pub use model::{sigmoid, softmax, FittedAdditiveModel, Link, Prediction, ScoreHead, Task, MODEL_FORMAT_VERSION};
pub use registry::{
    registry, FileType, FittedModel, ModelFamily, ModelKind, ModelParams, PlotRequest, PlotSink, Trainer,
    TrainingSet,
};
pub use value::{parse_number, Row, Value};

/// Crate version string, stamped into generated artifacts
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
