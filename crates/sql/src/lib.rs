//! Model-to-SQL compiler
//!
//! Compiles a fitted binned additive model into SQL that reproduces its
//! predictions without the model runtime. Data flows one way:
//!
//! 1. `glassbox_model::introspect` normalizes the fitted model export
//! 2. `builder` turns each score table into a branch expression
//! 3. `calibration` encodes an optional post-hoc calibration curve
//! 4. `assembler` sums terms, applies the link and packages the stages
//! 5. `formatter` renders the text and writes the artifact
//!
//! `pipeline` drives these steps for one build; `verify` runs an artifact in
//! SQLite and checks it against the reference evaluator.

pub mod assembler;
pub mod builder;
pub mod calibration;
pub mod config;
pub mod dialect;
pub mod errors;
pub mod expr;
pub mod formatter;
pub mod pipeline;
#[cfg(feature = "sqlite-verify")]
pub mod verify;

pub use assembler::{Packaging, QueryPlan, Stage};
pub use config::ExportConfig;
pub use dialect::Dialect;
pub use errors::{ExportError, Result};
pub use expr::{Cond, Expr};
pub use formatter::{artifact_path, CompiledQuery};
pub use pipeline::{compile, BuildState, Compilation, SqlExporter};
