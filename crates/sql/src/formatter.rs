//! Output formatter
//!
//! Renders a [`QueryPlan`] to SQL text with the fixed column-naming contract
//! and persists it. The header carries nothing time-dependent, so the same
//! model and configuration always produce byte-identical artifacts.

use crate::assembler::{Packaging, QueryPlan, Stage};
use crate::dialect::Dialect;
use crate::errors::Result;
use glassbox_model::{ModelKind, Task};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

/// Generator version stamped into artifact headers
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Facts recorded in the artifact header
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactHeader {
    pub task: Task,
    pub model_hash: String,
    /// Calibration method and the curve forms it applies, when active
    pub calibration: Option<String>,
}

/// Finished query text. Immutable; a later build produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub text: String,
    pub columns: Vec<String>,
    pub packaging: Packaging,
    pub dialect: Dialect,
    /// Individual statements, without trailing semicolons
    pub statements: Vec<String>,
}

impl CompiledQuery {
    /// Statements that must run before the final select
    pub fn setup_statements(&self) -> &[String] {
        let n = self.statements.len();
        &self.statements[..n.saturating_sub(1)]
    }

    /// The statement producing the output rows
    pub fn final_statement(&self) -> Option<&str> {
        self.statements.last().map(String::as_str)
    }
}

fn render_stage(stage: &Stage, dialect: Dialect) -> String {
    let from = dialect.quote_ident(&stage.source);
    if stage.columns.is_empty() {
        return format!("SELECT * FROM {from}");
    }
    let mut select = String::from("SELECT\n  *");
    for (name, expr) in &stage.columns {
        select.push_str(",\n  ");
        select.push_str(&expr.to_sql(dialect));
        select.push_str(" AS ");
        select.push_str(&dialect.quote_ident(name));
    }
    select.push_str("\nFROM ");
    select.push_str(&from);
    select
}

/// Render every stage; materialized stages become temporary tables
pub fn render_statements(plan: &QueryPlan, dialect: Dialect) -> Vec<String> {
    let mut statements = Vec::with_capacity(plan.stages.len() * 2);
    for stage in &plan.stages {
        let select = render_stage(stage, dialect);
        match &stage.table {
            Some(table) => {
                let table = dialect.quote_ident(table);
                statements.push(format!("DROP TABLE IF EXISTS {table}"));
                statements.push(format!("CREATE TEMPORARY TABLE {table} AS\n{select}"));
            }
            None => statements.push(select),
        }
    }
    statements
}

fn render_header(plan: &QueryPlan, dialect: Dialect, header: &ArtifactHeader) -> String {
    let mut lines = vec![
        format!("-- Generated by glassbox-sql {GENERATOR_VERSION}"),
        format!("-- task: {}", header.task),
        format!("-- packaging: {}", plan.packaging),
        format!("-- dialect: {dialect}"),
        format!("-- outputs: {}", plan.outputs.join(", ")),
    ];
    if let Some(calibration) = &header.calibration {
        lines.push(format!("-- calibration: {calibration}"));
    }
    lines.push(format!("-- model: {}", header.model_hash));
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

pub fn format_query(plan: &QueryPlan, dialect: Dialect, header: &ArtifactHeader) -> CompiledQuery {
    let statements = render_statements(plan, dialect);
    let mut text = render_header(plan, dialect, header);
    for statement in &statements {
        text.push('\n');
        text.push_str(statement);
        text.push_str(";\n");
    }
    CompiledQuery {
        text,
        columns: plan.outputs.clone(),
        packaging: plan.packaging,
        dialect,
        statements,
    }
}

/// `<run_dir>/model/<kind>_in_sql.sql`
pub fn artifact_path(run_dir: &Path, kind: ModelKind) -> PathBuf {
    run_dir.join("model").join(format!("{kind}_in_sql.sql"))
}

/// Write through a temporary file in the target directory, then persist it
/// over the target path. A failure leaves no artifact behind.
pub fn write_artifact(query: &CompiledQuery, path: &Path) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(query.text.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    info!("Wrote {} SQL artifact to {}", query.packaging, path.display());
    Ok(())
}
