//! Query assembler
//!
//! Sums compiled terms into raw scores, applies the link and the optional
//! calibration, and packages the result as a [`QueryPlan`]. A plan is a list
//! of stages, each selecting every column of its source plus new computed
//! columns. Plans can be evaluated in Rust, one row at a time, exactly as the
//! database would run them.

use crate::builder::HeadExprs;
use crate::calibration::CalibrationEncoder;
use crate::config::ExportConfig;
use crate::expr::{Cond, Expr};
use glassbox_model::{FittedAdditiveModel, Link, Row, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Statement packaging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Packaging {
    /// One statement computing every output from the input relation
    Single,
    /// Dependent temporary-table stages followed by a final select
    Staged,
}

impl Packaging {
    pub fn as_str(self) -> &'static str {
        match self {
            Packaging::Single => "single",
            Packaging::Staged => "staged",
        }
    }
}

impl fmt::Display for Packaging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `SELECT *, <columns> FROM <source>`, optionally materialized as `table`
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub table: Option<String>,
    pub source: String,
    pub columns: Vec<(String, Expr)>,
}

impl Stage {
    /// Compute this stage's row from its source row
    pub fn evaluate(&self, source: &Row) -> Row {
        let mut row = source.clone();
        for (name, expr) in &self.columns {
            row.insert(name.clone(), expr.eval(source));
        }
        row
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub packaging: Packaging,
    pub stages: Vec<Stage>,
    /// Declared output columns, in order
    pub outputs: Vec<String>,
}

impl QueryPlan {
    /// Run every stage over one input row and read back the declared outputs
    pub fn evaluate(&self, input: &Row) -> Vec<Value> {
        let row = self
            .stages
            .iter()
            .fold(input.clone(), |row, stage| stage.evaluate(&row));
        self.outputs
            .iter()
            .map(|name| row.get(name).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Every column the plan adds on top of its input relation
    pub fn generated_columns(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .flat_map(|s| s.columns.iter())
            .map(|(name, _)| name.as_str())
    }

    pub fn node_count(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.columns.iter())
            .map(|(_, e)| e.node_count())
            .sum()
    }
}

/// `1/(1+exp(-r))` for non-negative `r`, `exp(r)/(1+exp(r))` otherwise, so
/// `EXP` never sees a positive argument.
pub fn sigmoid_expr(raw: Expr) -> Expr {
    let positive = Expr::div(
        Expr::Number(1.0),
        Expr::Sum(vec![Expr::Number(1.0), Expr::exp(Expr::neg(raw.clone()))]),
    );
    let negative = Expr::div(
        Expr::exp(raw.clone()),
        Expr::Sum(vec![Expr::Number(1.0), Expr::exp(raw.clone())]),
    );
    Expr::case(vec![(Cond::Ge(raw, Expr::Number(0.0)), positive)], negative)
}

/// Softmax with the row maximum subtracted; one expression per class
pub fn softmax_exprs(raws: &[Expr]) -> Vec<Expr> {
    let max = Expr::Greatest(raws.to_vec());
    let exps: Vec<Expr> = raws
        .iter()
        .map(|r| Expr::exp(Expr::sub(r.clone(), max.clone())))
        .collect();
    let total = Expr::Sum(exps.clone());
    exps.into_iter().map(|e| Expr::div(e, total.clone())).collect()
}

pub fn link_exprs(link: Link, raws: Vec<Expr>) -> Vec<Expr> {
    match link {
        Link::Identity => raws,
        Link::Logit => raws.into_iter().map(sigmoid_expr).collect(),
        Link::Softmax => softmax_exprs(&raws),
    }
}

fn raw_sum(head: &HeadExprs, term: impl Fn(usize) -> Expr) -> Expr {
    let mut items = Vec::with_capacity(head.terms.len() + 1);
    items.push(Expr::Number(head.intercept));
    items.extend((0..head.terms.len()).map(term));
    Expr::Sum(items)
}

fn term_column(term: usize, head: usize, heads: usize) -> String {
    if heads == 1 {
        format!("term_{term}")
    } else {
        format!("term_{term}_{head}")
    }
}

fn raw_score_column(head: usize, heads: usize) -> String {
    if heads == 1 {
        "raw_score".to_string()
    } else {
        format!("raw_score_{head}")
    }
}

pub fn assemble(
    model: &FittedAdditiveModel,
    heads: &[HeadExprs],
    calibration: Option<&CalibrationEncoder>,
    config: &ExportConfig,
) -> QueryPlan {
    let outputs = model.output_columns();
    if config.split {
        assemble_staged(model, heads, calibration, config, outputs)
    } else {
        assemble_single(model, heads, calibration, config, outputs)
    }
}

fn assemble_single(
    model: &FittedAdditiveModel,
    heads: &[HeadExprs],
    calibration: Option<&CalibrationEncoder>,
    config: &ExportConfig,
    outputs: Vec<String>,
) -> QueryPlan {
    let raws = heads
        .iter()
        .map(|head| raw_sum(head, |i| head.terms[i].expr.clone()))
        .collect();
    let mut values = link_exprs(model.link, raws);
    if let Some(encoder) = calibration {
        values = encoder.encode(&values);
    }

    QueryPlan {
        packaging: Packaging::Single,
        stages: vec![Stage {
            table: None,
            source: config.input_table.clone(),
            columns: outputs.iter().cloned().zip(values).collect(),
        }],
        outputs,
    }
}

fn assemble_staged(
    model: &FittedAdditiveModel,
    heads: &[HeadExprs],
    calibration: Option<&CalibrationEncoder>,
    config: &ExportConfig,
    outputs: Vec<String>,
) -> QueryPlan {
    let n = heads.len();
    let terms_table = format!("{}_terms", config.stage_prefix);
    let scores_table = format!("{}_scores", config.stage_prefix);

    let term_columns = heads
        .iter()
        .enumerate()
        .flat_map(|(k, head)| {
            head.terms
                .iter()
                .enumerate()
                .map(move |(i, term)| (term_column(i, k, n), term.expr.clone()))
        })
        .collect();

    let raws: Vec<Expr> = heads
        .iter()
        .enumerate()
        .map(|(k, head)| raw_sum(head, |i| Expr::column(term_column(i, k, n))))
        .collect();
    let mut score_columns: Vec<(String, Expr)> = raws
        .iter()
        .enumerate()
        .map(|(k, raw)| (raw_score_column(k, n), raw.clone()))
        .collect();
    let linked = link_exprs(model.link, raws);
    let link_names: Vec<String> = match calibration {
        Some(_) => outputs.iter().map(|o| format!("uncalibrated_{o}")).collect(),
        None => outputs.clone(),
    };
    score_columns.extend(link_names.iter().cloned().zip(linked));

    let mut stages = vec![
        Stage {
            table: Some(terms_table.clone()),
            source: config.input_table.clone(),
            columns: term_columns,
        },
        Stage {
            table: Some(scores_table.clone()),
            source: terms_table,
            columns: score_columns,
        },
    ];
    let mut last = scores_table;

    if let Some(encoder) = calibration {
        let calibrated_table = format!("{}_calibrated", config.stage_prefix);
        let inputs: Vec<Expr> = link_names.iter().map(Expr::column).collect();
        stages.push(Stage {
            table: Some(calibrated_table.clone()),
            source: last,
            columns: outputs.iter().cloned().zip(encoder.encode(&inputs)).collect(),
        });
        last = calibrated_table;
    }

    stages.push(Stage {
        table: None,
        source: last,
        columns: Vec::new(),
    });

    QueryPlan {
        packaging: Packaging::Staged,
        stages,
        outputs,
    }
}
