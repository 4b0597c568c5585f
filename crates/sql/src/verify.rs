//! Verification harness
//!
//! Loads CSV rows into an in-memory SQLite database, runs a compiled artifact
//! against them and compares every output value to the reference evaluator.
//! Values the model predicts as exactly zero are skipped, since a relative
//! error is undefined there.

use crate::dialect::Dialect;
use crate::errors::{ExportError, Result};
use crate::formatter::CompiledQuery;
use glassbox_model::{Calibration, FittedAdditiveModel, Row, Value};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Default relative tolerance of the verification contract
pub const DEFAULT_TOLERANCE: f64 = 1e-5;

/// Row-order column added to loaded tables
pub const ROW_ID_COLUMN: &str = "__glassbox_row";

/// Rows parsed from CSV, with a per-column storage type
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub columns: Vec<String>,
    /// `true` when every non-empty cell of the column is numeric
    pub numeric: Vec<bool>,
    pub rows: Vec<Row>,
}

fn parse_cell(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok()
}

impl Dataset {
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    /// Empty cells and `NaN` become null
    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let columns: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

        let mut records = Vec::new();
        for record in reader.records() {
            records.push(record?);
        }

        let numeric: Vec<bool> = (0..columns.len())
            .map(|c| {
                records.iter().all(|r| {
                    let cell = r.get(c).unwrap_or("").trim();
                    cell.is_empty() || parse_cell(cell).is_some()
                })
            })
            .collect();

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(c, name)| {
                        let cell = record.get(c).unwrap_or("").trim();
                        let value = if cell.is_empty() {
                            Value::Null
                        } else if numeric[c] {
                            parse_cell(cell)
                                .filter(|v| !v.is_nan())
                                .map_or(Value::Null, Value::Number)
                        } else {
                            Value::Text(cell.to_string())
                        };
                        (name.clone(), value)
                    })
                    .collect()
            })
            .collect();

        Ok(Self { columns, numeric, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Create `table` and insert every row, numbered in file order
    pub fn load_into(&self, conn: &mut Connection, table: &str) -> Result<()> {
        let d = Dialect::Sqlite;
        let mut defs = vec![format!("{} INTEGER", d.quote_ident(ROW_ID_COLUMN))];
        defs.extend(self.columns.iter().zip(&self.numeric).map(|(name, &numeric)| {
            format!("{} {}", d.quote_ident(name), if numeric { "REAL" } else { "TEXT" })
        }));
        let table = d.quote_ident(table);
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};\nCREATE TABLE {table} ({});",
            defs.join(", ")
        ))?;

        let placeholders = vec!["?"; self.columns.len() + 1].join(", ");
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!("INSERT INTO {table} VALUES ({placeholders})"))?;
            for (i, row) in self.rows.iter().enumerate() {
                let mut values = Vec::with_capacity(self.columns.len() + 1);
                values.push(SqlValue::Integer(i as i64));
                for name in &self.columns {
                    values.push(match row.get(name) {
                        Some(Value::Number(v)) => SqlValue::Real(*v),
                        Some(Value::Text(t)) => SqlValue::Text(t.clone()),
                        Some(Value::Null) | None => SqlValue::Null,
                    });
                }
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;
        debug!("Loaded {} rows into {}", self.rows.len(), table);
        Ok(())
    }
}

/// In-memory database with `EXP` bound to Rust's `f64::exp`
pub fn open_connection() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.create_scalar_function(
        "exp",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let v: Option<f64> = ctx.get(0)?;
            Ok(v.map(f64::exp))
        },
    )?;
    Ok(conn)
}

/// Run every statement and read the declared output columns, in row order
pub fn run_query(conn: &Connection, query: &CompiledQuery) -> Result<Vec<Vec<Option<f64>>>> {
    for statement in query.setup_statements() {
        conn.execute_batch(statement)?;
    }
    let final_sql = query
        .final_statement()
        .ok_or_else(|| ExportError::Verification("compiled query has no statements".to_string()))?;

    let mut stmt = conn.prepare(final_sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let position = |column: &str| {
        let mut matches = names.iter().enumerate().filter(|(_, n)| *n == column).map(|(i, _)| i);
        match (matches.next(), matches.next()) {
            (Some(i), None) => Ok(i),
            (None, _) => Err(ExportError::Verification(format!("result set has no column '{column}'"))),
            (Some(_), Some(_)) => Err(ExportError::Verification(format!(
                "result set has column '{column}' more than once; the input table already defines it"
            ))),
        }
    };
    let id_idx = position(ROW_ID_COLUMN)?;
    let out_idx = query
        .columns
        .iter()
        .map(|c| position(c))
        .collect::<Result<Vec<usize>>>()?;

    let mut results: Vec<(i64, Vec<Option<f64>>)> = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(id_idx)?;
        let values = out_idx
            .iter()
            .map(|&i| row.get::<_, Option<f64>>(i))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        results.push((id, values));
    }
    results.sort_by_key(|(id, _)| *id);
    Ok(results.into_iter().map(|(_, v)| v).collect())
}

/// Outcome of a successful verification
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    pub rows_checked: usize,
    pub values_compared: usize,
    /// Values skipped because the model predicts exactly zero
    pub values_skipped: usize,
    pub max_relative_error: f64,
}

/// Compare query results with the reference evaluator
pub fn compare(
    model: &FittedAdditiveModel,
    calibration: Option<&Calibration>,
    columns: &[String],
    dataset: &Dataset,
    results: &[Vec<Option<f64>>],
    tolerance: f64,
) -> Result<VerificationReport> {
    if results.len() != dataset.len() {
        return Err(ExportError::Verification(format!(
            "query returned {} rows for {} input rows",
            results.len(),
            dataset.len()
        )));
    }

    let mut report = VerificationReport {
        rows_checked: 0,
        values_compared: 0,
        values_skipped: 0,
        max_relative_error: 0.0,
    };
    for (i, (row, actual)) in dataset.rows.iter().zip(results).enumerate() {
        let expected = model.predict_calibrated(row, calibration).values;
        for ((column, &m), &s) in columns.iter().zip(&expected).zip(actual) {
            if m == 0.0 {
                report.values_skipped += 1;
                continue;
            }
            let s = s.ok_or_else(|| {
                ExportError::Verification(format!("row {i}: '{column}' is NULL, model gives {m}"))
            })?;
            let rel = (s - m).abs() / m.abs();
            if rel.is_nan() || rel > tolerance {
                return Err(ExportError::Verification(format!(
                    "row {i}: '{column}' = {s}, model gives {m} (relative error {rel:e} > {tolerance:e})"
                )));
            }
            report.max_relative_error = report.max_relative_error.max(rel);
            report.values_compared += 1;
        }
        report.rows_checked += 1;
    }
    Ok(report)
}

/// Execute a SQLite-dialect query over `dataset` and check it against the model
pub fn verify(
    model: &FittedAdditiveModel,
    calibration: Option<&Calibration>,
    query: &CompiledQuery,
    input_table: &str,
    dataset: &Dataset,
    tolerance: f64,
) -> Result<VerificationReport> {
    if query.dialect != Dialect::Sqlite {
        return Err(ExportError::InvalidConfig(format!(
            "verification runs on SQLite; query was compiled for {}",
            query.dialect
        )));
    }

    let mut conn = open_connection()?;
    dataset.load_into(&mut conn, input_table)?;
    let results = run_query(&conn, query)?;
    let report = compare(model, calibration, &query.columns, dataset, &results, tolerance)?;

    info!(
        "Verified {} rows ({} values, {} skipped), max relative error {:e}",
        report.rows_checked, report.values_compared, report.values_skipped, report.max_relative_error
    );
    Ok(report)
}
