//! SQL dialects and literal rendering

use crate::errors::{ExportError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// GLOB tests a trimmed text cell must pass to count as a number, as
/// `(negated, pattern)`
const SQLITE_NUMBER_SHAPE: [(bool, &str); 10] = [
    (false, "[0-9+.-]*"),
    (false, "*[0-9.]"),
    (false, "*[0-9]*"),
    (true, "*[^0-9eE.+-]*"),
    (true, "*[0-9.][+-]*"),
    (true, "*[+-][+-]*"),
    (true, "*.*.*"),
    (true, "*[eE]*[eE]*"),
    (true, "*[eE]*.*"),
    (true, "*[+.-][eE]*"),
];

/// Target SQL dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[default]
    #[serde(rename = "duckdb")]
    DuckDb,
    Sqlite,
    Ansi,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::DuckDb => "duckdb",
            Dialect::Sqlite => "sqlite",
            Dialect::Ansi => "ansi",
        }
    }

    /// Multi-argument maximum. SQLite spells it `MAX`.
    pub fn greatest_fn(self) -> &'static str {
        match self {
            Dialect::Sqlite => "MAX",
            Dialect::DuckDb | Dialect::Ansi => "GREATEST",
        }
    }

    /// Numeric view of an input cell: numbers pass through, decimal text is
    /// converted, anything else is NULL.
    ///
    /// SQLite compares TEXT against a number as text, so the view checks the
    /// storage class and shape of the text before casting. The accepted shapes
    /// are exactly those of [`glassbox_model::parse_number`].
    pub fn numeric_view(self, operand: &str) -> String {
        match self {
            Dialect::DuckDb => format!("TRY_CAST({operand} AS DOUBLE)"),
            Dialect::Ansi => format!("CAST({operand} AS DOUBLE PRECISION)"),
            Dialect::Sqlite => {
                let text = format!("TRIM({operand})");
                let shape = SQLITE_NUMBER_SHAPE
                    .iter()
                    .map(|(negated, pattern)| {
                        let op = if *negated { "NOT GLOB" } else { "GLOB" };
                        format!(" AND {text} {op} '{pattern}'")
                    })
                    .collect::<String>();
                format!(
                    "(CASE WHEN TYPEOF({operand}) IN ('integer', 'real') THEN {operand} \
                     WHEN TYPEOF({operand}) = 'text'{shape} THEN CAST({text} AS REAL) END)"
                )
            }
        }
    }

    pub fn quote_ident(self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    pub fn string_literal(self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Shortest round-trip literal in exponent form, so every engine reads it
    /// as a double. Negative literals are parenthesized.
    pub fn number_literal(self, value: f64) -> String {
        if !value.is_finite() {
            return "NULL".to_string();
        }
        if value.is_sign_negative() {
            format!("({value:e})")
        } else {
            format!("{value:e}")
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckdb" => Ok(Dialect::DuckDb),
            "sqlite" => Ok(Dialect::Sqlite),
            "ansi" => Ok(Dialect::Ansi),
            other => Err(ExportError::InvalidConfig(format!("unknown SQL dialect '{other}'"))),
        }
    }
}
