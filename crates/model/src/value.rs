//! Row values fed to the reference evaluator

use std::collections::HashMap;

/// One input cell, with SQL-style null
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Number(f64),
    Text(String),
}

/// One input row keyed by column name
pub type Row = HashMap<String, Value>;

impl Value {
    /// Parse a raw text cell: empty is null, numeric text is a number.
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        match parse_number(trimmed) {
            Some(n) => Value::Number(n),
            None => Value::Text(trimmed.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell. Text goes through [`parse_number`]; null and
    /// non-numeric text yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Number(n) => Some(*n),
            Value::Text(t) => parse_number(t),
        }
    }

    /// Equality against a category label, numeric cells comparing by value
    pub fn matches_category(&self, category: &str) -> bool {
        match self {
            Value::Null => false,
            Value::Text(t) => t == category,
            Value::Number(n) => category.trim().parse::<f64>().map_or(false, |c| c == *n),
        }
    }
}

/// Strict decimal parse of a text cell.
///
/// Accepts an optional sign, digits with at most one decimal point and an
/// optional exponent, surrounded by spaces. Anything else (`inf`, `NaN`, hex,
/// thousands separators, trailing units) is not a number. The compiled SQL
/// applies the same character tests, so both sides agree on every string.
pub fn parse_number(text: &str) -> Option<f64> {
    let t = text.trim_matches(' ');
    let bytes = t.as_bytes();
    let (&first, &last) = (bytes.first()?, bytes.last()?);

    let is_sign = |b: u8| b == b'+' || b == b'-';
    let is_exp = |b: u8| b == b'e' || b == b'E';
    let is_mantissa = |b: u8| b.is_ascii_digit() || b == b'.';

    let well_formed = bytes.iter().all(|&b| is_mantissa(b) || is_sign(b) || is_exp(b))
        && (is_mantissa(first) || is_sign(first))
        && is_mantissa(last)
        && bytes.iter().any(u8::is_ascii_digit)
        && bytes.iter().filter(|&&b| b == b'.').count() <= 1
        && bytes.iter().filter(|&&b| is_exp(b)).count() <= 1
        && !bytes.iter().skip_while(|&&b| !is_exp(b)).any(|&b| b == b'.')
        && !bytes.windows(2).any(|w| {
            (is_mantissa(w[0]) && is_sign(w[1]))
                || (is_sign(w[0]) && is_sign(w[1]))
                || ((is_sign(w[0]) || w[0] == b'.') && is_exp(w[1]))
        });
    if !well_formed {
        return None;
    }
    t.parse().ok()
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
