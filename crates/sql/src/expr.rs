//! Typed SQL expression tree
//!
//! Every compiled column is an [`Expr`]. The tree renders to text for a given
//! [`Dialect`] and can also be evaluated against a row with SQL null
//! semantics, which is how compiled logic is checked without a database.

use crate::dialect::Dialect;
use glassbox_model::{Row, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Number(f64),
    Null,
    /// Numeric view of a cell: numbers pass, decimal text is parsed, anything
    /// else is null
    Numeric(Box<Expr>),
    /// `CASE WHEN .. THEN .. ELSE .. END`, first matching branch wins
    Case {
        branches: Vec<(Cond, Expr)>,
        otherwise: Box<Expr>,
    },
    /// Left-associative sum, evaluated in order
    Sum(Vec<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Exp(Box<Expr>),
    /// Row-wise maximum; null if any argument is null
    Greatest(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    IsNull(Expr),
    Lt(Expr, Expr),
    Le(Expr, Expr),
    Gt(Expr, Expr),
    Ge(Expr, Expr),
    EqText(Expr, String),
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(name.into())
    }

    pub fn numeric(a: Expr) -> Self {
        Expr::Numeric(Box::new(a))
    }

    pub fn case(branches: Vec<(Cond, Expr)>, otherwise: Expr) -> Self {
        if branches.is_empty() {
            return otherwise;
        }
        Expr::Case {
            branches,
            otherwise: Box::new(otherwise),
        }
    }

    pub fn sub(a: Expr, b: Expr) -> Self {
        Expr::Sub(Box::new(a), Box::new(b))
    }

    pub fn mul(a: Expr, b: Expr) -> Self {
        Expr::Mul(Box::new(a), Box::new(b))
    }

    pub fn div(a: Expr, b: Expr) -> Self {
        Expr::Div(Box::new(a), Box::new(b))
    }

    pub fn neg(a: Expr) -> Self {
        Expr::Neg(Box::new(a))
    }

    pub fn exp(a: Expr) -> Self {
        Expr::Exp(Box::new(a))
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut out = String::new();
        self.write_sql(dialect, &mut out);
        out
    }

    fn write_sql(&self, dialect: Dialect, out: &mut String) {
        match self {
            Expr::Column(name) => out.push_str(&dialect.quote_ident(name)),
            Expr::Number(v) => out.push_str(&dialect.number_literal(*v)),
            Expr::Null => out.push_str("NULL"),
            Expr::Numeric(a) => out.push_str(&dialect.numeric_view(&a.to_sql(dialect))),
            Expr::Case { branches, otherwise } => {
                out.push_str("CASE");
                for (cond, value) in branches {
                    out.push_str(" WHEN ");
                    cond.write_sql(dialect, out);
                    out.push_str(" THEN ");
                    value.write_sql(dialect, out);
                }
                out.push_str(" ELSE ");
                otherwise.write_sql(dialect, out);
                out.push_str(" END");
            }
            Expr::Sum(terms) => write_list(dialect, out, "(", " + ", ")", terms),
            Expr::Sub(a, b) => write_binary(dialect, out, a, " - ", b),
            Expr::Mul(a, b) => write_binary(dialect, out, a, " * ", b),
            Expr::Div(a, b) => write_binary(dialect, out, a, " / ", b),
            Expr::Neg(a) => {
                // the space keeps a negative literal from forming a `--` comment
                out.push_str("(- ");
                a.write_sql(dialect, out);
                out.push(')');
            }
            Expr::Exp(a) => {
                out.push_str("EXP(");
                a.write_sql(dialect, out);
                out.push(')');
            }
            Expr::Greatest(args) => {
                let open = format!("{}(", dialect.greatest_fn());
                write_list(dialect, out, &open, ", ", ")", args);
            }
        }
    }

    /// Evaluate with SQL semantics: null propagates through arithmetic and
    /// fails every comparison.
    pub fn eval(&self, row: &Row) -> Value {
        match self {
            Expr::Column(name) => row.get(name).cloned().unwrap_or(Value::Null),
            Expr::Number(v) => Value::Number(*v),
            Expr::Null => Value::Null,
            Expr::Numeric(a) => a.eval(row).as_f64().map_or(Value::Null, Value::Number),
            Expr::Case { branches, otherwise } => branches
                .iter()
                .find(|(cond, _)| cond.eval(row) == Some(true))
                .map_or_else(|| otherwise.eval(row), |(_, value)| value.eval(row)),
            Expr::Sum(terms) => {
                let mut acc: Option<f64> = None;
                for term in terms {
                    let Some(v) = term.eval(row).as_f64() else {
                        return Value::Null;
                    };
                    acc = Some(acc.map_or(v, |a| a + v));
                }
                acc.map_or(Value::Null, Value::Number)
            }
            Expr::Sub(a, b) => numeric2(row, a, b, |x, y| Some(x - y)),
            Expr::Mul(a, b) => numeric2(row, a, b, |x, y| Some(x * y)),
            Expr::Div(a, b) => numeric2(row, a, b, |x, y| (y != 0.0).then(|| x / y)),
            Expr::Neg(a) => a.eval(row).as_f64().map_or(Value::Null, |v| Value::Number(-v)),
            Expr::Exp(a) => a.eval(row).as_f64().map_or(Value::Null, |v| Value::Number(v.exp())),
            Expr::Greatest(args) => {
                let mut max: Option<f64> = None;
                for arg in args {
                    let Some(v) = arg.eval(row).as_f64() else {
                        return Value::Null;
                    };
                    max = Some(max.map_or(v, |m| m.max(v)));
                }
                max.map_or(Value::Null, Value::Number)
            }
        }
    }

    /// Number of nodes, used to report expression size
    pub fn node_count(&self) -> usize {
        1 + match self {
            Expr::Column(_) | Expr::Number(_) | Expr::Null => 0,
            Expr::Case { branches, otherwise } => {
                branches
                    .iter()
                    .map(|(c, v)| c.node_count() + v.node_count())
                    .sum::<usize>()
                    + otherwise.node_count()
            }
            Expr::Sum(items) | Expr::Greatest(items) => items.iter().map(Expr::node_count).sum(),
            Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => a.node_count() + b.node_count(),
            Expr::Neg(a) | Expr::Exp(a) | Expr::Numeric(a) => a.node_count(),
        }
    }
}

impl Cond {
    pub fn to_sql(&self, dialect: Dialect) -> String {
        let mut out = String::new();
        self.write_sql(dialect, &mut out);
        out
    }

    fn write_sql(&self, dialect: Dialect, out: &mut String) {
        match self {
            Cond::IsNull(a) => {
                a.write_sql(dialect, out);
                out.push_str(" IS NULL");
            }
            Cond::Lt(a, b) => write_cmp(dialect, out, a, " < ", b),
            Cond::Le(a, b) => write_cmp(dialect, out, a, " <= ", b),
            Cond::Gt(a, b) => write_cmp(dialect, out, a, " > ", b),
            Cond::Ge(a, b) => write_cmp(dialect, out, a, " >= ", b),
            Cond::EqText(a, s) => {
                a.write_sql(dialect, out);
                out.push_str(" = ");
                out.push_str(&dialect.string_literal(s));
            }
        }
    }

    /// Three-valued result; `None` is SQL unknown
    pub fn eval(&self, row: &Row) -> Option<bool> {
        match self {
            Cond::IsNull(a) => Some(a.eval(row).is_null()),
            Cond::Lt(a, b) => compare(row, a, b).map(|(x, y)| x < y),
            Cond::Le(a, b) => compare(row, a, b).map(|(x, y)| x <= y),
            Cond::Gt(a, b) => compare(row, a, b).map(|(x, y)| x > y),
            Cond::Ge(a, b) => compare(row, a, b).map(|(x, y)| x >= y),
            Cond::EqText(a, s) => {
                let v = a.eval(row);
                (!v.is_null()).then(|| v.matches_category(s))
            }
        }
    }

    fn node_count(&self) -> usize {
        1 + match self {
            Cond::IsNull(a) | Cond::EqText(a, _) => a.node_count(),
            Cond::Lt(a, b) | Cond::Le(a, b) | Cond::Gt(a, b) | Cond::Ge(a, b) => {
                a.node_count() + b.node_count()
            }
        }
    }
}

fn write_binary(dialect: Dialect, out: &mut String, a: &Expr, op: &str, b: &Expr) {
    out.push('(');
    a.write_sql(dialect, out);
    out.push_str(op);
    b.write_sql(dialect, out);
    out.push(')');
}

fn write_cmp(dialect: Dialect, out: &mut String, a: &Expr, op: &str, b: &Expr) {
    a.write_sql(dialect, out);
    out.push_str(op);
    b.write_sql(dialect, out);
}

fn write_list(dialect: Dialect, out: &mut String, open: &str, sep: &str, close: &str, items: &[Expr]) {
    out.push_str(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        item.write_sql(dialect, out);
    }
    out.push_str(close);
}

fn numeric2(row: &Row, a: &Expr, b: &Expr, f: impl Fn(f64, f64) -> Option<f64>) -> Value {
    match (a.eval(row).as_f64(), b.eval(row).as_f64()) {
        (Some(x), Some(y)) => f(x, y).map_or(Value::Null, Value::Number),
        _ => Value::Null,
    }
}

fn compare(row: &Row, a: &Expr, b: &Expr) -> Option<(f64, f64)> {
    Some((a.eval(row).as_f64()?, b.eval(row).as_f64()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_case_rendering() {
        let expr = Expr::case(
            vec![
                (Cond::IsNull(Expr::column("age")), Expr::Number(0.0)),
                (Cond::Lt(Expr::column("age"), Expr::Number(30.0)), Expr::Number(0.1)),
            ],
            Expr::Number(-0.4),
        );
        assert_eq!(
            expr.to_sql(Dialect::DuckDb),
            "CASE WHEN \"age\" IS NULL THEN 0e0 WHEN \"age\" < 3e1 THEN 1e-1 ELSE (-4e-1) END"
        );
    }

    #[test]
    fn test_case_without_branches_collapses() {
        assert_eq!(Expr::case(vec![], Expr::Number(2.0)), Expr::Number(2.0));
    }

    #[test]
    fn test_negation_never_forms_comment() {
        let sql = Expr::neg(Expr::Number(-1.0)).to_sql(Dialect::Sqlite);
        assert!(!sql.contains("--"));
        let sql = Expr::sub(Expr::column("x"), Expr::Number(-1.0)).to_sql(Dialect::Sqlite);
        assert!(!sql.contains("--"));
    }

    #[test]
    fn test_greatest_per_dialect() {
        let expr = Expr::Greatest(vec![Expr::column("a"), Expr::column("b")]);
        assert_eq!(expr.to_sql(Dialect::DuckDb), "GREATEST(\"a\", \"b\")");
        assert_eq!(expr.to_sql(Dialect::Sqlite), "MAX(\"a\", \"b\")");
    }

    #[test]
    fn test_null_semantics() {
        let r = row(&[("x", Value::Null), ("y", Value::Number(2.0))]);

        let sum = Expr::Sum(vec![Expr::column("x"), Expr::column("y")]);
        assert_eq!(sum.eval(&r), Value::Null);
        assert_eq!(Cond::Lt(Expr::column("x"), Expr::Number(1.0)).eval(&r), None);
        assert_eq!(Cond::IsNull(Expr::column("x")).eval(&r), Some(true));
        assert_eq!(Cond::IsNull(Expr::column("missing_column")).eval(&r), Some(true));

        // unknown conditions fall through to ELSE
        let case = Expr::case(
            vec![(Cond::Lt(Expr::column("x"), Expr::Number(1.0)), Expr::Number(1.0))],
            Expr::Number(9.0),
        );
        assert_eq!(case.eval(&r), Value::Number(9.0));
    }

    #[test]
    fn test_arithmetic_eval() {
        let r = row(&[("a", Value::Number(3.0)), ("b", Value::Number(4.0))]);
        let expr = Expr::div(
            Expr::Sum(vec![Expr::column("a"), Expr::column("b"), Expr::Number(1.0)]),
            Expr::mul(Expr::Number(2.0), Expr::sub(Expr::column("b"), Expr::column("a"))),
        );
        assert_eq!(expr.eval(&r), Value::Number(4.0));
        assert_eq!(
            Expr::div(Expr::Number(1.0), Expr::Number(0.0)).eval(&r),
            Value::Null
        );
        assert_eq!(
            Expr::Greatest(vec![Expr::column("a"), Expr::column("b")]).eval(&r),
            Value::Number(4.0)
        );
    }

    #[test]
    fn test_text_equality() {
        let r = row(&[("sex", Value::from("male"))]);
        assert_eq!(Cond::EqText(Expr::column("sex"), "male".into()).eval(&r), Some(true));
        assert_eq!(Cond::EqText(Expr::column("sex"), "female".into()).eval(&r), Some(false));
        assert_eq!(
            Cond::EqText(Expr::column("sex"), "it's".into()).to_sql(Dialect::Ansi),
            "\"sex\" = 'it''s'"
        );
    }

    #[test]
    fn test_numeric_view_eval() {
        let view = Expr::numeric(Expr::column("age"));
        let at = |v: Value| view.eval(&row(&[("age", v)]));

        assert_eq!(at(Value::Number(45.0)), Value::Number(45.0));
        assert_eq!(at(Value::from("100")), Value::Number(100.0));
        assert_eq!(at(Value::from("unknown")), Value::Null);
        assert_eq!(at(Value::Null), Value::Null);

        // text "100" sorts below "30" as a string but not as a number
        let cond = Cond::Lt(view.clone(), Expr::Number(30.0));
        assert_eq!(cond.eval(&row(&[("age", Value::from("100"))])), Some(false));
        assert_eq!(view.to_sql(Dialect::DuckDb), "TRY_CAST(\"age\" AS DOUBLE)");
    }

    #[test]
    fn test_node_count() {
        let expr = Expr::Sum(vec![Expr::Number(1.0), Expr::exp(Expr::column("x"))]);
        assert_eq!(expr.node_count(), 4);
    }
}
