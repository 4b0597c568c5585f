//! Binned step functions and pairwise interaction grids
//!
//! A continuous feature is split by strictly increasing interior cut points
//! `t_1 < ... < t_n` into `n + 1` bins: bin 0 is unbounded below and the last bin
//! unbounded above. Nominal features map each known category to one bin.
//! Null input never reaches a bin; it always selects the dedicated missing score.
//! Text that is not a number never reaches a continuous bin either; it selects
//! the unknown score.

use crate::errors::{ModelError, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Which side of a cut point a value equal to the cut belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryRule {
    /// `t_i <= v < t_{i+1}`
    #[default]
    LeftClosed,
    /// `t_i < v <= t_{i+1}`
    RightClosed,
}

impl BoundaryRule {
    /// True when `v` lies in a bin left of cut `t`
    pub fn below(self, v: f64, t: f64) -> bool {
        match self {
            BoundaryRule::LeftClosed => v < t,
            BoundaryRule::RightClosed => v <= t,
        }
    }
}

/// Bin layout of one feature axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Bins {
    Continuous { cuts: Vec<f64> },
    Nominal { categories: Vec<String> },
}

/// Where a value lands on one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Bin(usize),
    Missing,
    Unknown,
}

impl Bins {
    /// Number of proper bins (excluding missing/unknown)
    pub fn len(&self) -> usize {
        match self {
            Bins::Continuous { cuts } => cuts.len() + 1,
            Bins::Nominal { categories } => categories.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locate a value, checking cuts in ascending order exactly like the
    /// compiled branch chain does.
    pub fn locate(&self, value: &Value, boundary: BoundaryRule) -> Slot {
        if value.is_null() {
            return Slot::Missing;
        }
        match self {
            Bins::Continuous { cuts } => match value.as_f64() {
                Some(v) => Slot::Bin(
                    cuts.iter()
                        .position(|&t| boundary.below(v, t))
                        .unwrap_or(cuts.len()),
                ),
                None => Slot::Unknown,
            },
            Bins::Nominal { categories } => categories
                .iter()
                .position(|c| value.matches_category(c))
                .map_or(Slot::Unknown, Slot::Bin),
        }
    }

    /// Human-readable label per bin, used for shape plots
    pub fn labels(&self) -> Vec<String> {
        match self {
            Bins::Continuous { cuts } => {
                let mut labels = Vec::with_capacity(cuts.len() + 1);
                let mut lower = String::from("-inf");
                for cut in cuts {
                    labels.push(format!("[{lower}, {cut})"));
                    lower = cut.to_string();
                }
                labels.push(format!("[{lower}, inf)"));
                labels
            }
            Bins::Nominal { categories } => categories.clone(),
        }
    }

    pub fn validate(&self, context: &str) -> Result<()> {
        match self {
            Bins::Continuous { cuts } => {
                if let Some(bad) = cuts.iter().find(|c| !c.is_finite()) {
                    return Err(ModelError::MalformedBins(format!(
                        "{context}: non-finite cut point {bad}"
                    )));
                }
                if let Some(pos) = cuts.windows(2).position(|w| w[0] >= w[1]) {
                    return Err(ModelError::MalformedBins(format!(
                        "{context}: cut points not strictly increasing at index {}: {} >= {}",
                        pos + 1,
                        cuts[pos],
                        cuts[pos + 1]
                    )));
                }
            }
            Bins::Nominal { categories } => {
                if categories.is_empty() {
                    return Err(ModelError::MalformedBins(format!(
                        "{context}: nominal feature without categories"
                    )));
                }
                let mut sorted: Vec<&String> = categories.iter().collect();
                sorted.sort();
                if let Some(dup) = sorted.windows(2).find(|w| w[0] == w[1]) {
                    return Err(ModelError::MalformedBins(format!(
                        "{context}: duplicate category {:?}",
                        dup[0]
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_finite(context: &str, scores: &[f64]) -> Result<()> {
    match scores.iter().position(|s| !s.is_finite()) {
        Some(pos) => Err(ModelError::MalformedBins(format!(
            "{context}: non-finite score at index {pos}"
        ))),
        None => Ok(()),
    }
}

/// Main-effect score table of one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinTable {
    pub feature: String,
    pub bins: Bins,
    /// One score per bin
    pub scores: Vec<f64>,
    /// Score for null input
    pub missing: f64,
    /// Score for categories unseen at fit time, or non-numeric text in a
    /// continuous column
    #[serde(default)]
    pub unknown: f64,
}

impl BinTable {
    pub fn continuous(feature: impl Into<String>, cuts: Vec<f64>, scores: Vec<f64>, missing: f64) -> Self {
        Self {
            feature: feature.into(),
            bins: Bins::Continuous { cuts },
            scores,
            missing,
            unknown: 0.0,
        }
    }

    pub fn nominal(
        feature: impl Into<String>,
        categories: Vec<String>,
        scores: Vec<f64>,
        missing: f64,
        unknown: f64,
    ) -> Self {
        Self {
            feature: feature.into(),
            bins: Bins::Nominal { categories },
            scores,
            missing,
            unknown,
        }
    }

    /// Enforces `len(scores) == len(bins)` and finiteness
    pub fn validate(&self) -> Result<()> {
        let context = format!("feature '{}'", self.feature);
        self.bins.validate(&context)?;
        if self.scores.len() != self.bins.len() {
            return Err(ModelError::MalformedBins(format!(
                "{context}: expected {} scores, got {}",
                self.bins.len(),
                self.scores.len()
            )));
        }
        check_finite(&context, &self.scores)?;
        check_finite(&context, &[self.missing, self.unknown])
    }

    pub fn slot_score(&self, slot: Slot) -> f64 {
        match slot {
            Slot::Bin(i) => self.scores.get(i).copied().unwrap_or(self.unknown),
            Slot::Missing => self.missing,
            Slot::Unknown => self.unknown,
        }
    }

    pub fn score(&self, value: &Value, boundary: BoundaryRule) -> f64 {
        self.slot_score(self.bins.locate(value, boundary))
    }
}

/// Pairwise interaction grid
///
/// Each axis has `bins + 2` slots: the proper bins, then missing, then
/// unknown. `scores[a][b]` is the cell for slot `a` of the first feature and
/// slot `b` of the second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionTable {
    pub features: [String; 2],
    pub axes: [Bins; 2],
    pub scores: Vec<Vec<f64>>,
}

impl InteractionTable {
    pub fn name(&self) -> String {
        format!("{} & {}", self.features[0], self.features[1])
    }

    /// Index of a slot along `axis`
    pub fn slot_index(&self, axis: usize, slot: Slot) -> usize {
        let n = self.axes[axis].len();
        match slot {
            Slot::Bin(i) => i,
            Slot::Missing => n,
            Slot::Unknown => n + 1,
        }
    }

    pub fn cell(&self, a: Slot, b: Slot) -> f64 {
        let row = self.slot_index(0, a);
        let col = self.slot_index(1, b);
        self.scores
            .get(row)
            .and_then(|r| r.get(col))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn score(&self, a: &Value, b: &Value, boundary: BoundaryRule) -> f64 {
        self.cell(
            self.axes[0].locate(a, boundary),
            self.axes[1].locate(b, boundary),
        )
    }

    pub fn validate(&self) -> Result<()> {
        let context = format!("interaction '{}'", self.name());
        for (axis, bins) in self.axes.iter().enumerate() {
            bins.validate(&format!("{context} axis {axis}"))?;
        }
        let rows = self.axes[0].len() + 2;
        let cols = self.axes[1].len() + 2;
        if self.scores.len() != rows {
            return Err(ModelError::MalformedBins(format!(
                "{context}: expected {rows} rows, got {}",
                self.scores.len()
            )));
        }
        for (i, row) in self.scores.iter().enumerate() {
            if row.len() != cols {
                return Err(ModelError::MalformedBins(format!(
                    "{context}: row {i} has {} cells, expected {cols}",
                    row.len()
                )));
            }
            check_finite(&context, row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn age_table() -> BinTable {
        BinTable::continuous("age", vec![30.0, 60.0], vec![0.1, 0.4, 0.9], 0.0)
    }

    #[test]
    fn test_bin_lookup_boundaries() {
        let table = age_table();
        let rule = BoundaryRule::LeftClosed;

        assert_eq!(table.score(&Value::Number(-1e9), rule), 0.1);
        assert_eq!(table.score(&Value::Number(29.999), rule), 0.1);
        assert_eq!(table.score(&Value::Number(30.0), rule), 0.4); // cut opens the next bin
        assert_eq!(table.score(&Value::Number(59.999), rule), 0.4);
        assert_eq!(table.score(&Value::Number(60.0), rule), 0.9);
        assert_eq!(table.score(&Value::Number(1e9), rule), 0.9);
        assert_eq!(table.score(&Value::Null, rule), 0.0);
    }

    #[test]
    fn test_right_closed_boundaries() {
        let table = age_table();
        let rule = BoundaryRule::RightClosed;

        assert_eq!(table.score(&Value::Number(30.0), rule), 0.1);
        assert_eq!(table.score(&Value::Number(30.5), rule), 0.4);
        assert_eq!(table.score(&Value::Number(60.0), rule), 0.4);
    }

    #[test]
    fn test_text_in_continuous_column() {
        let mut table = age_table();
        table.unknown = -0.3;
        let rule = BoundaryRule::LeftClosed;

        assert_eq!(table.bins.locate(&Value::from("100"), rule), Slot::Bin(2));
        assert_eq!(table.bins.locate(&Value::from(" 45 "), rule), Slot::Bin(1));
        assert_eq!(table.bins.locate(&Value::from("unknown"), rule), Slot::Unknown);
        assert_eq!(table.score(&Value::from("unknown"), rule), -0.3);
        assert_eq!(table.score(&Value::from("1,000"), rule), -0.3);
    }

    #[test]
    fn test_nominal_lookup() {
        let table = BinTable::nominal(
            "sex",
            vec!["female".into(), "male".into()],
            vec![0.7, -0.6],
            0.05,
            -0.01,
        );
        let rule = BoundaryRule::LeftClosed;

        assert_eq!(table.score(&Value::from("female"), rule), 0.7);
        assert_eq!(table.score(&Value::from("male"), rule), -0.6);
        assert_eq!(table.score(&Value::from("other"), rule), -0.01);
        assert_eq!(table.score(&Value::Null, rule), 0.05);
    }

    #[test]
    fn test_validate_length_invariant() {
        let mut table = age_table();
        assert!(table.validate().is_ok());

        table.scores.pop();
        assert!(matches!(table.validate(), Err(ModelError::MalformedBins(_))));
    }

    #[test]
    fn test_validate_monotonic_cuts() {
        let table = BinTable::continuous("x", vec![1.0, 1.0], vec![0.0, 0.0, 0.0], 0.0);
        assert!(matches!(table.validate(), Err(ModelError::MalformedBins(_))));

        let table = BinTable::continuous("x", vec![2.0, 1.0], vec![0.0, 0.0, 0.0], 0.0);
        assert!(table.validate().is_err());

        let table = BinTable::continuous("x", vec![f64::NAN], vec![0.0, 0.0], 0.0);
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_interaction_cells() {
        // age: 2 bins (+missing, unknown), sex: 2 categories (+missing, unknown)
        let table = InteractionTable {
            features: ["age".into(), "sex".into()],
            axes: [
                Bins::Continuous { cuts: vec![40.0] },
                Bins::Nominal { categories: vec!["f".into(), "m".into()] },
            ],
            scores: vec![
                vec![1.0, 2.0, 3.0, 4.0],
                vec![5.0, 6.0, 7.0, 8.0],
                vec![9.0, 10.0, 11.0, 12.0],
                vec![0.0, 0.0, 0.0, 0.0],
            ],
        };
        let rule = BoundaryRule::LeftClosed;
        assert!(table.validate().is_ok());

        assert_eq!(table.score(&Value::Number(20.0), &Value::from("f"), rule), 1.0);
        assert_eq!(table.score(&Value::Number(50.0), &Value::from("m"), rule), 6.0);
        assert_eq!(table.score(&Value::Null, &Value::from("m"), rule), 10.0);
        assert_eq!(table.score(&Value::Number(50.0), &Value::Null, rule), 7.0);
        assert_eq!(table.score(&Value::Number(50.0), &Value::from("x"), rule), 8.0);
        assert_eq!(table.name(), "age & sex");
    }

    #[test]
    fn test_interaction_shape_checked() {
        let table = InteractionTable {
            features: ["a".into(), "b".into()],
            axes: [
                Bins::Continuous { cuts: vec![] },
                Bins::Continuous { cuts: vec![] },
            ],
            scores: vec![vec![0.0; 3], vec![0.0; 2], vec![0.0; 3]],
        };
        assert!(matches!(table.validate(), Err(ModelError::MalformedBins(_))));
    }

    #[test]
    fn test_bin_labels() {
        let bins = Bins::Continuous { cuts: vec![30.0, 60.0] };
        assert_eq!(bins.labels(), vec!["[-inf, 30)", "[30, 60)", "[60, inf)"]);
    }
}
