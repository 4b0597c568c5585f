//! Post-hoc calibration curves
//!
//! Curves are fitted elsewhere; this module only defines how an already fitted
//! curve maps a pre-calibration value (post-link probability, or raw value for
//! regression) to its calibrated output. The SQL encoder mirrors these rules
//! branch for branch.

use crate::errors::{ModelError, Result};
use crate::model::{FittedAdditiveModel, Task};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Functional form between breakpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentForm {
    /// Constant `y_i` on `[x_i, x_{i+1})`
    Step,
    /// Two-point interpolation on `[x_i, x_{i+1})`, clamped outside the curve
    Linear,
}

/// One fitted monotone calibration curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMap {
    pub method: SegmentForm,
    /// Name of the fitting method that produced the curve, e.g. `isotonic`
    #[serde(default)]
    pub label: Option<String>,
    pub breakpoints: Vec<f64>,
    pub values: Vec<f64>,
}

impl CalibrationMap {
    pub fn step(breakpoints: Vec<f64>, values: Vec<f64>) -> Self {
        Self {
            method: SegmentForm::Step,
            label: None,
            breakpoints,
            values,
        }
    }

    pub fn linear(breakpoints: Vec<f64>, values: Vec<f64>) -> Self {
        Self {
            method: SegmentForm::Linear,
            label: None,
            breakpoints,
            values,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.breakpoints.is_empty() {
            return Err(ModelError::MalformedBins(
                "calibration curve has no breakpoints".to_string(),
            ));
        }
        if self.breakpoints.len() != self.values.len() {
            return Err(ModelError::MalformedBins(format!(
                "calibration curve has {} breakpoints but {} values",
                self.breakpoints.len(),
                self.values.len()
            )));
        }
        if self
            .breakpoints
            .iter()
            .chain(self.values.iter())
            .any(|v| !v.is_finite())
        {
            return Err(ModelError::MalformedBins(
                "calibration curve contains non-finite numbers".to_string(),
            ));
        }
        if let Some(pos) = self.breakpoints.windows(2).position(|w| w[0] >= w[1]) {
            return Err(ModelError::MalformedBins(format!(
                "calibration breakpoints not strictly increasing at index {}",
                pos + 1
            )));
        }
        if let Some(pos) = self.values.windows(2).position(|w| w[0] > w[1]) {
            return Err(ModelError::MalformedBins(format!(
                "calibration curve not monotone at index {}",
                pos + 1
            )));
        }
        Ok(())
    }

    /// Slope of the linear segment starting at breakpoint `i`
    pub fn slope(&self, i: usize) -> f64 {
        (self.values[i + 1] - self.values[i]) / (self.breakpoints[i + 1] - self.breakpoints[i])
    }

    /// Apply the curve to one value
    pub fn apply(&self, v: f64) -> f64 {
        let x = &self.breakpoints;
        let y = &self.values;
        let last = y.len() - 1;
        match self.method {
            SegmentForm::Step => {
                for i in 1..x.len() {
                    if v < x[i] {
                        return y[i - 1];
                    }
                }
                y[last]
            }
            SegmentForm::Linear => {
                if v < x[0] {
                    return y[0];
                }
                for i in 0..last {
                    if v < x[i + 1] {
                        return y[i] + (v - x[i]) * self.slope(i);
                    }
                }
                y[last]
            }
        }
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let map: CalibrationMap = serde_json::from_str(&json)?;
        map.validate()?;
        Ok(map)
    }
}

/// Calibration for a whole model: one shared curve, or one per class label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Calibration {
    Shared(CalibrationMap),
    PerClass(BTreeMap<String, CalibrationMap>),
}

impl Calibration {
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Validate every supplied curve against the model. Classes without a
    /// curve are not an error here; [`Calibration::maps_for`] reports them as
    /// gaps so the caller can decide.
    pub fn validate_for(&self, model: &FittedAdditiveModel) -> Result<()> {
        match self {
            Calibration::Shared(map) => map.validate(),
            Calibration::PerClass(maps) => {
                if model.task != Task::Multiclass {
                    return Err(ModelError::MalformedBins(format!(
                        "per-class calibration supplied for a {} model",
                        model.task
                    )));
                }
                if let Some(extra) = maps.keys().find(|k| !model.classes.contains(k)) {
                    return Err(ModelError::MalformedBins(format!(
                        "calibration curve for unknown class '{extra}'"
                    )));
                }
                maps.values().try_for_each(CalibrationMap::validate)
            }
        }
    }

    /// Curves in output-column order
    pub fn maps_for<'a>(&'a self, model: &FittedAdditiveModel) -> Vec<Option<&'a CalibrationMap>> {
        let outputs = model.output_columns().len();
        match self {
            Calibration::Shared(map) => vec![Some(map); outputs],
            Calibration::PerClass(maps) => model.classes.iter().map(|c| maps.get(c)).collect(),
        }
    }

    /// Fitting-method labels carried by the curves
    pub fn labels(&self) -> Vec<&str> {
        match self {
            Calibration::Shared(map) => map.label.as_deref().into_iter().collect(),
            Calibration::PerClass(maps) => maps.values().filter_map(|m| m.label.as_deref()).collect(),
        }
    }

    /// Calibrate link outputs; multiclass outputs are renormalized
    pub fn apply(&self, model: &FittedAdditiveModel, outputs: &[f64]) -> Vec<f64> {
        let calibrated: Vec<f64> = self
            .maps_for(model)
            .into_iter()
            .zip(outputs)
            .map(|(map, &v)| map.map_or(v, |m| m.apply(v)))
            .collect();
        if model.task == Task::Multiclass {
            renormalize(&calibrated)
        } else {
            calibrated
        }
    }
}

/// Scale to unit sum; a zero total falls back to the uniform distribution
pub fn renormalize(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter().map(|v| v / total).collect()
    } else {
        vec![1.0 / values.len() as f64; values.len()]
    }
}
