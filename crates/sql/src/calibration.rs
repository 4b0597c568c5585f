//! Calibration encoder
//!
//! Turns a fitted calibration curve into a branch expression applied after the
//! link output. Segment rules are the same as [`CalibrationMap::apply`].

use crate::errors::{ExportError, Result};
use crate::expr::{Cond, Expr};
use glassbox_model::{Calibration, CalibrationMap, FittedAdditiveModel, SegmentForm, Task};
use tracing::warn;

/// Encode one curve over `input`
pub fn encode_map(map: &CalibrationMap, input: Expr) -> Expr {
    let x = &map.breakpoints;
    let y = &map.values;
    let last = y.len() - 1;
    let mut branches = vec![(Cond::IsNull(input.clone()), Expr::Null)];
    match map.method {
        SegmentForm::Step => {
            for i in 1..x.len() {
                branches.push((Cond::Lt(input.clone(), Expr::Number(x[i])), Expr::Number(y[i - 1])));
            }
        }
        SegmentForm::Linear => {
            branches.push((Cond::Lt(input.clone(), Expr::Number(x[0])), Expr::Number(y[0])));
            for i in 0..last {
                let segment = Expr::Sum(vec![
                    Expr::Number(y[i]),
                    Expr::mul(
                        Expr::sub(input.clone(), Expr::Number(x[i])),
                        Expr::Number(map.slope(i)),
                    ),
                ]);
                branches.push((Cond::Lt(input.clone(), Expr::Number(x[i + 1])), segment));
            }
        }
    }
    Expr::case(branches, Expr::Number(y[last]))
}

/// Validated calibration, ready to wrap link outputs
#[derive(Debug, Clone)]
pub struct CalibrationEncoder {
    maps: Vec<CalibrationMap>,
    renormalize: bool,
    method: String,
}

impl CalibrationEncoder {
    /// `method` is the configured calibration method name
    pub fn new(model: &FittedAdditiveModel, calibration: &Calibration, method: &str) -> Result<Self> {
        calibration.validate_for(model)?;

        let maps = calibration
            .maps_for(model)
            .into_iter()
            .zip(model.output_columns())
            .map(|(m, column)| {
                m.cloned().ok_or_else(|| {
                    ExportError::MissingCalibrationCurve(format!(
                        "calibration '{method}' has no curve for output column '{column}'"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        for label in calibration.labels() {
            if !label.eq_ignore_ascii_case(method) {
                warn!(
                    "Configured calibration method '{}' differs from curve label '{}'; using the curve as supplied",
                    method, label
                );
            }
        }

        Ok(Self {
            maps,
            renormalize: model.task == Task::Multiclass,
            method: method.to_string(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Segment forms in output order, for the artifact header
    pub fn forms(&self) -> Vec<SegmentForm> {
        self.maps.iter().map(|m| m.method).collect()
    }

    /// Calibrate link outputs; multiclass outputs are renormalized to unit sum
    pub fn encode(&self, outputs: &[Expr]) -> Vec<Expr> {
        let calibrated: Vec<Expr> = self
            .maps
            .iter()
            .zip(outputs)
            .map(|(map, input)| encode_map(map, input.clone()))
            .collect();
        if !self.renormalize {
            return calibrated;
        }

        let total = Expr::Sum(calibrated.clone());
        let uniform = Expr::Number(1.0 / calibrated.len() as f64);
        calibrated
            .into_iter()
            .map(|c| {
                Expr::case(
                    vec![(
                        Cond::Gt(total.clone(), Expr::Number(0.0)),
                        Expr::div(c, total.clone()),
                    )],
                    uniform.clone(),
                )
            })
            .collect()
    }
}
