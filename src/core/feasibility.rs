use crate::error::{CalibrationError, Result};
use crate::types::ParameterSpec;

/// Box-shaped feasible region for a parameter vector.
///
/// Candidates outside it are never simulated; the residual evaluator gives
/// them the sentinel loss instead.
#[derive(Clone, Debug, PartialEq)]
pub struct FeasibleRegion {
    bounds: Vec<(f64, f64)>,
}

impl FeasibleRegion {
    pub fn new(bounds: Vec<(f64, f64)>) -> Result<Self> {
        for (i, &(lower, upper)) in bounds.iter().enumerate() {
            if lower.is_nan() || upper.is_nan() || lower > upper {
                return Err(CalibrationError::InvalidConfig(format!(
                    "Invalid bounds [{}, {}] for parameter {}",
                    lower, upper, i
                )));
            }
        }
        Ok(Self { bounds })
    }

    /// Every component must be `>= 0`.
    pub fn non_negative(num_params: usize) -> Self {
        Self {
            bounds: vec![(0.0, f64::INFINITY); num_params],
        }
    }

    pub fn from_specs(specs: &[ParameterSpec]) -> Result<Self> {
        Self::new(specs.iter().map(ParameterSpec::bounds).collect())
    }

    pub fn num_params(&self) -> usize {
        self.bounds.len()
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// Indices of the components that lie outside their bounds (NaN included).
    pub fn violations(&self, params: &[f64]) -> Result<Vec<usize>> {
        if params.len() != self.bounds.len() {
            return Err(CalibrationError::dimension_mismatch(
                self.bounds.len(),
                params.len(),
            ));
        }

        Ok(params
            .iter()
            .zip(self.bounds.iter())
            .enumerate()
            .filter(|&(_, (&v, &(lower, upper)))| !(v >= lower && v <= upper))
            .map(|(i, _)| i)
            .collect())
    }

    pub fn contains(&self, params: &[f64]) -> Result<bool> {
        Ok(self.violations(params)?.is_empty())
    }
}
