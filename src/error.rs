//! Error types for the calibration engine.
//!
//! Infeasible candidates are not errors: the residual evaluator maps them to a
//! sentinel loss so the simplex search can keep moving. Everything here aborts
//! a run.

use thiserror::Error;

/// Failures raised by a forward simulator adapter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// The adapter rejected the parameter vector before solving.
    #[error("Invalid simulator parameters: {0}")]
    InvalidParameters(String),

    /// Adaptive time stepping collapsed below its floor.
    #[error("Step size {dt:.3e} s fell below minimum {min:.3e} s at t = {time:.6e} s")]
    StepSizeTooSmall {
        /// Simulated time at which the step was attempted
        time: f64,
        /// Step size that would have been required
        dt: f64,
        /// Configured minimum step size
        min: f64,
    },

    /// The discrete state stopped being finite.
    #[error("Non-finite solution at t = {time:.6e} s")]
    NonFinite {
        /// Simulated time of the offending step
        time: f64,
    },

    /// An observable referenced a channel the simulator did not produce.
    #[error("Simulator output has no channel '{0}'")]
    MissingChannel(String),

    /// The simulator produced an output that is not a valid time series.
    #[error("Invalid simulator output: {0}")]
    InvalidOutput(String),
}

/// Errors surfaced by the calibration engine.
#[derive(Error, Debug)]
pub enum CalibrationError {
    /// The forward simulator failed for a feasible candidate.
    #[error("Simulation failed for parameters {params:?}: {source}")]
    Simulation {
        /// Candidate that triggered the failure
        params: Vec<f64>,
        /// Underlying adapter failure
        #[source]
        source: SimulationError,
    },

    /// Simulated and reference time ranges do not overlap enough to compare.
    #[error(
        "Cannot align simulated range [{sim_start:.6e}, {sim_end:.6e}] with reference range \
         [{ref_start:.6e}, {ref_end:.6e}] for parameters {params:?}: overlap {overlap:.3} < {required:.3}"
    )]
    Alignment {
        /// Candidate whose simulated curve could not be aligned
        params: Vec<f64>,
        sim_start: f64,
        sim_end: f64,
        ref_start: f64,
        ref_end: f64,
        /// Covered fraction of the reference span
        overlap: f64,
        /// Required fraction
        required: f64,
    },

    /// A time series violated its invariants.
    #[error("Invalid time series: {0}")]
    InvalidTimeSeries(String),

    /// A parameter vector has the wrong number of components.
    #[error("Dimension mismatch: expected {expected} parameters, got {actual}")]
    DimensionMismatch {
        /// Expected length
        expected: usize,
        /// Provided length
        actual: usize,
    },

    /// Configuration rejected during validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CalibrationError {
    /// Wrap an adapter failure with the candidate that caused it.
    pub fn simulation(params: &[f64], source: SimulationError) -> Self {
        Self::Simulation {
            params: params.to_vec(),
            source,
        }
    }

    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Parameter vector attached to the failure, if any.
    pub fn offending_params(&self) -> Option<&[f64]> {
        match self {
            Self::Simulation { params, .. } | Self::Alignment { params, .. } => Some(params),
            _ => None,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CalibrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulation_error_carries_params() {
        let err = CalibrationError::simulation(
            &[1e-2, 1.0],
            SimulationError::StepSizeTooSmall {
                time: 3.0,
                dt: 1e-9,
                min: 1e-6,
            },
        );
        assert_eq!(err.offending_params(), Some(&[1e-2, 1.0][..]));
        let msg = err.to_string();
        assert!(msg.contains("Simulation failed"));
        assert!(msg.contains("minimum"));
    }

    #[test]
    fn test_config_error_has_no_params() {
        let err = CalibrationError::InvalidConfig("xatol must be positive".into());
        assert!(err.offending_params().is_none());
        assert!(err.to_string().contains("xatol"));
    }
}
