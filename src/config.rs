//! JSON run configuration.
//!
//! Every section has defaults, so a file only needs the values it changes:
//!
//! ```json
//! {
//!   "reference": { "noise_fraction": 0.02, "seed": 7 },
//!   "optimizer": { "max_evaluations": 300 }
//! }
//! ```

use crate::core::FeasibleRegion;
use crate::error::{CalibrationError, Result};
use crate::optimization::problem::{DEFAULT_MIN_OVERLAP, check_start};
use crate::simulation::desorption::TrapParameters;
use crate::simulation::{DesorptionConfig, Observable};
use crate::types::{ConvergenceCriteria, ParameterSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Synthetic reference settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub true_params: Vec<f64>,
    /// Noise standard deviation as a fraction of the peak observable
    pub noise_fraction: f64,
    pub seed: u64,
    pub path: PathBuf,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            true_params: vec![1e-2, 1.0],
            noise_fraction: 0.0,
            seed: 0,
            path: PathBuf::from("reference.csv"),
        }
    }
}

/// Simplex driver settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub criteria: ConvergenceCriteria,
    /// Hard cap on residual evaluations
    pub max_evaluations: usize,
    pub max_iterations: Option<u32>,
    /// Share of the reference span a simulated curve must cover
    pub min_overlap: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            // Loss is in m^-2 s^-1, tolerance well below a percent of typical peaks
            criteria: ConvergenceCriteria::new(1e-4, 1e16),
            max_evaluations: 400,
            max_iterations: None,
            min_overlap: DEFAULT_MIN_OVERLAP,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub simulator: DesorptionConfig,
    pub parameters: Vec<ParameterSpec>,
    pub observable: Observable,
    pub reference: ReferenceConfig,
    pub optimizer: OptimizerConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            simulator: DesorptionConfig::default(),
            parameters: vec![
                ParameterSpec::new("trap_concentration", "lattice fraction", 2e-2),
                ParameterSpec::new("detrapping_energy", "eV", 1.1),
            ],
            observable: Observable::default(),
            reference: ReferenceConfig::default(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl CalibrationConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn initial_guess(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.initial).collect()
    }

    pub fn feasible_region(&self) -> Result<FeasibleRegion> {
        FeasibleRegion::from_specs(&self.parameters)
    }

    pub fn validate(&self) -> Result<()> {
        self.simulator.validate()?;
        self.optimizer.criteria.validate()?;

        let n = self.parameters.len();
        if n == 0 {
            return Err(CalibrationError::InvalidConfig(
                "at least one parameter is required".into(),
            ));
        }
        if self.reference.true_params.len() != n {
            return Err(CalibrationError::dimension_mismatch(
                n,
                self.reference.true_params.len(),
            ));
        }
        if let Some(p) = self.parameters.iter().find(|p| !p.initial.is_finite()) {
            return Err(CalibrationError::InvalidConfig(format!(
                "initial value of '{}' must be finite",
                p.name
            )));
        }
        let region = self.feasible_region()?;
        check_start(&region, &self.initial_guess())?;

        // Negative concentrations are rejected by the simulator itself, so
        // they must stay outside the region and score as infeasible
        if let Some(p) = self
            .parameters
            .iter()
            .find(|p| p.name == TrapParameters::NAMES[0] && p.lower < 0.0)
        {
            return Err(CalibrationError::InvalidConfig(format!(
                "lower bound of '{}' must be non-negative, got {}",
                p.name, p.lower
            )));
        }

        if !(self.reference.noise_fraction.is_finite() && self.reference.noise_fraction >= 0.0) {
            return Err(CalibrationError::InvalidConfig(format!(
                "noise_fraction must be finite and non-negative, got {}",
                self.reference.noise_fraction
            )));
        }
        if self.optimizer.max_evaluations == 0 {
            return Err(CalibrationError::InvalidConfig(
                "max_evaluations must be at least 1".into(),
            ));
        }
        if !(self.optimizer.min_overlap > 0.0 && self.optimizer.min_overlap <= 1.0) {
            return Err(CalibrationError::InvalidConfig(format!(
                "min_overlap must lie in (0, 1], got {}",
                self.optimizer.min_overlap
            )));
        }
        if self.observable.channels.is_empty() {
            return Err(CalibrationError::InvalidConfig(
                "observable must name at least one channel".into(),
            ));
        }
        Ok(())
    }
}
