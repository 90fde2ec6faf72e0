//! Adaptive time-step control for transient solves.
//!
//! The step grows by `change_ratio` after every step whose nonlinear solve
//! converged quickly, shrinks by the same ratio after a slow or failed one,
//! and is capped by a ceiling that may change with simulated time. A failed
//! step that would need a step below `min` is a hard failure.

use crate::error::{CalibrationError, Result, SimulationError};
use serde::{Deserialize, Serialize};

/// Step ceiling that applies from `from_time` onwards. `max: None` leaves the
/// step unconstrained.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CeilingStage {
    pub from_time: f64,
    pub max: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSizeConfig {
    /// First attempted step (s)
    pub initial: f64,
    /// Growth/shrink factor, > 1
    pub change_ratio: f64,
    /// Smallest admissible step (s)
    pub min: f64,
    /// Time-dependent ceiling, sorted by `from_time`
    pub ceiling: Vec<CeilingStage>,
    /// Solves needing fewer iterations than this grow the step
    pub fast_iterations: u32,
}

impl Default for StepSizeConfig {
    fn default() -> Self {
        Self {
            initial: 1e-2,
            change_ratio: 1.1,
            min: 1e-6,
            ceiling: vec![
                CeilingStage {
                    from_time: 0.0,
                    max: None,
                },
                CeilingStage {
                    from_time: 10.0,
                    max: Some(0.25),
                },
            ],
            fast_iterations: 5,
        }
    }
}

impl StepSizeConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.initial.is_finite() && self.initial > 0.0) {
            return Err(CalibrationError::InvalidConfig(format!(
                "initial step must be positive, got {}",
                self.initial
            )));
        }
        if !(self.change_ratio.is_finite() && self.change_ratio > 1.0) {
            return Err(CalibrationError::InvalidConfig(format!(
                "step change ratio must exceed 1, got {}",
                self.change_ratio
            )));
        }
        if !(self.min > 0.0 && self.min <= self.initial) {
            return Err(CalibrationError::InvalidConfig(format!(
                "minimum step {} must be positive and not above the initial step {}",
                self.min, self.initial
            )));
        }
        if self.ceiling.windows(2).any(|w| w[1].from_time < w[0].from_time) {
            return Err(CalibrationError::InvalidConfig(
                "step ceiling stages must be sorted by from_time".into(),
            ));
        }
        if let Some(stage) = self
            .ceiling
            .iter()
            .find(|s| s.max.is_some_and(|m| !(m >= self.min)))
        {
            return Err(CalibrationError::InvalidConfig(format!(
                "step ceiling at t = {} is below the minimum step",
                stage.from_time
            )));
        }
        Ok(())
    }

    /// Ceiling in force at time `t`, if any.
    pub fn ceiling_at(&self, t: f64) -> Option<f64> {
        self.ceiling
            .iter()
            .rev()
            .find(|s| s.from_time <= t)
            .and_then(|s| s.max)
    }
}

/// Running step-size state for one transient solve.
#[derive(Clone, Debug)]
pub struct AdaptiveStepSize {
    config: StepSizeConfig,
    dt: f64,
}

impl AdaptiveStepSize {
    pub fn new(config: StepSizeConfig) -> Self {
        let dt = config.initial;
        Self { config, dt }
    }

    pub fn current(&self) -> f64 {
        self.dt
    }

    /// Step to attempt from `t`, honouring the ceiling and not overshooting `t_end`.
    pub fn next_step(&mut self, t: f64, t_end: f64) -> f64 {
        if let Some(max) = self.config.ceiling_at(t) {
            self.dt = self.dt.min(max);
        }
        self.dt.min(t_end - t)
    }

    /// Update after an accepted step that took `iterations` nonlinear iterations.
    pub fn on_converged(&mut self, iterations: u32) {
        if iterations < self.config.fast_iterations {
            self.dt *= self.config.change_ratio;
        } else {
            self.dt = (self.dt / self.config.change_ratio).max(self.config.min);
        }
    }

    /// Cut the step back after a failed attempt at time `t`.
    pub fn on_failed(&mut self, t: f64) -> std::result::Result<(), SimulationError> {
        let reduced = self.dt / self.config.change_ratio;
        if reduced < self.config.min {
            return Err(SimulationError::StepSizeTooSmall {
                time: t,
                dt: reduced,
                min: self.config.min,
            });
        }
        self.dt = reduced;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config_is_valid() {
        assert!(StepSizeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let mut cfg = StepSizeConfig::default();
        cfg.change_ratio = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = StepSizeConfig::default();
        cfg.min = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = StepSizeConfig::default();
        cfg.ceiling.reverse();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_ceiling_depends_on_time() {
        let cfg = StepSizeConfig::default();
        assert_eq!(cfg.ceiling_at(0.0), None);
        assert_eq!(cfg.ceiling_at(9.99), None);
        assert_eq!(cfg.ceiling_at(10.0), Some(0.25));
        assert_eq!(cfg.ceiling_at(100.0), Some(0.25));
    }

    #[test]
    fn test_growth_and_shrink() {
        let mut step = AdaptiveStepSize::new(StepSizeConfig::default());
        step.on_converged(2);
        assert_relative_eq!(step.current(), 1.1e-2, max_relative = 1e-12);
        step.on_converged(7);
        assert_relative_eq!(step.current(), 1e-2, max_relative = 1e-12);
    }

    #[test]
    fn test_next_step_applies_ceiling_and_end_time() {
        let mut cfg = StepSizeConfig::default();
        cfg.initial = 2.0;
        let mut step = AdaptiveStepSize::new(cfg);

        assert_eq!(step.next_step(0.0, 100.0), 2.0);
        assert_eq!(step.next_step(20.0, 100.0), 0.25);
        // Ceiling is sticky: growth restarts from the capped value
        assert_eq!(step.current(), 0.25);
        assert_relative_eq!(step.next_step(99.9, 100.0), 0.1, max_relative = 1e-9);
    }

    #[test]
    fn test_failure_below_minimum() {
        let mut cfg = StepSizeConfig::default();
        cfg.initial = 1e-6;
        cfg.min = 1e-6;
        let mut step = AdaptiveStepSize::new(cfg);
        let err = step.on_failed(5.0).unwrap_err();
        assert!(matches!(err, SimulationError::StepSizeTooSmall { time, .. } if time == 5.0));
    }
}
