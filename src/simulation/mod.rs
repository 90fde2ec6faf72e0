pub mod desorption;
pub mod reference;
pub mod stepsize;

pub use desorption::{DesorptionConfig, DesorptionSimulator};
pub use reference::generate_reference;
pub use stepsize::{AdaptiveStepSize, CeilingStage, StepSizeConfig};

use crate::error::SimulationError;
use crate::types::TimeSeries;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Black-box forward model: parameters in, sampled output channels out.
///
/// Implementations are built once from their configuration and must not keep
/// state between calls that changes the result for the same parameters.
pub trait ForwardSimulator {
    /// Ordered parameter names, documenting the expected vector layout
    fn param_names(&self) -> Vec<String>;

    fn num_params(&self) -> usize {
        self.param_names().len()
    }

    /// Run one transient solve (THIS IS THE EXPENSIVE CALL)
    fn simulate(&self, params: &[f64]) -> Result<SimulationOutput, SimulationError>;
}

impl<S: ForwardSimulator + ?Sized> ForwardSimulator for &S {
    fn param_names(&self) -> Vec<String> {
        (**self).param_names()
    }

    fn simulate(&self, params: &[f64]) -> Result<SimulationOutput, SimulationError> {
        (**self).simulate(params)
    }
}

/// Named channels sampled on one shared, simulator-chosen time grid.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulationOutput {
    pub times: Vec<f64>,
    pub channels: IndexMap<String, Vec<f64>>,
}

impl SimulationOutput {
    pub fn new(times: Vec<f64>) -> Self {
        Self {
            times,
            channels: IndexMap::new(),
        }
    }

    pub fn with_channel(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.channels.insert(name.into(), values);
        self
    }

    pub fn channel(&self, name: &str) -> Result<&[f64], SimulationError> {
        self.channels
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| SimulationError::MissingChannel(name.to_string()))
    }
}

/// Which channels make up the calibrated quantity; they are summed pointwise.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observable {
    pub channels: Vec<String>,
}

impl Default for Observable {
    fn default() -> Self {
        Self {
            channels: vec![
                desorption::FLUX_LEFT.to_string(),
                desorption::FLUX_RIGHT.to_string(),
            ],
        }
    }
}

impl Observable {
    pub fn single(channel: impl Into<String>) -> Self {
        Self {
            channels: vec![channel.into()],
        }
    }

    pub fn sum_of<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn extract(&self, output: &SimulationOutput) -> Result<TimeSeries, SimulationError> {
        if self.channels.is_empty() {
            return Err(SimulationError::InvalidOutput(
                "observable names no channels".into(),
            ));
        }

        let n = output.times.len();
        let mut combined = vec![0.0; n];
        for name in &self.channels {
            let values = output.channel(name)?;
            if values.len() != n {
                return Err(SimulationError::InvalidOutput(format!(
                    "channel '{}' has {} samples for {} times",
                    name,
                    values.len(),
                    n
                )));
            }
            for (acc, v) in combined.iter_mut().zip(values) {
                *acc += v;
            }
        }

        TimeSeries::new(output.times.clone(), combined)
            .map_err(|e| SimulationError::InvalidOutput(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_channel_output() -> SimulationOutput {
        SimulationOutput::new(vec![0.0, 1.0, 2.0])
            .with_channel("flux_left", vec![1.0, 2.0, 3.0])
            .with_channel("flux_right", vec![0.5, 0.5, 0.5])
            .with_channel("temperature", vec![300.0, 301.0, 302.0])
    }

    #[test]
    fn test_default_observable_sums_surface_fluxes() {
        let ts = Observable::default().extract(&two_channel_output()).unwrap();
        assert_eq!(ts.values(), &[1.5, 2.5, 3.5]);
        assert_eq!(ts.times(), &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_single_channel_observable() {
        let ts = Observable::single("temperature")
            .extract(&two_channel_output())
            .unwrap();
        assert_eq!(ts.values(), &[300.0, 301.0, 302.0]);
    }

    #[test]
    fn test_missing_channel() {
        let err = Observable::single("flux_bulk")
            .extract(&two_channel_output())
            .unwrap_err();
        assert_eq!(err, SimulationError::MissingChannel("flux_bulk".into()));
    }

    #[test]
    fn test_length_mismatch_and_bad_grid() {
        let output = SimulationOutput::new(vec![0.0, 1.0]).with_channel("a", vec![1.0]);
        assert!(matches!(
            Observable::single("a").extract(&output),
            Err(SimulationError::InvalidOutput(_))
        ));

        let output = SimulationOutput::new(vec![1.0, 0.0]).with_channel("a", vec![1.0, 2.0]);
        assert!(matches!(
            Observable::single("a").extract(&output),
            Err(SimulationError::InvalidOutput(_))
        ));
    }
}
