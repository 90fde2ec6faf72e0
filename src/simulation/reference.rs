//! Synthetic reference curves: one simulator run at known parameters plus
//! seeded Gaussian noise.

use super::{ForwardSimulator, Observable};
use crate::error::{CalibrationError, Result};
use crate::types::{ReferenceDataset, TimeSeries};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::info;

/// Simulate at `true_params`, extract the observable and add zero-mean noise
/// with standard deviation `noise_fraction * max|value|`.
///
/// Adapter failures are returned unchanged (wrapped with the parameters); no
/// retry happens here.
pub fn generate_reference<S: ForwardSimulator + ?Sized>(
    simulator: &S,
    observable: &Observable,
    true_params: &[f64],
    noise_fraction: f64,
    seed: u64,
) -> Result<ReferenceDataset> {
    if !(noise_fraction.is_finite() && noise_fraction >= 0.0) {
        return Err(CalibrationError::InvalidConfig(format!(
            "noise fraction must be finite and non-negative, got {}",
            noise_fraction
        )));
    }
    let expected = simulator.num_params();
    if true_params.len() != expected {
        return Err(CalibrationError::dimension_mismatch(
            expected,
            true_params.len(),
        ));
    }

    let output = simulator
        .simulate(true_params)
        .map_err(|e| CalibrationError::simulation(true_params, e))?;
    let clean = observable
        .extract(&output)
        .map_err(|e| CalibrationError::simulation(true_params, e))?;

    let sigma = noise_fraction * clean.max_abs();
    let series = if sigma > 0.0 {
        let noise = Normal::new(0.0, sigma).map_err(|e| {
            CalibrationError::InvalidConfig(format!("noise distribution: {}", e))
        })?;
        let mut rng = StdRng::seed_from_u64(seed);
        let (times, values) = clean.into_parts();
        let noisy = values.into_iter().map(|v| v + noise.sample(&mut rng)).collect();
        TimeSeries::new(times, noisy)?
    } else {
        clean
    };

    info!(
        samples = series.len(),
        noise_sigma = sigma,
        seed,
        "Generated reference for {:?}",
        true_params
    );

    Ok(ReferenceDataset::new(series))
}
