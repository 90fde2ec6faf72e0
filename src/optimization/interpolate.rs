//! Alignment of a simulated curve onto the reference time base.

use crate::error::{CalibrationError, Result};
use crate::types::TimeSeries;

/// Piecewise-linear interpolation of `series` at `t`, holding the first and
/// last values outside the sampled range.
pub fn interpolate_linear(series: &TimeSeries, t: f64) -> f64 {
    let times = series.times();
    let values = series.values();
    let last = times.len() - 1;

    if t <= times[0] {
        return values[0];
    }
    if t >= times[last] {
        return values[last];
    }

    // First index with times[hi] > t; t lies strictly inside the range here
    let hi = times.partition_point(|&x| x <= t);
    let lo = hi - 1;
    let w = (t - times[lo]) / (times[hi] - times[lo]);
    values[lo] + w * (values[hi] - values[lo])
}

/// Fraction of the reference span covered by the simulated span.
///
/// A single-sample reference counts as fully covered when its time lies in
/// the simulated range and uncovered otherwise.
pub fn overlap_fraction(simulated: &TimeSeries, reference: &TimeSeries) -> f64 {
    let (s0, s1) = simulated.span();
    let (r0, r1) = reference.span();
    let ref_span = r1 - r0;
    if ref_span <= 0.0 {
        return if r0 >= s0 && r0 <= s1 { 1.0 } else { 0.0 };
    }
    let covered = (s1.min(r1) - s0.max(r0)).max(0.0);
    covered / ref_span
}

/// Resample `simulated` at every reference time.
///
/// Fails when the simulated range covers less than `min_overlap` of the
/// reference range; within that allowance the edges are extrapolated flatly.
/// The returned error carries `params` so the failing run can be reproduced.
pub fn align(
    simulated: &TimeSeries,
    reference: &TimeSeries,
    min_overlap: f64,
    params: &[f64],
) -> Result<Vec<f64>> {
    let overlap = overlap_fraction(simulated, reference);
    if overlap < min_overlap {
        let (sim_start, sim_end) = simulated.span();
        let (ref_start, ref_end) = reference.span();
        return Err(CalibrationError::Alignment {
            params: params.to_vec(),
            sim_start,
            sim_end,
            ref_start,
            ref_end,
            overlap,
            required: min_overlap,
        });
    }

    Ok(reference
        .times()
        .iter()
        .map(|&t| interpolate_linear(simulated, t))
        .collect())
}

/// Mean of `|a_i - b_i|`; both slices must have the same non-zero length.
pub fn mean_absolute_error(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let total: f64 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum();
    total / a.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn series(times: &[f64], values: &[f64]) -> TimeSeries {
        TimeSeries::new(times.to_vec(), values.to_vec()).unwrap()
    }

    #[test]
    fn test_interpolation_hits_samples_and_midpoints() {
        let s = series(&[0.0, 1.0, 3.0], &[0.0, 10.0, 30.0]);
        assert_eq!(interpolate_linear(&s, 1.0), 10.0);
        assert_eq!(interpolate_linear(&s, 3.0), 30.0);
        assert_relative_eq!(interpolate_linear(&s, 0.5), 5.0);
        assert_relative_eq!(interpolate_linear(&s, 2.0), 20.0);
    }

    #[test]
    fn test_flat_extrapolation() {
        let s = series(&[1.0, 2.0], &[4.0, 8.0]);
        assert_eq!(interpolate_linear(&s, 0.0), 4.0);
        assert_eq!(interpolate_linear(&s, 10.0), 8.0);
    }

    #[test]
    fn test_single_sample_series() {
        let s = series(&[1.0], &[4.0]);
        assert_eq!(interpolate_linear(&s, 0.0), 4.0);
        assert_eq!(interpolate_linear(&s, 1.0), 4.0);
        assert_eq!(interpolate_linear(&s, 2.0), 4.0);
    }

    #[test]
    fn test_identical_grids_need_no_interpolation() {
        let times = [0.0, 0.3, 0.7, 1.9];
        let sim = series(&times, &[1.0, 2.0, 3.0, 4.0]);
        let reference = series(&times, &[1.5, 1.0, 3.0, 6.0]);
        let aligned = align(&sim, &reference, 1.0, &[]).unwrap();
        assert_eq!(aligned, sim.values());
        assert_relative_eq!(
            mean_absolute_error(&aligned, reference.values()),
            (0.5 + 1.0 + 0.0 + 2.0) / 4.0
        );
    }

    #[test]
    fn test_slight_edge_mismatch_is_tolerated() {
        let sim = series(&[0.01, 5.0, 9.95], &[1.0, 1.0, 1.0]);
        let reference = series(&[0.0, 5.0, 10.0], &[1.0, 1.0, 1.0]);
        let aligned = align(&sim, &reference, 0.9, &[1.0]).unwrap();
        assert_eq!(aligned, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_insufficient_overlap_fails_with_params() {
        let sim = series(&[0.0, 1.0], &[1.0, 1.0]);
        let reference = series(&[0.0, 10.0], &[1.0, 1.0]);
        let err = align(&sim, &reference, 0.9, &[3.0, 4.0]).unwrap_err();
        match err {
            CalibrationError::Alignment {
                params, overlap, ..
            } => {
                assert_eq!(params, vec![3.0, 4.0]);
                assert_relative_eq!(overlap, 0.1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_disjoint_ranges_have_zero_overlap() {
        let sim = series(&[20.0, 30.0], &[1.0, 1.0]);
        let reference = series(&[0.0, 10.0], &[1.0, 1.0]);
        assert_eq!(overlap_fraction(&sim, &reference), 0.0);

        let point = series(&[25.0], &[1.0]);
        assert_eq!(overlap_fraction(&sim, &point), 1.0);
        assert_eq!(overlap_fraction(&point, &reference), 0.0);
    }
}
