use super::callback::{Trajectory, TrajectoryRecorder};
use super::interpolate::{align, mean_absolute_error};
use super::solvers::Problem;
use crate::core::FeasibleRegion;
use crate::error::{CalibrationError, Result};
use crate::simulation::{ForwardSimulator, Observable};
use crate::types::{INFEASIBLE_LOSS, ParameterVector, ReferenceDataset};
use std::cell::{Cell, RefCell};
use tracing::debug;

/// Default share of the reference time span the simulated curve must cover
pub const DEFAULT_MIN_OVERLAP: f64 = 0.9;

/// Residual evaluator: runs the simulator for a candidate and scores it
/// against the reference curve by mean absolute error.
pub struct CalibrationProblem<S: ForwardSimulator> {
    simulator: S,
    observable: Observable,
    reference: ReferenceDataset,
    region: FeasibleRegion,
    initial: ParameterVector,
    param_names: Vec<String>,
    min_overlap: f64,

    recorder: RefCell<TrajectoryRecorder>,
    simulator_calls: Cell<usize>,
}

impl<S: ForwardSimulator> CalibrationProblem<S> {
    /// Problem over the non-negative orthant with the default overlap requirement.
    pub fn new(
        simulator: S,
        observable: Observable,
        reference: ReferenceDataset,
        initial: ParameterVector,
    ) -> Result<Self> {
        let n = simulator.num_params();
        if initial.len() != n {
            return Err(CalibrationError::dimension_mismatch(n, initial.len()));
        }
        let param_names = simulator.param_names();
        let region = FeasibleRegion::non_negative(n);
        check_start(&region, &initial)?;

        Ok(Self {
            simulator,
            observable,
            reference,
            region,
            initial,
            param_names,
            min_overlap: DEFAULT_MIN_OVERLAP,
            recorder: RefCell::new(TrajectoryRecorder::new()),
            simulator_calls: Cell::new(0),
        })
    }

    pub fn with_region(mut self, region: FeasibleRegion) -> Result<Self> {
        if region.num_params() != self.initial.len() {
            return Err(CalibrationError::dimension_mismatch(
                self.initial.len(),
                region.num_params(),
            ));
        }
        check_start(&region, &self.initial)?;
        self.region = region;
        Ok(self)
    }

    pub fn with_min_overlap(mut self, min_overlap: f64) -> Result<Self> {
        if !(min_overlap > 0.0 && min_overlap <= 1.0) {
            return Err(CalibrationError::InvalidConfig(format!(
                "min_overlap must lie in (0, 1], got {}",
                min_overlap
            )));
        }
        self.min_overlap = min_overlap;
        Ok(self)
    }

    pub fn reference(&self) -> &ReferenceDataset {
        &self.reference
    }

    pub fn simulator(&self) -> &S {
        &self.simulator
    }

    /// Forward simulator invocations so far (infeasible candidates excluded)
    pub fn simulator_calls(&self) -> usize {
        self.simulator_calls.get()
    }

    /// Evaluations recorded so far
    pub fn evaluations(&self) -> usize {
        self.recorder.borrow().len()
    }

    /// Score `params`; infeasible candidates get [`INFEASIBLE_LOSS`] without a
    /// simulator run. Every call, infeasible or not, is recorded.
    pub fn residual(&self, params: &[f64]) -> Result<f64> {
        if !self.region.contains(params)? {
            let iteration = self.recorder.borrow_mut().record(params, INFEASIBLE_LOSS, false);
            debug!(iteration, "Eval {:4}: {:?} infeasible", iteration, params);
            return Ok(INFEASIBLE_LOSS);
        }

        self.simulator_calls.set(self.simulator_calls.get() + 1);
        let output = self
            .simulator
            .simulate(params)
            .map_err(|e| CalibrationError::simulation(params, e))?;
        let simulated = self
            .observable
            .extract(&output)
            .map_err(|e| CalibrationError::simulation(params, e))?;

        let reference = self.reference.series();
        let aligned = align(&simulated, reference, self.min_overlap, params)?;
        let loss = mean_absolute_error(&aligned, reference.values());

        let iteration = self.recorder.borrow_mut().record(params, loss, true);
        debug!(
            iteration,
            loss,
            samples = simulated.len(),
            "Eval {:4}: {:?}",
            iteration,
            params
        );
        Ok(loss)
    }

    /// End the run and hand out the recorded trajectory.
    pub fn into_trajectory(self) -> Trajectory {
        self.recorder.into_inner().finish(self.param_names)
    }
}

/// A start outside the region gives a simplex of sentinel losses only, which
/// would pass the convergence test without a single simulator run.
pub(crate) fn check_start(region: &FeasibleRegion, initial: &[f64]) -> Result<()> {
    let outside = region.violations(initial)?;
    if outside.is_empty() {
        return Ok(());
    }
    Err(CalibrationError::InvalidConfig(format!(
        "initial guess {:?} lies outside the feasible region (components {:?})",
        initial, outside
    )))
}

impl<S: ForwardSimulator> Problem for CalibrationProblem<S> {
    fn cost(&self, params: &[f64]) -> Result<f64> {
        self.residual(params)
    }

    fn num_params(&self) -> usize {
        self.initial.len()
    }

    fn initial_params(&self) -> &[f64] {
        &self.initial
    }

    fn param_names(&self) -> &[String] {
        &self.param_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimulationError;
    use crate::simulation::SimulationOutput;
    use crate::types::TimeSeries;
    use approx::assert_relative_eq;

    /// value(t) = a * t + b on an evenly spaced grid of `points` samples over [0, 10]
    struct LineStub {
        points: usize,
        calls: Cell<usize>,
    }

    impl LineStub {
        fn new(points: usize) -> Self {
            Self {
                points,
                calls: Cell::new(0),
            }
        }
    }

    impl ForwardSimulator for LineStub {
        fn param_names(&self) -> Vec<String> {
            vec!["slope".into(), "offset".into()]
        }

        fn simulate(&self, params: &[f64]) -> std::result::Result<SimulationOutput, SimulationError> {
            self.calls.set(self.calls.get() + 1);
            let step = 10.0 / (self.points - 1) as f64;
            let times: Vec<f64> = (0..self.points).map(|i| i as f64 * step).collect();
            let values = times.iter().map(|t| params[0] * t + params[1]).collect();
            Ok(SimulationOutput::new(times).with_channel("signal", values))
        }
    }

    fn reference_on(times: Vec<f64>, slope: f64, offset: f64) -> ReferenceDataset {
        let values = times.iter().map(|t| slope * t + offset).collect();
        ReferenceDataset::new(TimeSeries::new(times, values).unwrap())
    }

    fn problem(points: usize, reference: ReferenceDataset) -> CalibrationProblem<LineStub> {
        CalibrationProblem::new(
            LineStub::new(points),
            Observable::single("signal"),
            reference,
            vec![1.0, 1.0],
        )
        .unwrap()
    }

    #[test]
    fn test_exact_reproduction_gives_zero_loss() {
        let times: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let p = problem(11, reference_on(times, 2.0, 0.5));
        assert_eq!(p.residual(&[2.0, 0.5]).unwrap(), 0.0);
    }

    #[test]
    fn test_loss_is_mean_absolute_difference_on_shared_grid() {
        let times: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let p = problem(11, reference_on(times, 2.0, 0.5));
        // Offset error of 0.25 everywhere
        assert_relative_eq!(p.residual(&[2.0, 0.75]).unwrap(), 0.25, epsilon = 1e-12);
        assert!(p.residual(&[1.0, 0.0]).unwrap() > 0.0);
    }

    #[test]
    fn test_different_grids_are_interpolated() {
        // Reference sampled off the simulator grid; linear data interpolates exactly
        let times = vec![0.3, 1.7, 4.45, 9.9];
        let p = problem(7, reference_on(times, 2.0, 0.5));
        assert!(p.residual(&[2.0, 0.5]).unwrap() < 1e-12);
    }

    #[test]
    fn test_infeasible_candidates_skip_the_simulator() {
        let times: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let p = problem(11, reference_on(times, 2.0, 0.5));

        assert_eq!(p.residual(&[-1.0, 0.5]).unwrap(), INFEASIBLE_LOSS);
        assert_eq!(p.residual(&[1.0, -1e-9]).unwrap(), INFEASIBLE_LOSS);
        assert_eq!(p.simulator().calls.get(), 0);
        assert_eq!(p.simulator_calls(), 0);

        p.residual(&[1.0, 1.0]).unwrap();
        assert_eq!(p.simulator().calls.get(), 1);

        let trajectory = p.into_trajectory();
        let iterations: Vec<usize> = trajectory.records().iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![1, 2, 3]);
        assert_eq!(
            trajectory.records().iter().map(|r| r.feasible).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert_eq!(trajectory.param_names(), &["slope", "offset"]);
    }

    #[test]
    fn test_alignment_failure_is_fatal() {
        // Reference extends far beyond the simulated [0, 10] window
        let p = problem(11, reference_on(vec![0.0, 50.0, 100.0], 1.0, 0.0));
        let err = p.residual(&[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, CalibrationError::Alignment { .. }));
        assert_eq!(err.offending_params(), Some(&[1.0, 0.0][..]));
    }

    #[test]
    fn test_dimension_checks() {
        let times: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let reference = reference_on(times, 1.0, 0.0);
        assert!(
            CalibrationProblem::new(
                LineStub::new(11),
                Observable::single("signal"),
                reference.clone(),
                vec![1.0]
            )
            .is_err()
        );
        let p = problem(11, reference);
        assert!(p.residual(&[1.0]).is_err());
        assert!(p.with_min_overlap(1.5).is_err());
    }

    #[test]
    fn test_infeasible_start_is_rejected() {
        let times: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let reference = reference_on(times, 1.0, 0.0);

        let err = CalibrationProblem::new(
            LineStub::new(11),
            Observable::single("signal"),
            reference.clone(),
            vec![-1.0, -1.0],
        )
        .err()
        .unwrap();
        assert!(matches!(err, CalibrationError::InvalidConfig(_)));

        let err = problem(11, reference)
            .with_region(FeasibleRegion::new(vec![(2.0, 5.0), (0.0, 5.0)]).unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, CalibrationError::InvalidConfig(_)));
    }

    #[test]
    fn test_custom_region() {
        let times: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let p = problem(11, reference_on(times, 1.0, 0.0))
            .with_region(FeasibleRegion::new(vec![(0.0, 5.0), (-1.0, 1.0)]).unwrap())
            .unwrap();
        assert_eq!(p.residual(&[6.0, 0.0]).unwrap(), INFEASIBLE_LOSS);
        assert_eq!(p.residual(&[1.0, -0.5]).unwrap(), 0.5);
    }
}
