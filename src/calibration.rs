//! Calibration runs: wire a simulator, a reference and a solver together and
//! collect the result.

use crate::config::CalibrationConfig;
use crate::error::{CalibrationError, Result};
use crate::optimization::{
    CalibrationProblem, NelderMeadOptimizer, ProgressCallback, Problem, Solver,
};
use crate::simulation::{DesorptionSimulator, ForwardSimulator, generate_reference};
use crate::types::{CalibrationResult, ReferenceDataset};
use tracing::{info, warn};

/// Drive `solver` over `problem` and package the outcome.
///
/// Hitting an evaluation or iteration cap is not an error: the result comes
/// back with `converged == false`. Simulator and alignment failures abort the
/// run and are returned as errors carrying the offending parameters.
pub fn calibrate<S: ForwardSimulator>(
    problem: CalibrationProblem<S>,
    solver: &mut dyn Solver,
) -> Result<CalibrationResult> {
    let param_names = problem.param_names().to_vec();
    let mut callback = ProgressCallback::new(param_names.clone());

    info!(
        solver = solver.name(),
        reference_samples = problem.reference().len(),
        "Calibrating {:?} from {:?}",
        param_names,
        problem.initial_params()
    );

    let outcome = solver.solve(&problem, &mut callback)?;
    let trajectory = problem.into_trajectory();

    if outcome.converged() {
        info!(
            loss = outcome.cost,
            iterations = outcome.iterations,
            evaluations = trajectory.len(),
            "Converged at {:?}",
            outcome.params
        );
    } else {
        warn!(
            loss = outcome.cost,
            iterations = outcome.iterations,
            evaluations = trajectory.len(),
            "Stopped without converging ({}), best {:?}",
            outcome.termination.describe(),
            outcome.params
        );
    }

    Ok(CalibrationResult {
        converged: outcome.converged(),
        termination: outcome.termination,
        params: outcome.params,
        param_names,
        loss: outcome.cost,
        iterations: outcome.iterations,
        evaluations: trajectory.len(),
        trajectory,
    })
}

/// A configured desorption calibration.
pub struct Calibration {
    config: CalibrationConfig,
    simulator: DesorptionSimulator,
}

impl Calibration {
    pub fn new(config: CalibrationConfig) -> Result<Self> {
        config.validate()?;
        let simulator = DesorptionSimulator::new(config.simulator.clone())?;

        let expected = simulator.param_names();
        let configured: Vec<String> = config.parameters.iter().map(|p| p.name.clone()).collect();
        if expected != configured {
            return Err(CalibrationError::InvalidConfig(format!(
                "parameters must be {:?} in that order, got {:?}",
                expected, configured
            )));
        }

        Ok(Self { config, simulator })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn simulator(&self) -> &DesorptionSimulator {
        &self.simulator
    }

    /// Synthetic reference at the configured true parameters.
    pub fn generate_reference(&self) -> Result<ReferenceDataset> {
        let reference = &self.config.reference;
        generate_reference(
            &self.simulator,
            &self.config.observable,
            &reference.true_params,
            reference.noise_fraction,
            reference.seed,
        )
    }

    pub fn problem(
        &self,
        reference: ReferenceDataset,
    ) -> Result<CalibrationProblem<&DesorptionSimulator>> {
        CalibrationProblem::new(
            &self.simulator,
            self.config.observable.clone(),
            reference,
            self.config.initial_guess(),
        )?
        .with_region(self.config.feasible_region()?)?
        .with_min_overlap(self.config.optimizer.min_overlap)
    }

    pub fn solver(&self) -> NelderMeadOptimizer {
        let optimizer = &self.config.optimizer;
        let solver = NelderMeadOptimizer::new(optimizer.max_evaluations, optimizer.criteria);
        match optimizer.max_iterations {
            Some(max_iter) => solver.with_max_iterations(max_iter),
            None => solver,
        }
    }

    /// Fit the configured parameters to `reference`.
    pub fn run(&self, reference: ReferenceDataset) -> Result<CalibrationResult> {
        let problem = self.problem(reference)?;
        let mut solver = self.solver();
        calibrate(problem, &mut solver)
    }
}
