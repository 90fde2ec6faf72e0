use crate::error::Result;
use crate::types::Termination;

#[derive(Clone, Debug)]
pub struct SolverResult {
    pub termination: Termination,
    pub cost: f64,
    pub iterations: u32,
    pub params: Vec<f64>,
    pub cost_evals: usize,
}

impl SolverResult {
    pub fn converged(&self) -> bool {
        self.termination.is_converged()
    }
}

/// Callback interface for optimization progress
pub trait OptimizationCallback {
    /// Called once per solver iteration with the best point so far
    fn on_iteration(&mut self, iteration: u32, params: &[f64], cost: f64) -> Result<()>;
}

/// Core problem definition - just the essentials
pub trait Problem {
    /// Evaluate cost for given parameters (runs simulation)
    fn cost(&self, params: &[f64]) -> Result<f64>;

    /// Number of parameters
    fn num_params(&self) -> usize;

    /// Initial parameter values
    fn initial_params(&self) -> &[f64];

    /// Parameter names, in vector order
    fn param_names(&self) -> &[String];
}

/// Solver interface - takes problem and callback
pub trait Solver {
    fn name(&self) -> &str;

    /// Solve the optimization problem with callback for progress tracking
    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverResult>;
}

// ============================================================================
// NOTES FOR SOLVER IMPLEMENTATIONS
// ============================================================================
//
// - problem.cost() is EXPENSIVE - every call runs a full transient simulation.
//   It is also where the trajectory is recorded, so never call it for
//   bookkeeping: reuse the costs you already have.
// - Count every call in cost_evals and never exceed the evaluation budget the
//   caller configured; the budget is the only guard against runaway runs.
// - Infeasible candidates come back as INFEASIBLE_LOSS, not as errors. Errors
//   from cost() are genuine failures and must be propagated with `?`.
// - Call callback.on_iteration() once per iteration with the best point.
// - Report Termination::Converged only when the solver's own stopping rule is
//   met; hitting a cap is a distinct, non-fatal outcome.
//
// ============================================================================
