use super::traits::{OptimizationCallback, Problem, Solver, SolverResult};
use crate::error::{CalibrationError, Result};
use crate::types::{ConvergenceCriteria, Termination};
use tracing::debug;

/// Relative perturbation of non-zero coordinates for the initial simplex
const NONZERO_DELTA: f64 = 0.05;
/// Absolute perturbation of zero coordinates for the initial simplex
const ZERO_DELTA: f64 = 0.00025;

/// Nelder-Mead simplex search - derivative-free, tolerant of noisy and
/// non-differentiable costs
pub struct NelderMeadOptimizer {
    max_evals: usize,
    max_iter: u32,
    criteria: ConvergenceCriteria,
    rho: f64,   // reflection
    chi: f64,   // expansion
    psi: f64,   // contraction
    sigma: f64, // shrink
}

/// Cost evaluations left before the hard cap.
struct Budget {
    used: usize,
    max: usize,
}

impl Budget {
    /// Evaluate `x`, or `None` when the budget is spent.
    fn eval(&mut self, problem: &dyn Problem, x: &[f64]) -> Result<Option<f64>> {
        if self.used >= self.max {
            return Ok(None);
        }
        self.used += 1;
        problem.cost(x).map(Some)
    }
}

/// Best point seen across every evaluation, including rejected trial points.
struct Incumbent {
    params: Vec<f64>,
    cost: f64,
}

impl Incumbent {
    fn offer(&mut self, params: &[f64], cost: f64) {
        if cost < self.cost {
            self.cost = cost;
            self.params.copy_from_slice(params);
        }
    }
}

impl NelderMeadOptimizer {
    pub fn new(max_evals: usize, criteria: ConvergenceCriteria) -> Self {
        Self {
            max_evals,
            max_iter: u32::MAX,
            criteria,
            rho: 1.0,
            chi: 2.0,
            psi: 0.5,
            sigma: 0.5,
        }
    }

    /// Also stop after this many simplex iterations (default: unlimited)
    pub fn with_max_iterations(mut self, max_iter: u32) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Configure simplex coefficients (defaults: rho=1, chi=2, psi=0.5, sigma=0.5)
    pub fn with_coefficients(mut self, rho: f64, chi: f64, psi: f64, sigma: f64) -> Self {
        self.rho = rho;
        self.chi = chi;
        self.psi = psi;
        self.sigma = sigma;
        self
    }

    pub fn criteria(&self) -> &ConvergenceCriteria {
        &self.criteria
    }

    fn validate(&self) -> Result<()> {
        self.criteria.validate()?;
        if self.max_evals == 0 {
            return Err(CalibrationError::InvalidConfig(
                "evaluation budget must allow at least one evaluation".into(),
            ));
        }
        let valid = self.rho > 0.0
            && self.chi > 1.0
            && self.chi > self.rho
            && self.psi > 0.0
            && self.psi < 1.0
            && self.sigma > 0.0
            && self.sigma < 1.0;
        if !valid {
            return Err(CalibrationError::InvalidConfig(format!(
                "invalid simplex coefficients rho={} chi={} psi={} sigma={}",
                self.rho, self.chi, self.psi, self.sigma
            )));
        }
        Ok(())
    }

    /// Initial guess plus one vertex per coordinate, perturbed by 5%
    /// (or by a small absolute step for zero coordinates)
    fn initial_simplex(x0: &[f64]) -> Vec<Vec<f64>> {
        let mut simplex = Vec::with_capacity(x0.len() + 1);
        simplex.push(x0.to_vec());
        for i in 0..x0.len() {
            let mut vertex = x0.to_vec();
            vertex[i] = if vertex[i] != 0.0 {
                (1.0 + NONZERO_DELTA) * vertex[i]
            } else {
                ZERO_DELTA
            };
            simplex.push(vertex);
        }
        simplex
    }

    /// Sort vertices by cost, best first
    fn order(simplex: &mut Vec<Vec<f64>>, costs: &mut Vec<f64>) {
        let mut idx: Vec<usize> = (0..costs.len()).collect();
        idx.sort_by(|&a, &b| costs[a].total_cmp(&costs[b]));
        *simplex = idx.iter().map(|&i| simplex[i].clone()).collect();
        *costs = idx.iter().map(|&i| costs[i]).collect();
    }

    /// Largest coordinate distance and largest cost difference to the best vertex
    fn spreads(simplex: &[Vec<f64>], costs: &[f64]) -> (f64, f64) {
        let best = &simplex[0];
        let param_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(best).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        let cost_spread = costs[1..]
            .iter()
            .map(|c| (c - costs[0]).abs())
            .fold(0.0, f64::max);
        (param_spread, cost_spread)
    }

    /// x = (1 + t) * centroid - t * worst
    fn along(centroid: &[f64], worst: &[f64], t: f64) -> Vec<f64> {
        centroid
            .iter()
            .zip(worst)
            .map(|(c, w)| (1.0 + t) * c - t * w)
            .collect()
    }
}

impl Solver for NelderMeadOptimizer {
    fn name(&self) -> &str {
        "Nelder-Mead"
    }

    fn solve(
        &mut self,
        problem: &dyn Problem,
        callback: &mut dyn OptimizationCallback,
    ) -> Result<SolverResult> {
        self.validate()?;

        let n = problem.num_params();
        let x0 = problem.initial_params();
        if x0.len() != n || n == 0 {
            return Err(CalibrationError::dimension_mismatch(n, x0.len()));
        }

        let mut budget = Budget {
            used: 0,
            max: self.max_evals,
        };
        let mut best = Incumbent {
            params: x0.to_vec(),
            cost: f64::INFINITY,
        };

        // Evaluate the initial simplex
        let mut simplex = Self::initial_simplex(x0);
        let mut costs = Vec::with_capacity(n + 1);
        for vertex in &simplex {
            match budget.eval(problem, vertex)? {
                Some(cost) => {
                    best.offer(vertex, cost);
                    costs.push(cost);
                }
                None => {
                    return Ok(SolverResult {
                        termination: Termination::MaxEvaluations,
                        cost: best.cost,
                        iterations: 0,
                        params: best.params,
                        cost_evals: budget.used,
                    });
                }
            }
        }
        Self::order(&mut simplex, &mut costs);

        let mut iterations = 0u32;
        let termination = loop {
            let (param_spread, cost_spread) = Self::spreads(&simplex, &costs);
            if self.criteria.is_satisfied(param_spread, cost_spread) {
                break Termination::Converged;
            }
            if iterations >= self.max_iter {
                break Termination::MaxIterations;
            }
            if budget.used >= budget.max {
                break Termination::MaxEvaluations;
            }

            let worst = simplex[n].clone();
            let mut centroid = vec![0.0; n];
            for vertex in &simplex[..n] {
                for (c, v) in centroid.iter_mut().zip(vertex) {
                    *c += v / n as f64;
                }
            }

            let mut shrink = false;
            let mut exhausted = false;

            // Reflection
            let xr = Self::along(&centroid, &worst, self.rho);
            let Some(fr) = budget.eval(problem, &xr)? else {
                break Termination::MaxEvaluations;
            };
            best.offer(&xr, fr);

            if fr < costs[0] {
                // Expansion
                let xe = Self::along(&centroid, &worst, self.rho * self.chi);
                match budget.eval(problem, &xe)? {
                    Some(fe) => {
                        best.offer(&xe, fe);
                        if fe < fr {
                            simplex[n] = xe;
                            costs[n] = fe;
                        } else {
                            simplex[n] = xr;
                            costs[n] = fr;
                        }
                    }
                    None => {
                        simplex[n] = xr;
                        costs[n] = fr;
                        exhausted = true;
                    }
                }
            } else if fr < costs[n - 1] {
                simplex[n] = xr;
                costs[n] = fr;
            } else if fr < costs[n] {
                // Outside contraction
                let xc = Self::along(&centroid, &worst, self.psi * self.rho);
                match budget.eval(problem, &xc)? {
                    Some(fc) => {
                        best.offer(&xc, fc);
                        if fc <= fr {
                            simplex[n] = xc;
                            costs[n] = fc;
                        } else {
                            shrink = true;
                        }
                    }
                    None => exhausted = true,
                }
            } else {
                // Inside contraction
                let xcc = Self::along(&centroid, &worst, -self.psi);
                match budget.eval(problem, &xcc)? {
                    Some(fcc) => {
                        best.offer(&xcc, fcc);
                        if fcc < costs[n] {
                            simplex[n] = xcc;
                            costs[n] = fcc;
                        } else {
                            shrink = true;
                        }
                    }
                    None => exhausted = true,
                }
            }

            if shrink {
                debug!(iteration = iterations + 1, "Shrinking simplex");
                for j in 1..=n {
                    let shrunk: Vec<f64> = simplex[0]
                        .iter()
                        .zip(&simplex[j])
                        .map(|(b, v)| b + self.sigma * (v - b))
                        .collect();
                    match budget.eval(problem, &shrunk)? {
                        Some(cost) => {
                            best.offer(&shrunk, cost);
                            simplex[j] = shrunk;
                            costs[j] = cost;
                        }
                        None => {
                            exhausted = true;
                            break;
                        }
                    }
                }
            }

            Self::order(&mut simplex, &mut costs);
            iterations += 1;
            callback.on_iteration(iterations, &simplex[0], costs[0])?;

            if exhausted {
                break Termination::MaxEvaluations;
            }
        };

        Ok(SolverResult {
            termination,
            cost: best.cost,
            iterations,
            params: best.params,
            cost_evals: budget.used,
        })
    }
}
