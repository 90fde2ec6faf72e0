//! Thermal desorption of a single trap type from a 1D slab.
//!
//! Hydrogen is tracked as lattice fractions: a mobile population diffusing
//! through the slab and a trapped population exchanging with it,
//!
//! ```text
//! dc_m/dt = d/dx(D dc_m/dx) - dc_t/dt
//! dc_t/dt = k c_m (n_t - c_t) - p c_t
//! ```
//!
//! with Arrhenius rates and a linear temperature ramp. Both faces are perfect
//! sinks; the observable is the outgoing flux through each face.
//!
//! Time integration is backward Euler. The trap equation is solved locally for
//! `c_t` as a function of `c_m`, leaving a tridiagonal nonlinear system in the
//! interior mobile concentrations that Newton's method handles with the Thomas
//! algorithm. The Newton iteration count drives [`AdaptiveStepSize`].

use super::stepsize::{AdaptiveStepSize, StepSizeConfig};
use super::{ForwardSimulator, SimulationOutput};
use crate::error::{CalibrationError, Result, SimulationError};
use serde::{Deserialize, Serialize};
use tracing::trace;

pub const TEMPERATURE: &str = "temperature";
pub const FLUX_LEFT: &str = "flux_left";
pub const FLUX_RIGHT: &str = "flux_right";

/// Boltzmann constant (eV/K)
const K_B: f64 = 8.617333262e-5;

/// Remaining time below this fraction of the final time ends the run
const END_TOLERANCE: f64 = 1e-12;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    pub max_iterations: u32,
    /// Relative tolerance on the largest Newton update
    pub rtol: f64,
    /// Absolute tolerance on the largest Newton update (lattice fraction)
    pub atol: f64,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            rtol: 1e-8,
            atol: 1e-14,
        }
    }
}

/// Material, trap and ramp description. Defaults describe hydrogen in tungsten.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesorptionConfig {
    /// Slab thickness (m)
    pub thickness: f64,
    /// Mesh nodes including both faces
    pub nodes: usize,
    /// Host atom density (m^-3), converts lattice-fraction fluxes to m^-2 s^-1
    pub atom_density: f64,
    /// D0 (m^2/s)
    pub diffusion_prefactor: f64,
    /// E_D (eV)
    pub diffusion_energy: f64,
    /// k0 (s^-1 per lattice fraction)
    pub trapping_prefactor: f64,
    /// E_k (eV)
    pub trapping_energy: f64,
    /// p0 (s^-1)
    pub detrapping_prefactor: f64,
    /// Occupied share of the traps at t = 0
    pub initial_filling: f64,
    /// K
    pub initial_temperature: f64,
    /// K/s
    pub heating_rate: f64,
    /// s
    pub final_time: f64,
    pub stepsize: StepSizeConfig,
    pub newton: NewtonConfig,
}

impl Default for DesorptionConfig {
    fn default() -> Self {
        Self {
            thickness: 1e-6,
            nodes: 61,
            atom_density: 6.3e28,
            diffusion_prefactor: 4.1e-7,
            diffusion_energy: 0.39,
            trapping_prefactor: 5.6e12,
            trapping_energy: 0.39,
            detrapping_prefactor: 1e13,
            initial_filling: 0.5,
            initial_temperature: 300.0,
            heating_rate: 4.0,
            final_time: 120.0,
            stepsize: StepSizeConfig::default(),
            newton: NewtonConfig::default(),
        }
    }
}

impl DesorptionConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("thickness", self.thickness),
            ("atom_density", self.atom_density),
            ("diffusion_prefactor", self.diffusion_prefactor),
            ("trapping_prefactor", self.trapping_prefactor),
            ("detrapping_prefactor", self.detrapping_prefactor),
            ("initial_temperature", self.initial_temperature),
            ("final_time", self.final_time),
            ("newton.rtol", self.newton.rtol),
            ("newton.atol", self.newton.atol),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(CalibrationError::InvalidConfig(format!(
                    "{} must be finite and positive, got {}",
                    name, value
                )));
            }
        }
        if self.nodes < 4 {
            return Err(CalibrationError::InvalidConfig(format!(
                "mesh needs at least 4 nodes, got {}",
                self.nodes
            )));
        }
        if !(0.0..=1.0).contains(&self.initial_filling) {
            return Err(CalibrationError::InvalidConfig(format!(
                "initial_filling must lie in [0, 1], got {}",
                self.initial_filling
            )));
        }
        if !self.heating_rate.is_finite()
            || self.initial_temperature + self.heating_rate * self.final_time <= 0.0
        {
            return Err(CalibrationError::InvalidConfig(
                "temperature ramp must stay positive".into(),
            ));
        }
        if self.newton.max_iterations == 0 {
            return Err(CalibrationError::InvalidConfig(
                "newton.max_iterations must be at least 1".into(),
            ));
        }
        self.stepsize.validate()
    }

    pub fn temperature_at(&self, t: f64) -> f64 {
        self.initial_temperature + self.heating_rate * t
    }
}

/// Parameters calibrated by the engine, in vector order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrapParameters {
    /// n_t (lattice fraction)
    pub concentration: f64,
    /// E_p (eV)
    pub detrapping_energy: f64,
}

impl TrapParameters {
    pub const NAMES: [&'static str; 2] = ["trap_concentration", "detrapping_energy"];

    pub fn from_slice(params: &[f64]) -> std::result::Result<Self, SimulationError> {
        let &[concentration, detrapping_energy] = params else {
            return Err(SimulationError::InvalidParameters(format!(
                "expected 2 parameters {:?}, got {}",
                Self::NAMES,
                params.len()
            )));
        };
        if !concentration.is_finite() || concentration < 0.0 {
            return Err(SimulationError::InvalidParameters(format!(
                "trap concentration must be finite and non-negative, got {}",
                concentration
            )));
        }
        if !detrapping_energy.is_finite() {
            return Err(SimulationError::InvalidParameters(format!(
                "detrapping energy must be finite, got {}",
                detrapping_energy
            )));
        }
        Ok(Self {
            concentration,
            detrapping_energy,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct Rates {
    diffusivity: f64,
    trapping: f64,
    detrapping: f64,
}

struct StepSolution {
    mobile: Vec<f64>,
    trapped: Vec<f64>,
    iterations: u32,
}

/// Forward simulator for ramped thermal desorption.
#[derive(Clone, Debug)]
pub struct DesorptionSimulator {
    config: DesorptionConfig,
}

impl DesorptionSimulator {
    pub fn new(config: DesorptionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DesorptionConfig {
        &self.config
    }

    fn rates_at(&self, t: f64, trap: &TrapParameters) -> Rates {
        let cfg = &self.config;
        let kt = K_B * cfg.temperature_at(t);
        Rates {
            diffusivity: cfg.diffusion_prefactor * (-cfg.diffusion_energy / kt).exp(),
            trapping: cfg.trapping_prefactor * (-cfg.trapping_energy / kt).exp(),
            detrapping: cfg.detrapping_prefactor * (-trap.detrapping_energy / kt).exp(),
        }
    }

    /// Backward-Euler step of length `dt`; `None` when Newton does not converge.
    fn solve_step(
        &self,
        prev_mobile: &[f64],
        prev_trapped: &[f64],
        dt: f64,
        rates: &Rates,
        n_t: f64,
        h: f64,
    ) -> Option<StepSolution> {
        let newton = &self.config.newton;
        let n = prev_mobile.len();
        let interior = n - 2;
        let r = dt * rates.diffusivity / (h * h);

        let mut c = prev_mobile.to_vec();
        let mut diag = vec![0.0; interior];
        let mut rhs = vec![0.0; interior];
        let mut scratch = vec![0.0; interior];

        for iteration in 1..=newton.max_iterations {
            for j in 0..interior {
                let i = j + 1;
                let (g, dg) = trap_update(c[i], prev_trapped[i], dt, rates, n_t);
                let residual = c[i] - prev_mobile[i] - r * (c[i - 1] - 2.0 * c[i] + c[i + 1]) + g
                    - prev_trapped[i];
                diag[j] = 1.0 + 2.0 * r + dg;
                rhs[j] = -residual;
            }
            solve_tridiagonal(-r, &diag, &mut rhs, &mut scratch);

            let mut max_update = 0.0_f64;
            let mut max_c = 0.0_f64;
            for j in 0..interior {
                c[j + 1] += rhs[j];
                max_update = max_update.max(rhs[j].abs());
                max_c = max_c.max(c[j + 1].abs());
            }
            if !max_update.is_finite() {
                return None;
            }
            if max_update <= newton.atol + newton.rtol * max_c {
                let trapped = c
                    .iter()
                    .zip(prev_trapped)
                    .map(|(&ci, &ct)| trap_update(ci, ct, dt, rates, n_t).0)
                    .collect();
                return Some(StepSolution {
                    mobile: c,
                    trapped,
                    iterations: iteration,
                });
            }
        }
        None
    }

    /// Outgoing fluxes (m^-2 s^-1) through the left and right faces.
    fn surface_fluxes(&self, mobile: &[f64], diffusivity: f64, h: f64) -> (f64, f64) {
        let n = mobile.len();
        let scale = self.config.atom_density * diffusivity / (2.0 * h);
        let left = scale * (4.0 * mobile[1] - mobile[2] - 3.0 * mobile[0]);
        let right = scale * (4.0 * mobile[n - 2] - mobile[n - 3] - 3.0 * mobile[n - 1]);
        (left, right)
    }
}

impl ForwardSimulator for DesorptionSimulator {
    fn param_names(&self) -> Vec<String> {
        TrapParameters::NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn simulate(&self, params: &[f64]) -> std::result::Result<SimulationOutput, SimulationError> {
        let trap = TrapParameters::from_slice(params)?;
        let cfg = &self.config;
        let n = cfg.nodes;
        let h = cfg.thickness / (n - 1) as f64;
        let t_end = cfg.final_time;

        let mut mobile = vec![0.0; n];
        let mut trapped = vec![cfg.initial_filling * trap.concentration; n];
        let mut stepper = AdaptiveStepSize::new(cfg.stepsize.clone());

        let mut times = vec![0.0];
        let mut temperature = vec![cfg.temperature_at(0.0)];
        let mut flux_left = vec![0.0];
        let mut flux_right = vec![0.0];

        let mut t = 0.0;
        let mut cutbacks = 0usize;
        while t_end - t > END_TOLERANCE * t_end {
            let dt = stepper.next_step(t, t_end);
            let t_next = t + dt;
            let rates = self.rates_at(t_next, &trap);

            let Some(step) =
                self.solve_step(&mobile, &trapped, dt, &rates, trap.concentration, h)
            else {
                cutbacks += 1;
                stepper.on_failed(t)?;
                continue;
            };

            let (left, right) = self.surface_fluxes(&step.mobile, rates.diffusivity, h);
            if !left.is_finite() || !right.is_finite() {
                return Err(SimulationError::NonFinite { time: t_next });
            }

            mobile = step.mobile;
            trapped = step.trapped;
            t = t_next;
            times.push(t);
            temperature.push(cfg.temperature_at(t));
            flux_left.push(left);
            flux_right.push(right);
            stepper.on_converged(step.iterations);
        }

        trace!(
            steps = times.len() - 1,
            cutbacks,
            "Desorption run finished for {:?}",
            params
        );

        Ok(SimulationOutput::new(times)
            .with_channel(TEMPERATURE, temperature)
            .with_channel(FLUX_LEFT, flux_left)
            .with_channel(FLUX_RIGHT, flux_right))
    }
}

/// Backward-Euler trapped concentration as a function of the mobile one,
/// `c_t(c) = (c_t_prev + dt k n_t c) / (1 + dt (k c + p))`, and its derivative.
///
/// Below zero the curve is continued linearly so Newton iterates that
/// overshoot stay well defined.
fn trap_update(c: f64, ct_prev: f64, dt: f64, rates: &Rates, n_t: f64) -> (f64, f64) {
    let k = rates.trapping;
    let p = rates.detrapping;
    let c_eval = c.max(0.0);
    let denom = 1.0 + dt * (k * c_eval + p);
    let value = (ct_prev + dt * k * n_t * c_eval) / denom;
    let slope = dt * k * (n_t * (1.0 + dt * p) - ct_prev) / (denom * denom);
    if c < 0.0 {
        (value + slope * c, slope)
    } else {
        (value, slope)
    }
}

/// Solve a tridiagonal system with constant off-diagonals `off` in place:
/// `rhs` holds the solution on return.
fn solve_tridiagonal(off: f64, diag: &[f64], rhs: &mut [f64], scratch: &mut [f64]) {
    let n = diag.len();
    scratch[0] = off / diag[0];
    rhs[0] /= diag[0];
    for i in 1..n {
        let m = diag[i] - off * scratch[i - 1];
        scratch[i] = off / m;
        rhs[i] = (rhs[i] - off * rhs[i - 1]) / m;
    }
    for i in (0..n - 1).rev() {
        rhs[i] -= scratch[i] * rhs[i + 1];
    }
}
