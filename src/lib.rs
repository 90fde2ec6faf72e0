//! Parameter calibration for transient forward models.
//!
//! A [`ForwardSimulator`] maps a parameter vector to sampled output channels.
//! [`CalibrationProblem`] scores a candidate against a [`ReferenceDataset`] by
//! mean absolute error after interpolating onto the reference grid, and
//! [`NelderMeadOptimizer`] searches for the minimum while every evaluation is
//! recorded into a [`Trajectory`].
//!
//! The bundled simulator is a McNabb-Foster thermal desorption model of a
//! trapped species in a slab, stepped with an [`AdaptiveStepSize`] controller.

pub mod calibration;
pub mod config;
pub mod core;
pub mod error;
pub mod optimization;
pub mod simulation;
pub mod types;

pub use calibration::{Calibration, calibrate};
pub use config::CalibrationConfig;
pub use crate::core::FeasibleRegion;
pub use error::{CalibrationError, Result, SimulationError};
pub use optimization::{
    CalibrationProblem, NelderMeadOptimizer, OptimizationCallback, Problem, Solver, SolverResult,
    Trajectory, TrajectoryRecorder,
};
pub use simulation::{
    AdaptiveStepSize, DesorptionConfig, DesorptionSimulator, ForwardSimulator, Observable,
    SimulationOutput, StepSizeConfig, generate_reference,
};
pub use types::*;
