pub mod callback;
pub mod interpolate;
pub mod problem;
pub mod solvers;

pub use callback::{ProgressCallback, Trajectory, TrajectoryRecorder};
pub use problem::CalibrationProblem;
pub use solvers::{NelderMeadOptimizer, OptimizationCallback, Problem, Solver, SolverResult};
