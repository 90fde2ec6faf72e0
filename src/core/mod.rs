pub mod feasibility;

pub use feasibility::FeasibleRegion;
