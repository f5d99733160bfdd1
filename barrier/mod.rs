//! Barrier functions, their conjugates, and the damped Newton solvers built on them.

pub mod affine;
pub mod conjugate;
pub mod functions;
pub mod optimizer;

pub use affine::{AffineBarrier, AffineSolution};
pub use conjugate::{BarrierConjugate, ConjugateSolution, CoordinateKind, CoordinatePartition};
pub use functions::{BarrierError, ConjugatePoint};
pub use optimizer::{BarrierObjective, Minimum, SolverError, SolverOptions, SolverStatus, minimize};
