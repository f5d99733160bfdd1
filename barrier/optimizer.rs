//! # Damped Newton Driver for Barrier Objectives
//!
//! Every optimization in this crate minimizes a strictly convex objective that
//! is finite on an open domain and `+∞` outside it. The driver here owns the
//! iteration policy shared by all of them:
//!
//! 1.  The objective supplies a Newton direction (diagonal or full Hessian,
//!     its choice).
//! 2.  Backtracking halves the step multiplier until the proposal is inside
//!     the domain and does not increase the objective.
//! 3.  After [`STEP_GROWTH_PERIOD`] consecutive iterations without any
//!     backtracking the multiplier doubles again, up to its starting value.
//!     Multipliers above one would let a step jump across the optimum to a
//!     point of nearly equal value and stop the loop early.
//! 4.  The loop stops once `|Δf| <= tol · |f|`. Running out of iterations is
//!     a soft outcome: the best iterate is returned with
//!     [`SolverStatus::MaxIterationsReached`].
//!
//! Solver state lives in a [`BarrierState`] owned by a single call, so
//! concurrent solves never share anything mutable.

use crate::barrier::functions::BarrierError;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Consecutive backtrack-free iterations after which the step multiplier doubles.
pub const STEP_GROWTH_PERIOD: usize = 4;

/// Halvings tried before the line search concludes no descent is left.
pub const MAX_STEP_HALVINGS: usize = 60;

/// Errors surfaced by the barrier solvers.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("The argument is infeasible for the barrier domain: {0}")]
    InfeasibleInput(#[from] BarrierError),

    #[error("The starting point lies outside the open barrier domain (objective value {value}).")]
    InfeasibleStart { value: f64 },

    #[error("Newton iterate {iteration} left the barrier domain: {reason}.")]
    InfeasibleIterate {
        iteration: usize,
        reason: &'static str,
    },

    #[error(
        "The barrier solver did not converge within {max_iterations} iterations. Last objective change was {last_change:.6e}."
    )]
    NonConvergence {
        max_iterations: usize,
        last_change: f64,
    },

    #[error("Dimension mismatch for {what}: expected {expected}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Constraint row {row} has zero length under the precision and cannot carry a barrier.")]
    DegenerateConstraint { row: usize },
}

impl SolverError {
    /// True when the failure is caused by the caller's argument or starting
    /// point rather than by the iteration itself.
    pub fn is_infeasible(&self) -> bool {
        matches!(
            self,
            SolverError::InfeasibleInput(_)
                | SolverError::InfeasibleStart { .. }
                | SolverError::InfeasibleIterate { .. }
        )
    }
}

/// Terminal state of a successful solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverStatus {
    /// The relative change criterion was met, or no further descent was possible.
    Converged,
    /// The iteration budget ran out; the best iterate is reported.
    MaxIterationsReached,
}

/// Iteration controls for the damped Newton driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Step multiplier used on the first iteration.
    pub initial_step: f64,
}

impl SolverOptions {
    /// Settings for the separable cube/orthant conjugate.
    pub fn conjugate_default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-10,
            initial_step: 1.0,
        }
    }

    /// Settings for the polyhedral barrier used on every grid point.
    pub fn affine_default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-12,
            initial_step: 1.0,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self::conjugate_default()
    }
}

/// A convex objective that is `+∞` outside an open domain.
pub trait BarrierObjective {
    /// Number of optimization variables.
    fn dim(&self) -> usize;

    /// Objective value, `f64::INFINITY` outside the domain.
    fn value(&self, point: ArrayView1<f64>) -> f64;

    /// Newton step `H⁻¹ g` at a point inside the domain. The driver subtracts
    /// a multiple of it from the current point.
    fn newton_step(&self, point: ArrayView1<f64>) -> Array1<f64>;
}

/// Result of [`minimize`].
#[derive(Debug, Clone)]
pub struct Minimum {
    pub point: Array1<f64>,
    pub value: f64,
    pub iterations: usize,
    pub status: SolverStatus,
    /// Absolute objective change on the last accepted step.
    pub last_change: f64,
}

impl Minimum {
    /// Converts an exhausted iteration budget into [`SolverError::NonConvergence`].
    pub fn require_converged(self) -> Result<Self, SolverError> {
        match self.status {
            SolverStatus::Converged => Ok(self),
            SolverStatus::MaxIterationsReached => Err(SolverError::NonConvergence {
                max_iterations: self.iterations,
                last_change: self.last_change,
            }),
        }
    }
}

enum LineSearch {
    Accepted {
        point: Array1<f64>,
        value: f64,
        halvings: usize,
    },
    Stalled,
}

/// Mutable state of one Newton run.
struct BarrierState {
    point: Array1<f64>,
    value: f64,
    multiplier: f64,
    max_multiplier: f64,
    steady_iterations: usize,
    last_change: f64,
}

impl BarrierState {
    fn start<O: BarrierObjective + ?Sized>(
        objective: &O,
        initial: Array1<f64>,
        multiplier: f64,
    ) -> Result<Self, SolverError> {
        let value = objective.value(initial.view());
        if !value.is_finite() {
            return Err(SolverError::InfeasibleStart { value });
        }
        Ok(Self {
            point: initial,
            value,
            multiplier,
            max_multiplier: multiplier,
            steady_iterations: 0,
            last_change: f64::INFINITY,
        })
    }

    fn line_search<O: BarrierObjective + ?Sized>(
        &mut self,
        objective: &O,
        step: &Array1<f64>,
    ) -> LineSearch {
        for halvings in 0..=MAX_STEP_HALVINGS {
            let proposal = &self.point - &(step * self.multiplier);
            let proposed_value = objective.value(proposal.view());
            if proposed_value <= self.value {
                return LineSearch::Accepted {
                    point: proposal,
                    value: proposed_value,
                    halvings,
                };
            }
            self.multiplier *= 0.5;
        }
        LineSearch::Stalled
    }

    fn adapt_step(&mut self, halvings: usize) {
        if halvings > 0 {
            self.steady_iterations = 0;
            return;
        }
        self.steady_iterations += 1;
        if self.steady_iterations == STEP_GROWTH_PERIOD {
            self.multiplier = (2.0 * self.multiplier).min(self.max_multiplier);
            self.steady_iterations = 0;
        }
    }

    fn finish(self, iterations: usize, status: SolverStatus) -> Minimum {
        Minimum {
            point: self.point,
            value: self.value,
            iterations,
            status,
            last_change: self.last_change,
        }
    }
}

/// Minimizes a barrier objective by damped Newton from a strictly feasible start.
pub fn minimize<O: BarrierObjective + ?Sized>(
    objective: &O,
    initial: Array1<f64>,
    options: &SolverOptions,
) -> Result<Minimum, SolverError> {
    if initial.len() != objective.dim() {
        return Err(SolverError::DimensionMismatch {
            what: "initial point",
            expected: objective.dim(),
            found: initial.len(),
        });
    }

    let mut state = BarrierState::start(objective, initial, options.initial_step)?;

    for iteration in 1..=options.max_iterations {
        let step = objective.newton_step(state.point.view());
        if step.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::InfeasibleIterate {
                iteration,
                reason: "the Newton step is not finite",
            });
        }

        match state.line_search(objective, &step) {
            LineSearch::Accepted {
                point,
                value,
                halvings,
            } => {
                let change = (state.value - value).abs();
                state.point = point;
                state.value = value;
                state.last_change = change;
                if change <= options.tolerance * value.abs() {
                    log::debug!(
                        "Barrier solve converged after {} iterations (value {:.8e}).",
                        iteration,
                        value
                    );
                    return Ok(state.finish(iteration, SolverStatus::Converged));
                }
                state.adapt_step(halvings);
            }
            LineSearch::Stalled => {
                log::debug!(
                    "Barrier line search found no descent at iteration {}; treating the iterate as optimal.",
                    iteration
                );
                return Ok(state.finish(iteration, SolverStatus::Converged));
            }
        }
    }

    log::warn!(
        "Barrier solve reached the iteration limit ({}); last objective change {:.3e}.",
        options.max_iterations,
        state.last_change
    );
    Ok(state.finish(options.max_iterations, SolverStatus::MaxIterationsReached))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// `f(u) = Σ (u_i - c_i)² / 2 - Σ log(u_i)` on the positive orthant.
    struct LogQuadratic {
        center: Array1<f64>,
    }

    impl BarrierObjective for LogQuadratic {
        fn dim(&self) -> usize {
            self.center.len()
        }

        fn value(&self, point: ArrayView1<f64>) -> f64 {
            if point.iter().any(|&u| !(u > 0.0)) {
                return f64::INFINITY;
            }
            point
                .iter()
                .zip(self.center.iter())
                .map(|(&u, &c)| 0.5 * (u - c) * (u - c) - u.ln())
                .sum()
        }

        fn newton_step(&self, point: ArrayView1<f64>) -> Array1<f64> {
            ndarray::Zip::from(&point)
                .and(&self.center)
                .map_collect(|&u, &c| (u - c - 1.0 / u) / (1.0 + 1.0 / (u * u)))
        }
    }

    #[test]
    fn newton_reaches_the_closed_form_minimizer() {
        let objective = LogQuadratic {
            center: array![1.0, -3.0, 10.0],
        };
        let result = minimize(
            &objective,
            Array1::ones(3),
            &SolverOptions::conjugate_default(),
        )
        .expect("solve");
        assert_eq!(result.status, SolverStatus::Converged);
        for (&u, &c) in result.point.iter().zip(objective.center.iter()) {
            let expected = 0.5 * (c + (c * c + 4.0).sqrt());
            assert_relative_eq!(u, expected, max_relative = 1e-6);
        }
    }

    #[test]
    fn infeasible_start_is_reported() {
        let objective = LogQuadratic {
            center: array![1.0],
        };
        let err = minimize(&objective, array![-1.0], &SolverOptions::default()).unwrap_err();
        assert!(matches!(err, SolverError::InfeasibleStart { .. }));
        assert!(err.is_infeasible());
    }

    #[test]
    fn exhausted_budget_is_a_soft_outcome() {
        let objective = LogQuadratic {
            center: array![50.0],
        };
        let options = SolverOptions::default().with_max_iterations(1);
        let result = minimize(&objective, array![0.01], &options).expect("soft outcome");
        assert_eq!(result.status, SolverStatus::MaxIterationsReached);
        assert!(result.value < objective.value(array![0.01].view()));
        assert!(matches!(
            result.require_converged(),
            Err(SolverError::NonConvergence {
                max_iterations: 1,
                ..
            })
        ));
    }

    #[test]
    fn dimension_mismatch_is_fatal() {
        let objective = LogQuadratic {
            center: array![1.0, 2.0],
        };
        let err = minimize(&objective, array![1.0], &SolverOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            SolverError::DimensionMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }
}
