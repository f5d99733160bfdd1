//! # Barrier Approximation over a Polyhedron
//!
//! For a Gaussian optimization variable with precision `P` restricted to the
//! polyhedron `{u : A u < b}` (the selection event), the log probability of
//! the polyhedron is approximated by
//!
//! ```text
//! -min_u { -u·c + u'Pu/2 + Σ_i log(1 + s_i / (b_i - A_i u)) } - c'P⁻¹c/2
//! ```
//!
//! with `c = P μ` and `s_i = sqrt((A P A')_ii)`. This module minimizes the
//! bracketed objective with the shared damped Newton driver. Unlike the
//! separable conjugate, the Hessian `P + A' diag(1/r² - 1/(r+s)²) A` is dense,
//! so the Newton step is a dense linear solve.
//!
//! The half-space representation follows the same `a_i^T x <= b_i` convention
//! as the facets of a polytope; here every facet contributes a barrier term
//! instead of a projection.

use crate::barrier::optimizer::{
    BarrierObjective, SolverError, SolverOptions, SolverStatus, minimize,
};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_linalg::Solve;

/// Geometry and precision of a polyhedral barrier problem. The conjugate
/// argument varies per call, everything else is fixed.
#[derive(Debug, Clone)]
pub struct AffineBarrier {
    precision: Array2<f64>,
    linear_part: Array2<f64>,
    offset: Array1<f64>,
    scaling: Array1<f64>,
}

/// Result of [`AffineBarrier::solve`].
#[derive(Debug, Clone)]
pub struct AffineSolution {
    /// Minimal value of the barrier objective.
    pub value: f64,
    pub minimizer: Array1<f64>,
    pub iterations: usize,
    pub status: SolverStatus,
}

impl AffineBarrier {
    /// Builds the barrier for `{u : linear_part · u < offset}` under `precision`.
    pub fn new(
        precision: Array2<f64>,
        linear_part: Array2<f64>,
        offset: Array1<f64>,
    ) -> Result<Self, SolverError> {
        let dim = precision.nrows();
        if precision.ncols() != dim {
            return Err(SolverError::DimensionMismatch {
                what: "precision columns",
                expected: dim,
                found: precision.ncols(),
            });
        }
        if linear_part.ncols() != dim {
            return Err(SolverError::DimensionMismatch {
                what: "constraint matrix columns",
                expected: dim,
                found: linear_part.ncols(),
            });
        }
        if offset.len() != linear_part.nrows() {
            return Err(SolverError::DimensionMismatch {
                what: "constraint offset",
                expected: linear_part.nrows(),
                found: offset.len(),
            });
        }

        let weighted = linear_part.dot(&precision);
        let mut scaling = Array1::zeros(linear_part.nrows());
        for (row, (a, pa)) in linear_part
            .axis_iter(Axis(0))
            .zip(weighted.axis_iter(Axis(0)))
            .enumerate()
        {
            let squared = a.dot(&pa);
            if !(squared > 0.0 && squared.is_finite()) {
                return Err(SolverError::DegenerateConstraint { row });
            }
            scaling[row] = squared.sqrt();
        }

        Ok(Self {
            precision,
            linear_part,
            offset,
            scaling,
        })
    }

    pub fn dim(&self) -> usize {
        self.precision.nrows()
    }

    /// Per-row barrier scales `sqrt((A P A')_ii)`.
    pub fn scaling(&self) -> ArrayView1<'_, f64> {
        self.scaling.view()
    }

    /// Slack `b - A u`, positive exactly inside the polyhedron.
    pub fn slack(&self, point: ArrayView1<f64>) -> Array1<f64> {
        &self.offset - &self.linear_part.dot(&point)
    }

    /// Minimizes the barrier objective for the conjugate argument `c`,
    /// starting from a strictly feasible point.
    pub fn solve(
        &self,
        conjugate_arg: ArrayView1<f64>,
        feasible_point: ArrayView1<f64>,
        options: &SolverOptions,
    ) -> Result<AffineSolution, SolverError> {
        if conjugate_arg.len() != self.dim() {
            return Err(SolverError::DimensionMismatch {
                what: "conjugate argument",
                expected: self.dim(),
                found: conjugate_arg.len(),
            });
        }
        let objective = AffineObjective {
            barrier: self,
            conjugate_arg,
        };
        let minimum = minimize(&objective, feasible_point.to_owned(), options)?;
        Ok(AffineSolution {
            value: minimum.value,
            minimizer: minimum.point,
            iterations: minimum.iterations,
            status: minimum.status,
        })
    }

    fn hessian(&self, slack: ArrayView1<f64>) -> Array2<f64> {
        let weights = ndarray::Zip::from(&slack)
            .and(&self.scaling)
            .map_collect(|&r, &s| 1.0 / (r * r) - 1.0 / ((r + s) * (r + s)));
        let weighted_rows = &self.linear_part * &weights.insert_axis(Axis(1));
        &self.precision + &self.linear_part.t().dot(&weighted_rows)
    }
}

struct AffineObjective<'b, 'a> {
    barrier: &'b AffineBarrier,
    conjugate_arg: ArrayView1<'a, f64>,
}

impl BarrierObjective for AffineObjective<'_, '_> {
    fn dim(&self) -> usize {
        self.barrier.dim()
    }

    fn value(&self, point: ArrayView1<f64>) -> f64 {
        let slack = self.barrier.slack(point);
        let mut penalty = 0.0;
        for (&r, &s) in slack.iter().zip(self.barrier.scaling.iter()) {
            if !(r > 0.0) {
                return f64::INFINITY;
            }
            penalty += (s / r).ln_1p();
        }
        let quadratic = 0.5 * point.dot(&self.barrier.precision.dot(&point));
        quadratic - point.dot(&self.conjugate_arg) + penalty
    }

    fn newton_step(&self, point: ArrayView1<f64>) -> Array1<f64> {
        let slack = self.barrier.slack(point);
        let barrier_grad = ndarray::Zip::from(&slack)
            .and(&self.barrier.scaling)
            .map_collect(|&r, &s| 1.0 / r - 1.0 / (r + s));
        let gradient = self.barrier.precision.dot(&point) - self.conjugate_arg
            + self.barrier.linear_part.t().dot(&barrier_grad);
        let hessian = self.barrier.hessian(slack.view());

        match hessian.solve(&gradient) {
            Ok(step) => step,
            Err(err) => {
                log::debug!(
                    "Solving the barrier Hessian system failed ({}); using the diagonal step.",
                    err
                );
                ndarray::Zip::from(&gradient)
                    .and(hessian.diag())
                    .map_collect(|&g, &h| g / h)
            }
        }
    }
}
