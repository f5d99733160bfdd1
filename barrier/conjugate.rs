//! # Conjugate of the Mixed Cube/Orthant Barrier
//!
//! Computes `sup_u a·u - B(u)` where `B` is a separable barrier over a
//! product domain: orthant coordinates (`u > 0`, the selected, sign-fixed
//! variables) and cube coordinates (`|u| < λ`, the unselected variables whose
//! subgradient is bounded by the penalty weight). The supremum serves as the
//! log-normalizing-constant term of the randomized selection probability.
//!
//! Two routes are offered. [`BarrierConjugate::evaluate`] uses the closed
//! forms of [`crate::barrier::functions`]. [`BarrierConjugate::solve`] runs the
//! damped Newton driver with the elementwise (diagonal) Newton step, which is
//! exact here because the barrier is separable.

use crate::barrier::functions::{
    self, BarrierError, ConjugatePoint, check_lagrange, check_orthant_argument, check_scale,
    cube_terms, orthant_terms,
};
use crate::barrier::optimizer::{
    BarrierObjective, Minimum, SolverError, SolverOptions, SolverStatus, minimize,
};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

/// The domain of a single conjugate coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateKind {
    /// Non-negative (penalty-active) coordinate.
    Orthant,
    /// Box-bounded (penalty-inactive) coordinate with half-width λ.
    Cube,
}

/// A disjoint cover of the conjugate coordinates by [`CoordinateKind`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatePartition {
    kinds: Vec<CoordinateKind>,
}

impl CoordinatePartition {
    /// `true` entries become cube coordinates, the rest orthant coordinates.
    pub fn from_cube_mask(cube_mask: &[bool]) -> Self {
        let kinds = cube_mask
            .iter()
            .map(|&is_cube| {
                if is_cube {
                    CoordinateKind::Cube
                } else {
                    CoordinateKind::Orthant
                }
            })
            .collect();
        Self { kinds }
    }

    /// One orthant coordinate followed by `num_cube` cube coordinates, the
    /// layout of a forward-stepwise selection event.
    pub fn single_active(num_cube: usize) -> Self {
        let mut kinds = Vec::with_capacity(num_cube + 1);
        kinds.push(CoordinateKind::Orthant);
        kinds.extend(std::iter::repeat_n(CoordinateKind::Cube, num_cube));
        Self { kinds }
    }

    pub fn kinds(&self) -> &[CoordinateKind] {
        &self.kinds
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn num_cube(&self) -> usize {
        self.kinds
            .iter()
            .filter(|&&k| k == CoordinateKind::Cube)
            .count()
    }

    pub fn num_orthant(&self) -> usize {
        self.len() - self.num_cube()
    }

    fn gather(&self, values: ArrayView1<f64>, kind: CoordinateKind) -> Array1<f64> {
        self.kinds
            .iter()
            .zip(values.iter())
            .filter(|&(&k, _)| k == kind)
            .map(|(_, &v)| v)
            .collect()
    }

    /// Spreads one half-width per cube coordinate over the full coordinate
    /// vector. Orthant slots hold NaN and are never read.
    fn expand_lagrange(&self, lagrange: ArrayView1<f64>) -> Array1<f64> {
        let mut cube_values = lagrange.iter();
        self.kinds
            .iter()
            .map(|&k| match k {
                CoordinateKind::Cube => cube_values.next().copied().unwrap_or(f64::NAN),
                CoordinateKind::Orthant => f64::NAN,
            })
            .collect()
    }
}

/// Result of [`BarrierConjugate::solve`].
#[derive(Debug, Clone)]
pub struct ConjugateSolution {
    /// The maximizing `u*`, in the coordinate order of the partition.
    pub maximizer: Array1<f64>,
    /// The conjugate value `a·u* - B(u*)`.
    pub value: f64,
    pub iterations: usize,
    pub status: SolverStatus,
    pub last_change: f64,
}

impl ConjugateSolution {
    fn from_minimum(minimum: Minimum) -> Self {
        Self {
            maximizer: minimum.point,
            value: -minimum.value,
            iterations: minimum.iterations,
            status: minimum.status,
            last_change: minimum.last_change,
        }
    }

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

/// The conjugate of the scaled cube/orthant barrier.
#[derive(Debug, Clone)]
pub struct BarrierConjugate {
    partition: CoordinatePartition,
    barrier_scale: f64,
}

impl BarrierConjugate {
    pub fn new(partition: CoordinatePartition, barrier_scale: f64) -> Result<Self, BarrierError> {
        check_scale(barrier_scale)?;
        Ok(Self {
            partition,
            barrier_scale,
        })
    }

    pub fn partition(&self) -> &CoordinatePartition {
        &self.partition
    }

    pub fn barrier_scale(&self) -> f64 {
        self.barrier_scale
    }

    fn check_inputs(
        &self,
        argument: ArrayView1<f64>,
        lagrange: ArrayView1<f64>,
    ) -> Result<(), BarrierError> {
        if argument.len() != self.partition.len() {
            return Err(BarrierError::LengthMismatch {
                what: "conjugate argument",
                expected: self.partition.len(),
                found: argument.len(),
            });
        }
        if lagrange.len() != self.partition.num_cube() {
            return Err(BarrierError::LengthMismatch {
                what: "cube half-widths",
                expected: self.partition.num_cube(),
                found: lagrange.len(),
            });
        }
        check_lagrange(lagrange)?;
        check_orthant_argument(
            self.partition
                .gather(argument, CoordinateKind::Orthant)
                .view(),
        )
    }

    /// Closed-form value and gradient of the conjugate at `argument`.
    ///
    /// `lagrange` holds one half-width per cube coordinate, in order.
    pub fn evaluate(
        &self,
        argument: ArrayView1<f64>,
        lagrange: ArrayView1<f64>,
    ) -> Result<ConjugatePoint, BarrierError> {
        self.check_inputs(argument, lagrange)?;

        let orthant = functions::orthant_conjugate(
            self.partition
                .gather(argument, CoordinateKind::Orthant)
                .view(),
            self.barrier_scale,
        )?;
        let cube = functions::cube_conjugate(
            self.partition.gather(argument, CoordinateKind::Cube).view(),
            lagrange,
            self.barrier_scale,
        )?;

        let mut orthant_values = orthant.maximizer.iter();
        let mut cube_values = cube.maximizer.iter();
        let maximizer = self
            .partition
            .kinds()
            .iter()
            .map(|&k| match k {
                CoordinateKind::Orthant => orthant_values.next(),
                CoordinateKind::Cube => cube_values.next(),
            })
            .map(|v| v.copied().unwrap_or(f64::NAN))
            .collect();

        Ok(ConjugatePoint {
            maximizer,
            value: orthant.value + cube.value,
        })
    }

    /// The default Newton start: 1 on orthant coordinates, the box center on
    /// cube coordinates.
    pub fn default_initial(&self) -> Array1<f64> {
        self.partition
            .kinds()
            .iter()
            .map(|&k| match k {
                CoordinateKind::Orthant => 1.0,
                CoordinateKind::Cube => 0.0,
            })
            .collect()
    }

    /// Maximizes `a·u - B(u)` by damped Newton.
    ///
    /// Infeasible arguments (an orthant entry `>= 0`, a non-positive
    /// half-width) are rejected before iterating, because the supremum is
    /// infinite or the domain empty. Exhausting `max_iterations` is not an
    /// error; inspect [`ConjugateSolution::status`].
    pub fn solve(
        &self,
        argument: ArrayView1<f64>,
        lagrange: ArrayView1<f64>,
        options: &SolverOptions,
        initial: Option<ArrayView1<f64>>,
    ) -> Result<ConjugateSolution, SolverError> {
        self.check_inputs(argument, lagrange)?;

        let objective = SeparableObjective {
            kinds: self.partition.kinds(),
            argument,
            half_widths: self.partition.expand_lagrange(lagrange),
            scale: self.barrier_scale,
        };
        let start = match initial {
            Some(point) => point.to_owned(),
            None => self.default_initial(),
        };

        let minimum = minimize(&objective, start, options)?;
        Ok(ConjugateSolution::from_minimum(minimum))
    }
}

/// `f(u) = Σ B_i(u_i) - a·u`, the negated conjugate objective.
struct SeparableObjective<'k, 'a> {
    kinds: &'k [CoordinateKind],
    argument: ArrayView1<'a, f64>,
    half_widths: Array1<f64>,
    scale: f64,
}

impl SeparableObjective<'_, '_> {
    fn terms(&self, index: usize, u: f64) -> Option<functions::ScalarTerms> {
        match self.kinds[index] {
            CoordinateKind::Orthant => orthant_terms(u, self.scale),
            CoordinateKind::Cube => cube_terms(u, self.half_widths[index], self.scale),
        }
    }
}

impl BarrierObjective for SeparableObjective<'_, '_> {
    fn dim(&self) -> usize {
        self.kinds.len()
    }

    fn value(&self, point: ArrayView1<f64>) -> f64 {
        let mut total = 0.0;
        for (index, (&u, &a)) in point.iter().zip(self.argument.iter()).enumerate() {
            match self.terms(index, u) {
                Some(terms) => total += terms.value - a * u,
                None => return f64::INFINITY,
            }
        }
        total
    }

    fn newton_step(&self, point: ArrayView1<f64>) -> Array1<f64> {
        point
            .iter()
            .zip(self.argument.iter())
            .enumerate()
            .map(|(index, (&u, &a))| match self.terms(index, u) {
                Some(terms) => (terms.gradient - a) / terms.hessian,
                None => f64::NAN,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn partition_counts_are_a_disjoint_cover() {
        let partition = CoordinatePartition::from_cube_mask(&[false, true, true, false, true]);
        assert_eq!(partition.len(), 5);
        assert_eq!(partition.num_cube(), 3);
        assert_eq!(partition.num_orthant(), 2);

        let fs = CoordinatePartition::single_active(4);
        assert_eq!(fs.kinds()[0], CoordinateKind::Orthant);
        assert_eq!(fs.num_cube(), 4);
    }

    #[test]
    fn newton_matches_the_closed_form() {
        let conjugate =
            BarrierConjugate::new(CoordinatePartition::single_active(3), 1.0).expect("scale");
        let argument = array![-0.8, 0.4, -1.5, 0.0];
        let lagrange = array![1.0, 0.5, 2.0];

        let closed = conjugate
            .evaluate(argument.view(), lagrange.view())
            .expect("closed form");
        let solved = conjugate
            .solve(
                argument.view(),
                lagrange.view(),
                &SolverOptions::conjugate_default(),
                None,
            )
            .expect("newton");

        assert_eq!(solved.status, SolverStatus::Converged);
        assert_relative_eq!(solved.value, closed.value, max_relative = 1e-8, epsilon = 1e-10);
        for (a, b) in solved.maximizer.iter().zip(closed.maximizer.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn non_negative_orthant_argument_is_infeasible() {
        let conjugate =
            BarrierConjugate::new(CoordinatePartition::single_active(1), 1.0).expect("scale");
        let err = conjugate
            .solve(
                array![0.3, 0.1].view(),
                array![1.0].view(),
                &SolverOptions::default(),
                None,
            )
            .unwrap_err();
        assert!(err.is_infeasible());
        assert!(matches!(
            err,
            SolverError::InfeasibleInput(BarrierError::NonNegativeOrthantArgument { index: 0, .. })
        ));
    }

    #[test]
    fn initial_point_outside_the_box_is_rejected() {
        let conjugate =
            BarrierConjugate::new(CoordinatePartition::single_active(1), 1.0).expect("scale");
        let start = array![1.0, 3.0];
        let err = conjugate
            .solve(
                array![-1.0, 0.2].view(),
                array![1.0].view(),
                &SolverOptions::default(),
                Some(start.view()),
            )
            .unwrap_err();
        assert!(matches!(err, SolverError::InfeasibleStart { .. }));
    }

    #[test]
    fn mismatched_half_widths_are_reported() {
        let conjugate =
            BarrierConjugate::new(CoordinatePartition::single_active(2), 1.0).expect("scale");
        let err = conjugate
            .evaluate(array![-1.0, 0.0, 0.0].view(), array![1.0].view())
            .unwrap_err();
        assert_eq!(
            err,
            BarrierError::LengthMismatch {
                what: "cube half-widths",
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn arguments_may_be_borrowed_for_a_shorter_scope_than_the_conjugate() {
        let conjugate =
            BarrierConjugate::new(CoordinatePartition::single_active(1), 1.0).expect("scale");
        let options = SolverOptions::conjugate_default();
        let values: Vec<f64> = [0.5, 1.0, 2.0]
            .iter()
            .map(|&width| {
                let argument = array![-0.7, 0.9];
                let lagrange = array![width];
                conjugate
                    .solve(argument.view(), lagrange.view(), &options, None)
                    .expect("newton")
                    .value
            })
            .collect();
        assert!(values[0] < values[1] && values[1] < values[2]);
    }
}
