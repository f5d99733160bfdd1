//! # Barrier Functions and Their Conjugates
//!
//! Closed-form building blocks for the selective-inference optimizers. Two
//! coordinate domains appear in practice:
//!
//! - **Cube** coordinates live in the open box `(-λ, λ)`. They correspond to
//!   the inactive (unselected) part of a penalized fit, whose subgradient is
//!   bounded by the penalty weight. The barrier is
//!   `scale * [-log(1 - u/λ) - log(1 + u/λ)]`.
//! - **Orthant** coordinates live in `(0, ∞)`. They correspond to the active
//!   part, whose sign is fixed by the selection. The barrier is
//!   `log(1 + s/u)`.
//!
//! Every function here is pure and deterministic. Values are `+∞` outside
//! the open domain so line searches can reject infeasible proposals by
//! comparison alone.

use ndarray::{Array1, ArrayView1, Zip};
use thiserror::Error;

/// Orthant conjugate arguments at or above `-ORTHANT_TOLERANCE` are treated as
/// non-negative: the supremum is infinite there.
pub const ORTHANT_TOLERANCE: f64 = 1e-12;

/// Domain errors raised by the closed-form conjugates.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BarrierError {
    #[error(
        "Orthant argument {index} is {value:.6e}; the conjugate is only finite for strictly negative arguments."
    )]
    NonNegativeOrthantArgument { index: usize, value: f64 },

    #[error("Orthant maximizer {index} has a negative discriminant ({discriminant:.6e}).")]
    NegativeDiscriminant { index: usize, discriminant: f64 },

    #[error("Cube half-width {index} is {value:.6e}; half-widths must be positive and finite.")]
    NonPositiveLagrange { index: usize, value: f64 },

    #[error("Barrier scale must be positive and finite, got {0}.")]
    NonPositiveScale(f64),

    #[error("Length mismatch for {what}: expected {expected}, found {found}.")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Value, first and second derivative of a one-dimensional barrier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ScalarTerms {
    pub(crate) value: f64,
    pub(crate) gradient: f64,
    pub(crate) hessian: f64,
}

/// Cube barrier terms for a single coordinate. `None` outside `(-λ, λ)`.
#[inline]
pub(crate) fn cube_terms(u: f64, lagrange: f64, scale: f64) -> Option<ScalarTerms> {
    let ratio = u / lagrange;
    if !(ratio.abs() < 1.0) {
        return None;
    }
    let upper = lagrange - u;
    let lower = lagrange + u;
    Some(ScalarTerms {
        value: -scale * ((-ratio).ln_1p() + ratio.ln_1p()),
        gradient: scale * (1.0 / upper - 1.0 / lower),
        hessian: scale * (1.0 / (upper * upper) + 1.0 / (lower * lower)),
    })
}

/// Orthant barrier terms for a single coordinate. `None` unless `u > 0`.
#[inline]
pub(crate) fn orthant_terms(u: f64, scale: f64) -> Option<ScalarTerms> {
    if !(u > 0.0) {
        return None;
    }
    let shifted = u + scale;
    Some(ScalarTerms {
        value: (scale / u).ln_1p(),
        gradient: -scale / (u * shifted),
        hessian: scale * (2.0 * u + scale) / (u * u * shifted * shifted),
    })
}

/// Cube barrier summed over coordinates, `+∞` outside the open box.
pub fn cube_barrier(argument: ArrayView1<f64>, lagrange: ArrayView1<f64>, scale: f64) -> f64 {
    let mut total = 0.0;
    for (&u, &lam) in argument.iter().zip(lagrange.iter()) {
        match cube_terms(u, lam, scale) {
            Some(terms) => total += terms.value,
            None => return f64::INFINITY,
        }
    }
    total
}

/// Gradient of [`cube_barrier`]. Entries outside the box are NaN.
pub fn cube_gradient(
    argument: ArrayView1<f64>,
    lagrange: ArrayView1<f64>,
    scale: f64,
) -> Array1<f64> {
    Zip::from(&argument)
        .and(&lagrange)
        .map_collect(|&u, &lam| cube_terms(u, lam, scale).map_or(f64::NAN, |t| t.gradient))
}

/// Diagonal of the Hessian of [`cube_barrier`]. The barrier is separable, so
/// the off-diagonal entries vanish.
pub fn cube_hessian(
    argument: ArrayView1<f64>,
    lagrange: ArrayView1<f64>,
    scale: f64,
) -> Array1<f64> {
    Zip::from(&argument)
        .and(&lagrange)
        .map_collect(|&u, &lam| cube_terms(u, lam, scale).map_or(f64::NAN, |t| t.hessian))
}

/// Orthant barrier `Σ log(1 + s/u_i)`, `+∞` unless every coordinate is positive.
pub fn orthant_barrier(argument: ArrayView1<f64>, scale: f64) -> f64 {
    let mut total = 0.0;
    for &u in argument.iter() {
        match orthant_terms(u, scale) {
            Some(terms) => total += terms.value,
            None => return f64::INFINITY,
        }
    }
    total
}

/// Gradient of [`orthant_barrier`].
pub fn orthant_gradient(argument: ArrayView1<f64>, scale: f64) -> Array1<f64> {
    argument.mapv(|u| orthant_terms(u, scale).map_or(f64::NAN, |t| t.gradient))
}

/// Diagonal of the Hessian of [`orthant_barrier`].
pub fn orthant_hessian(argument: ArrayView1<f64>, scale: f64) -> Array1<f64> {
    argument.mapv(|u| orthant_terms(u, scale).map_or(f64::NAN, |t| t.hessian))
}

/// Maximizer and optimal value of a conjugate problem.
#[derive(Debug, Clone, PartialEq)]
pub struct ConjugatePoint {
    /// The point attaining the supremum. This is also the gradient of the
    /// conjugate at the argument.
    pub maximizer: Array1<f64>,
    /// The supremum itself.
    pub value: f64,
}

pub(crate) fn check_scale(scale: f64) -> Result<(), BarrierError> {
    if scale > 0.0 && scale.is_finite() {
        Ok(())
    } else {
        Err(BarrierError::NonPositiveScale(scale))
    }
}

pub(crate) fn check_lagrange(lagrange: ArrayView1<f64>) -> Result<(), BarrierError> {
    for (index, &value) in lagrange.iter().enumerate() {
        if !(value > 0.0 && value.is_finite()) {
            return Err(BarrierError::NonPositiveLagrange { index, value });
        }
    }
    Ok(())
}

pub(crate) fn check_orthant_argument(argument: ArrayView1<f64>) -> Result<(), BarrierError> {
    for (index, &value) in argument.iter().enumerate() {
        if !(value < -ORTHANT_TOLERANCE) {
            return Err(BarrierError::NonNegativeOrthantArgument { index, value });
        }
    }
    Ok(())
}

/// Conjugate of the orthant barrier: `sup_{u>0} u·x - Σ log(1 + s/u)`.
///
/// The stationarity condition `x + s/(u(u+s)) = 0` is the quadratic
/// `u² + s·u + s/x = 0`, whose positive root is `-s/2 + sqrt(s²/4 - s/x)`.
/// The root is evaluated as `(-s/x) / (sqrt(s²/4 - s/x) + s/2)`, which avoids
/// the cancellation of the textbook form for strongly negative arguments.
pub fn orthant_conjugate(
    argument: ArrayView1<f64>,
    scale: f64,
) -> Result<ConjugatePoint, BarrierError> {
    check_scale(scale)?;
    check_orthant_argument(argument)?;

    let mut maximizer = Array1::zeros(argument.len());
    let mut value = 0.0;
    for (index, &x) in argument.iter().enumerate() {
        let discriminant = 0.25 * scale * scale - scale / x;
        if discriminant < 0.0 {
            return Err(BarrierError::NegativeDiscriminant {
                index,
                discriminant,
            });
        }
        let root = (-scale / x) / (discriminant.sqrt() + 0.5 * scale);
        maximizer[index] = root;
        value += root * x - (scale / root).ln_1p();
    }
    Ok(ConjugatePoint { maximizer, value })
}

/// Conjugate of the cube barrier: `sup_{|u|<λ} u·x - cube_barrier(u)`.
///
/// Stationarity gives `x·u² + 2·scale·u - x·λ² = 0`; the root inside the box
/// is `x·λ² / (scale + sqrt(scale² + x²λ²))`, which is also valid at `x = 0`.
pub fn cube_conjugate(
    argument: ArrayView1<f64>,
    lagrange: ArrayView1<f64>,
    scale: f64,
) -> Result<ConjugatePoint, BarrierError> {
    check_scale(scale)?;
    if lagrange.len() != argument.len() {
        return Err(BarrierError::LengthMismatch {
            what: "cube half-widths",
            expected: argument.len(),
            found: lagrange.len(),
        });
    }
    check_lagrange(lagrange)?;

    let mut maximizer = Array1::zeros(argument.len());
    let mut value = 0.0;
    for (index, (&x, &lam)) in argument.iter().zip(lagrange.iter()).enumerate() {
        let root = x * lam * lam / (scale + scale.hypot(x * lam));
        let ratio = root / lam;
        maximizer[index] = root;
        value += root * x + scale * ((-ratio).ln_1p() + ratio.ln_1p());
    }
    Ok(ConjugatePoint { maximizer, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::array;

    fn finite_difference<F: Fn(f64) -> f64>(f: F, x: f64) -> f64 {
        let h = 1e-6;
        (f(x + h) - f(x - h)) / (2.0 * h)
    }

    #[test]
    fn cube_barrier_is_even_and_zero_at_center() {
        let lam = array![1.5, 2.0];
        assert_abs_diff_eq!(cube_barrier(array![0.0, 0.0].view(), lam.view(), 1.0), 0.0);
        let left = cube_barrier(array![-0.7, 1.1].view(), lam.view(), 2.0);
        let right = cube_barrier(array![0.7, -1.1].view(), lam.view(), 2.0);
        assert_relative_eq!(left, right, epsilon = 1e-14);
        assert!(left > 0.0);
    }

    #[test]
    fn cube_barrier_is_infinite_on_and_outside_the_box() {
        let lam = array![1.0];
        assert!(cube_barrier(array![1.0].view(), lam.view(), 1.0).is_infinite());
        assert!(cube_barrier(array![-1.2].view(), lam.view(), 1.0).is_infinite());
        assert!(cube_barrier(array![f64::NAN].view(), lam.view(), 1.0).is_infinite());
    }

    #[test]
    fn cube_derivatives_match_finite_differences() {
        let lam = 1.3;
        let scale = 0.7;
        for &u in &[-1.1, -0.4, 0.0, 0.25, 0.9] {
            let point = array![u];
            let grad = cube_gradient(point.view(), array![lam].view(), scale)[0];
            let hess = cube_hessian(point.view(), array![lam].view(), scale)[0];
            let numeric_grad =
                finite_difference(|x| cube_barrier(array![x].view(), array![lam].view(), scale), u);
            let numeric_hess = finite_difference(
                |x| cube_gradient(array![x].view(), array![lam].view(), scale)[0],
                u,
            );
            assert_relative_eq!(grad, numeric_grad, epsilon = 1e-6, max_relative = 1e-6);
            assert_relative_eq!(hess, numeric_hess, epsilon = 1e-5, max_relative = 1e-5);
        }
    }

    #[test]
    fn orthant_derivatives_match_finite_differences() {
        let scale = 1.7;
        for &u in &[0.05, 0.5, 1.0, 4.0] {
            let grad = orthant_gradient(array![u].view(), scale)[0];
            let hess = orthant_hessian(array![u].view(), scale)[0];
            let numeric_grad = finite_difference(|x| orthant_barrier(array![x].view(), scale), u);
            let numeric_hess =
                finite_difference(|x| orthant_gradient(array![x].view(), scale)[0], u);
            assert_relative_eq!(grad, numeric_grad, max_relative = 1e-5);
            assert_relative_eq!(hess, numeric_hess, max_relative = 1e-5);
        }
        assert!(orthant_barrier(array![1.0, 0.0].view(), scale).is_infinite());
    }

    #[test]
    fn orthant_conjugate_satisfies_stationarity() {
        let scale = 1.0;
        let argument = array![-0.01, -0.5, -3.0, -250.0];
        let conj = orthant_conjugate(argument.view(), scale).expect("finite conjugate");
        for (&x, &u) in argument.iter().zip(conj.maximizer.iter()) {
            assert!(u > 0.0);
            let stationarity = x + scale / (u * (u + scale));
            assert_abs_diff_eq!(stationarity, 0.0, epsilon = 1e-9 * x.abs().max(1.0));
        }
        let expected: f64 = argument
            .iter()
            .zip(conj.maximizer.iter())
            .map(|(&x, &u)| u * x - (1.0 + scale / u).ln())
            .sum();
        assert_relative_eq!(conj.value, expected, max_relative = 1e-12);
    }

    #[test]
    fn orthant_conjugate_rejects_non_negative_arguments() {
        let err = orthant_conjugate(array![-1.0, 0.0].view(), 1.0).unwrap_err();
        assert_eq!(
            err,
            BarrierError::NonNegativeOrthantArgument {
                index: 1,
                value: 0.0
            }
        );
        assert!(matches!(
            orthant_conjugate(array![f64::NAN].view(), 1.0),
            Err(BarrierError::NonNegativeOrthantArgument { index: 0, .. })
        ));
        assert!(matches!(
            orthant_conjugate(array![-1.0].view(), -2.0),
            Err(BarrierError::NonPositiveScale(_))
        ));
    }

    #[test]
    fn cube_conjugate_dominates_every_feasible_point() {
        let lam = array![0.8, 2.0, 1.0];
        let argument = array![3.0, -0.4, 0.0];
        let scale = 1.3;
        let conj = cube_conjugate(argument.view(), lam.view(), scale).expect("conjugate");
        assert_abs_diff_eq!(conj.maximizer[2], 0.0);
        for i in 0..3 {
            assert!(conj.maximizer[i].abs() < lam[i]);
        }
        let steps = 200;
        for k in 1..steps {
            let t = -1.0 + 2.0 * (k as f64) / (steps as f64);
            let candidate = lam.mapv(|l| t * l);
            let objective = candidate.dot(&argument)
                - cube_barrier(candidate.view(), lam.view(), scale);
            assert!(objective <= conj.value + 1e-12);
        }
        let grad = cube_gradient(conj.maximizer.view(), lam.view(), scale);
        for i in 0..3 {
            assert_abs_diff_eq!(grad[i], argument[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn cube_conjugate_validates_half_widths() {
        let result = cube_conjugate(array![1.0, 1.0].view(), array![1.0, -0.5].view(), 1.0);
        assert!(matches!(
            result,
            Err(BarrierError::NonPositiveLagrange { index: 1, .. })
        ));
        let result = cube_conjugate(array![1.0].view(), array![1.0, 2.0].view(), 1.0);
        assert!(matches!(result, Err(BarrierError::LengthMismatch { .. })));
    }
}
