//! # Approximate Grid Inference
//!
//! For every target coordinate `j` the engine lays out a grid of candidate
//! values `g` around the observed target and, at each of them, approximates
//! the log probability of the selection event when the target equals `g`:
//!
//! ```text
//! μ(g)   = mean + target_lin · (g - observed_j)
//! c      = P μ(g)                                  (P = covariance⁻¹)
//! ref(g) = -min_u f_c(u) - c'Σc / 2
//! ```
//!
//! where `f_c` is the polyhedral barrier objective of
//! [`crate::barrier::affine`]. Adding the Gaussian log density of the observed
//! target gives the base log weights of a [`DiscreteFamily`] whose natural
//! parameter is `(θ - observed_j) / var_j`. Pivots, p-values and confidence
//! intervals are read off that family.
//!
//! Grid points are independent, so they are solved in parallel. A failed
//! solve is recorded as NaN and the remaining points are still evaluated.

use crate::barrier::affine::AffineBarrier;
use crate::barrier::optimizer::{SolverError, SolverOptions};
use crate::event::{Alternative, SelectionEvent, TargetStatistic, check_len, check_shape};
use crate::family::{DiscreteFamily, interpolate_linear};
use crate::settings::{InferenceSettings, SettingsError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use ndarray_linalg::Inverse;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bisection steps used to refine an interval endpoint inside its grid bracket.
const MAX_BISECTION_STEPS: usize = 100;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Dimension mismatch for {what}: expected {expected}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(
        "The target is empty. Selective inference is only defined when the selection procedure chose at least one variable."
    )]
    EmptyTarget,

    #[error(
        "The observed optimization state violates constraint row {row} (slack {slack:.6e}); it must lie strictly inside the selection event."
    )]
    InfeasibleOptState { row: usize, slack: f64 },

    #[error("The conditional covariance of the optimization variables could not be inverted: {0}")]
    SingularCovariance(#[source] ndarray_linalg::error::LinalgError),

    #[error("Diagonal entry {index} of the {what} is {value}; variances must be positive and finite.")]
    NonPositiveVariance {
        what: &'static str,
        index: usize,
        value: f64,
    },

    #[error("Confidence level must lie strictly between 0 and 1, got {0}.")]
    InvalidLevel(f64),

    #[error("Unknown alternative '{0}'. Expected one of 'twosided', 'greater', 'less'.")]
    UnknownAlternative(String),

    #[error("Barrier solver failed: {0}")]
    Solver(#[from] SolverError),

    #[error("Invalid inference settings: {0}")]
    Settings(#[from] SettingsError),
}

/// A confidence interval for one target coordinate. A truncated bound is the
/// grid boundary, standing in for a crossing that lies outside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub lower_truncated: bool,
    pub upper_truncated: bool,
}

impl ConfidenceInterval {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

/// One row of the inference summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub target: f64,
    pub pvalue: f64,
    pub lower_confidence: f64,
    pub upper_confidence: f64,
    pub lower_truncated: bool,
    pub upper_truncated: bool,
}

/// Grids, log reference tables and families for every target coordinate.
#[derive(Debug, Clone)]
pub struct GridInference {
    observed: Array1<f64>,
    variances: Array1<f64>,
    alternatives: Vec<Alternative>,
    grids: Vec<Array1<f64>>,
    log_reference: Vec<Array1<f64>>,
    families: Vec<Option<DiscreteFamily>>,
}

impl GridInference {
    /// Evaluates the approximate log reference on every grid point.
    ///
    /// `inverse_info` is the inverse Fisher information of the selective MLE;
    /// only its diagonal is used, to size the grids. Shape mismatches,
    /// an infeasible observed state, and a singular conditional covariance
    /// are fatal. Failures at individual grid points are not.
    pub fn build(
        target: &TargetStatistic,
        inverse_info: ArrayView2<f64>,
        event: &SelectionEvent,
        settings: &InferenceSettings,
    ) -> Result<Self, InferenceError> {
        settings.validate()?;
        let num_targets = target.len();
        if num_targets == 0 {
            return Err(InferenceError::EmptyTarget);
        }
        check_shape(
            "inverse information",
            inverse_info.dim(),
            (num_targets, num_targets),
        )?;
        check_len(
            "log-density transform columns",
            event.logdens_linear().ncols(),
            target.score_dim(),
        )?;

        let std_errors = inverse_info
            .diag()
            .iter()
            .enumerate()
            .map(|(index, &value)| {
                if value > 0.0 && value.is_finite() {
                    Ok(value.sqrt())
                } else {
                    Err(InferenceError::NonPositiveVariance {
                        what: "inverse information",
                        index,
                        value,
                    })
                }
            })
            .collect::<Result<Array1<f64>, _>>()?;

        let precision = event
            .covariance()
            .inv()
            .map_err(InferenceError::SingularCovariance)?;
        let barrier = AffineBarrier::new(
            precision.clone(),
            event.linear_part().to_owned(),
            event.offset().to_owned(),
        )?;

        let max_sd = std_errors.fold(0.0_f64, |acc, &sd| acc.max(sd));
        let num_points = settings.grid.num_points(max_sd);
        log::info!(
            "Building grid inference for {} target(s) with {} grid points each over {} constraint(s).",
            num_targets,
            num_points,
            event.num_constraints()
        );

        let observed = target.observed().to_owned();
        let variances = target.covariance().diag().to_owned();
        let mut grids = Vec::with_capacity(num_targets);
        let mut log_reference = Vec::with_capacity(num_targets);
        let mut families = Vec::with_capacity(num_targets);

        for j in 0..num_targets {
            let half_width = settings.grid.half_width_sds * std_errors[j];
            let grid = Array1::linspace(
                observed[j] - half_width,
                observed[j] + half_width,
                num_points,
            );
            let target_lin = event
                .logdens_linear()
                .dot(&target.score_covariance().row(j))
                .mapv(|v| -v / variances[j]);

            let reference = internal::log_reference(
                &barrier,
                event,
                &precision,
                target_lin.view(),
                observed[j],
                grid.view(),
                &settings.affine,
            );
            let failed = reference.iter().filter(|v| !v.is_finite()).count();
            if failed > 0 {
                log::warn!(
                    "{} of {} grid points for target {} have no log reference value.",
                    failed,
                    num_points,
                    j
                );
            } else {
                log::debug!("Target {}: all {} grid points evaluated.", j, num_points);
            }

            let family = internal::build_family(
                grid.view(),
                reference.view(),
                observed[j],
                variances[j],
                settings.grid.family_points,
            );
            if family.is_none() {
                log::warn!(
                    "Every grid point failed for target {}; its pivots and intervals are NaN.",
                    j
                );
            }

            grids.push(grid);
            log_reference.push(reference);
            families.push(family);
        }

        Ok(Self {
            observed,
            variances,
            alternatives: target.alternatives().to_vec(),
            grids,
            log_reference,
            families,
        })
    }

    pub fn num_targets(&self) -> usize {
        self.observed.len()
    }

    pub fn observed(&self) -> ArrayView1<'_, f64> {
        self.observed.view()
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    /// Candidate values of target `index`, in increasing order.
    pub fn grid(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        self.grids.get(index).map(|g| g.view())
    }

    /// Log reference at each grid value of target `index`; NaN where the
    /// barrier solve failed.
    pub fn log_reference(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        self.log_reference.get(index).map(|r| r.view())
    }

    /// `None` when the index is out of range or every grid point failed.
    pub fn family(&self, index: usize) -> Option<&DiscreteFamily> {
        self.families.get(index).and_then(|f| f.as_ref())
    }

    /// Pivot of every coordinate when the target equals `mean_parameter`.
    pub fn pivots(&self, mean_parameter: ArrayView1<f64>) -> Result<Array1<f64>, InferenceError> {
        check_len("mean parameter", mean_parameter.len(), self.num_targets())?;
        Ok((0..self.num_targets())
            .map(|j| self.pivot_at(j, mean_parameter[j]))
            .collect())
    }

    /// Pivots of target `index` with each of its grid values as the
    /// hypothesized parameter, in grid order.
    pub fn pivot_curve(&self, index: usize) -> Option<Array1<f64>> {
        self.grids
            .get(index)
            .map(|grid| grid.mapv(|theta| self.pivot_at(index, theta)))
    }

    /// P-values for `H0: target_j = null_value`, one per coordinate.
    pub fn p_values(&self, null_value: f64) -> Array1<f64> {
        (0..self.num_targets())
            .map(|j| self.pivot_at(j, null_value))
            .collect()
    }

    /// Equal-tailed confidence intervals at `level`. Coordinates are
    /// inverted in parallel.
    pub fn intervals(&self, level: f64) -> Result<Vec<ConfidenceInterval>, InferenceError> {
        if !(level > 0.0 && level < 1.0) {
            return Err(InferenceError::InvalidLevel(level));
        }
        let alpha = 1.0 - level;
        Ok((0..self.num_targets())
            .into_par_iter()
            .map(|j| self.interval_at(j, alpha))
            .collect())
    }

    /// P-values against zero together with intervals at `level`.
    pub fn summary(&self, level: f64) -> Result<Vec<TargetSummary>, InferenceError> {
        let intervals = self.intervals(level)?;
        let pvalues = self.p_values(0.0);
        Ok(intervals
            .into_iter()
            .zip(pvalues.iter())
            .zip(self.observed.iter())
            .map(|((interval, &pvalue), &target)| TargetSummary {
                target,
                pvalue,
                lower_confidence: interval.lower,
                upper_confidence: interval.upper,
                lower_truncated: interval.lower_truncated,
                upper_truncated: interval.upper_truncated,
            })
            .collect())
    }

    fn natural_parameter(&self, index: usize, theta: f64) -> f64 {
        (theta - self.observed[index]) / self.variances[index]
    }

    fn pivot_at(&self, index: usize, theta: f64) -> f64 {
        match &self.families[index] {
            Some(family) => {
                let (lower, upper) =
                    family.tails(self.natural_parameter(index, theta), self.observed[index]);
                self.alternatives[index].pivot(lower, upper)
            }
            None => f64::NAN,
        }
    }

    fn interval_at(&self, index: usize, alpha: f64) -> ConfidenceInterval {
        let family = match &self.families[index] {
            Some(family) => family,
            None => {
                return ConfidenceInterval {
                    lower: f64::NAN,
                    upper: f64::NAN,
                    lower_truncated: false,
                    upper_truncated: false,
                };
            }
        };
        let observed = self.observed[index];
        let cdf = |theta: f64| family.cdf(self.natural_parameter(index, theta), observed);
        let grid = self.grids[index].view();

        let (lower, lower_truncated) = internal::invert_decreasing(grid, &cdf, 1.0 - 0.5 * alpha);
        let (upper, upper_truncated) = internal::invert_decreasing(grid, &cdf, 0.5 * alpha);
        if lower_truncated {
            log::warn!(
                "Lower confidence bound for target {} did not cross inside the grid; reporting the grid boundary {:.4}.",
                index,
                lower
            );
        }
        if upper_truncated {
            log::warn!(
                "Upper confidence bound for target {} did not cross inside the grid; reporting the grid boundary {:.4}.",
                index,
                upper
            );
        }
        ConfidenceInterval {
            lower,
            upper,
            lower_truncated,
            upper_truncated,
        }
    }
}

mod internal {
    use super::*;

    pub(super) fn log_reference(
        barrier: &AffineBarrier,
        event: &SelectionEvent,
        precision: &Array2<f64>,
        target_lin: ArrayView1<f64>,
        observed: f64,
        grid: ArrayView1<f64>,
        options: &SolverOptions,
    ) -> Array1<f64> {
        let mut reference = Array1::from_elem(grid.len(), f64::NAN);
        Zip::from(&mut reference)
            .and(&grid)
            .par_for_each(|value, &g| {
                let mean = &event.mean() + &(&target_lin * (g - observed));
                let conjugate_arg = precision.dot(&mean);
                match barrier.solve(conjugate_arg.view(), event.observed_opt_state(), options) {
                    // c'Σc = c'μ since c = Pμ.
                    Ok(solution) => *value = -solution.value - 0.5 * conjugate_arg.dot(&mean),
                    Err(err) => {
                        log::debug!("Barrier solve failed at grid value {:.6}: {}", g, err);
                    }
                }
            });
        reference
    }

    /// Base log weights `ref(t) - (t - observed)² / (2 var)` on either the
    /// evaluation grid or a finer support interpolated between finite points.
    pub(super) fn build_family(
        grid: ArrayView1<f64>,
        reference: ArrayView1<f64>,
        observed: f64,
        variance: f64,
        family_points: usize,
    ) -> Option<DiscreteFamily> {
        let (support, log_ref) = if family_points == 0 {
            (grid.to_owned(), reference.to_owned())
        } else {
            let mut finite = grid
                .iter()
                .zip(reference.iter())
                .filter(|&(_, r)| r.is_finite())
                .map(|(&g, _)| g);
            let first = finite.next()?;
            let last = finite.last().unwrap_or(first);
            let support = Array1::linspace(first, last, family_points);
            let log_ref = interpolate_linear(grid, reference, support.view());
            (support, log_ref)
        };
        let log_weights = Zip::from(&support)
            .and(&log_ref)
            .map_collect(|&t, &r| r - (t - observed) * (t - observed) / (2.0 * variance));
        DiscreteFamily::new(support.view(), log_weights.view())
    }

    /// Finds where the decreasing function `f` crosses `level` over the span of
    /// `grid`. Returns the crossing and `false`, or the grid boundary on the
    /// side of the missing crossing and `true`.
    pub(super) fn invert_decreasing<F: Fn(f64) -> f64>(
        grid: ArrayView1<f64>,
        f: &F,
        level: f64,
    ) -> (f64, bool) {
        let (first, last) = match (grid.first(), grid.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return (f64::NAN, true),
        };
        let crossing = grid.iter().position(|&g| f(g) <= level);
        match crossing {
            None => (last, true),
            Some(0) => (first, true),
            Some(i) => {
                let mut lo = grid[i - 1];
                let mut hi = grid[i];
                for _ in 0..MAX_BISECTION_STEPS {
                    let mid = 0.5 * (lo + hi);
                    if f(mid) <= level {
                        hi = mid;
                    } else {
                        lo = mid;
                    }
                    if hi - lo <= 1e-12 * (1.0 + hi.abs()) {
                        break;
                    }
                }
                (0.5 * (lo + hi), false)
            }
        }
    }
}
