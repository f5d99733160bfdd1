//! # Inputs Produced by the Selection Procedure
//!
//! The fitted selection procedure (outside this crate) hands over two things:
//!
//! - a [`TargetStatistic`]: the observed value of the low-dimensional target,
//!   its covariance, and its cross-covariance with the score;
//! - a [`SelectionEvent`]: the Gaussian law of the optimization variables given
//!   the target, and the polyhedron `{o : A o < b}` those variables fell into.
//!
//! Both are validated once here so the grid engine can index freely.

use crate::grid::InferenceError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of the hypothesis test for one target coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alternative {
    TwoSided,
    /// The parameter exceeds the null value.
    Greater,
    /// The parameter is below the null value.
    Less,
}

impl Alternative {
    /// Converts the tail masses `P(T <= obs)` and `P(T > obs)` into a pivot.
    pub fn pivot(self, lower_tail: f64, upper_tail: f64) -> f64 {
        match self {
            Alternative::TwoSided => (2.0 * lower_tail.min(upper_tail)).min(1.0),
            Alternative::Greater => upper_tail,
            Alternative::Less => lower_tail,
        }
    }
}

impl fmt::Display for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Alternative::TwoSided => "twosided",
            Alternative::Greater => "greater",
            Alternative::Less => "less",
        };
        f.write_str(name)
    }
}

impl FromStr for Alternative {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twosided" | "two-sided" | "two_sided" => Ok(Alternative::TwoSided),
            "greater" => Ok(Alternative::Greater),
            "less" => Ok(Alternative::Less),
            _ => Err(InferenceError::UnknownAlternative(s.to_string())),
        }
    }
}

/// Observed target with its covariance structure. Immutable once built.
#[derive(Debug, Clone)]
pub struct TargetStatistic {
    observed: Array1<f64>,
    covariance: Array2<f64>,
    score_covariance: Array2<f64>,
    alternatives: Vec<Alternative>,
}

impl TargetStatistic {
    pub fn new(
        observed: Array1<f64>,
        covariance: Array2<f64>,
        score_covariance: Array2<f64>,
        alternatives: Vec<Alternative>,
    ) -> Result<Self, InferenceError> {
        let k = observed.len();
        if k == 0 {
            return Err(InferenceError::EmptyTarget);
        }
        check_shape("target covariance", covariance.dim(), (k, k))?;
        check_len("target/score covariance rows", score_covariance.nrows(), k)?;
        check_len("alternatives", alternatives.len(), k)?;
        for (index, &value) in covariance.diag().iter().enumerate() {
            if !(value > 0.0 && value.is_finite()) {
                return Err(InferenceError::NonPositiveVariance {
                    what: "target covariance",
                    index,
                    value,
                });
            }
        }
        Ok(Self {
            observed,
            covariance,
            score_covariance,
            alternatives,
        })
    }

    /// A target tested two-sided in every coordinate.
    pub fn two_sided(
        observed: Array1<f64>,
        covariance: Array2<f64>,
        score_covariance: Array2<f64>,
    ) -> Result<Self, InferenceError> {
        let k = observed.len();
        Self::new(
            observed,
            covariance,
            score_covariance,
            vec![Alternative::TwoSided; k],
        )
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn observed(&self) -> ArrayView1<'_, f64> {
        self.observed.view()
    }

    pub fn covariance(&self) -> ArrayView2<'_, f64> {
        self.covariance.view()
    }

    pub fn score_covariance(&self) -> ArrayView2<'_, f64> {
        self.score_covariance.view()
    }

    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    /// Number of score coordinates the target is correlated with.
    pub fn score_dim(&self) -> usize {
        self.score_covariance.ncols()
    }
}

/// The selection event in the space of the optimization variables.
///
/// Conditionally on the target the optimization variables are Gaussian with
/// `mean` and `covariance`; moving the target shifts the mean through
/// `logdens_linear`. The observed optimization state must lie strictly inside
/// `{o : linear_part · o < offset}`.
#[derive(Debug, Clone)]
pub struct SelectionEvent {
    observed_opt_state: Array1<f64>,
    mean: Array1<f64>,
    covariance: Array2<f64>,
    logdens_linear: Array2<f64>,
    linear_part: Array2<f64>,
    offset: Array1<f64>,
}

impl SelectionEvent {
    pub fn new(
        observed_opt_state: Array1<f64>,
        mean: Array1<f64>,
        covariance: Array2<f64>,
        logdens_linear: Array2<f64>,
        linear_part: Array2<f64>,
        offset: Array1<f64>,
    ) -> Result<Self, InferenceError> {
        let q = observed_opt_state.len();
        check_len("conditional mean", mean.len(), q)?;
        check_shape("conditional covariance", covariance.dim(), (q, q))?;
        check_len("log-density transform rows", logdens_linear.nrows(), q)?;
        check_len("constraint matrix columns", linear_part.ncols(), q)?;
        check_len("constraint offset", offset.len(), linear_part.nrows())?;

        let slack = &offset - &linear_part.dot(&observed_opt_state);
        if let Some((row, &value)) = slack.iter().enumerate().find(|&(_, &r)| !(r > 0.0)) {
            return Err(InferenceError::InfeasibleOptState { row, slack: value });
        }

        Ok(Self {
            observed_opt_state,
            mean,
            covariance,
            logdens_linear,
            linear_part,
            offset,
        })
    }

    /// Dimension of the optimization variables.
    pub fn dim(&self) -> usize {
        self.observed_opt_state.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.offset.len()
    }

    pub fn observed_opt_state(&self) -> ArrayView1<'_, f64> {
        self.observed_opt_state.view()
    }

    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    pub fn covariance(&self) -> ArrayView2<'_, f64> {
        self.covariance.view()
    }

    pub fn logdens_linear(&self) -> ArrayView2<'_, f64> {
        self.logdens_linear.view()
    }

    pub fn linear_part(&self) -> ArrayView2<'_, f64> {
        self.linear_part.view()
    }

    pub fn offset(&self) -> ArrayView1<'_, f64> {
        self.offset.view()
    }
}

pub(crate) fn check_len(what: &'static str, found: usize, expected: usize) -> Result<(), InferenceError> {
    if found == expected {
        Ok(())
    } else {
        Err(InferenceError::DimensionMismatch {
            what,
            expected,
            found,
        })
    }
}

pub(crate) fn check_shape(
    what: &'static str,
    found: (usize, usize),
    expected: (usize, usize),
) -> Result<(), InferenceError> {
    check_len(what, found.0, expected.0)?;
    check_len(what, found.1, expected.1)
}
