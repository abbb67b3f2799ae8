//! Bounded parameter search on top of `wolfe_bfgs`.
//!
//! BFGS runs over unconstrained variables `theta`. Each bounded parameter is
//! mapped into its range: `lo + exp(theta)` with only a lower bound,
//! `hi - exp(theta)` with only an upper bound and
//! `lo + (hi - lo) * sigmoid(theta)` with both. Gradients are carried
//! through the same maps by the chain rule.

use ndarray::Array1;
use std::cell::Cell;
use wolfe_bfgs::{Bfgs, BfgsError};

const FD_STEP: f64 = 1e-7;
/// Smallest distance from a bound when mapping a start value inside it.
const INTERIOR: f64 = 1e-12;

/// Range of one parameter; `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bound {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

fn sigmoid(t: f64) -> f64 {
    1.0 / (1.0 + (-t).exp())
}

impl Bound {
    pub const FREE: Bound = Bound {
        lower: None,
        upper: None,
    };

    pub fn lower(lower: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
        }
    }

    /// Finite bounds with a non-empty interior.
    pub fn is_valid(&self) -> bool {
        let finite = self.lower.map_or(true, f64::is_finite) && self.upper.map_or(true, f64::is_finite);
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) => finite && lo < hi,
            _ => finite,
        }
    }

    /// Parameter value of the free variable `theta`.
    pub fn to_param(&self, theta: f64) -> f64 {
        match (self.lower, self.upper) {
            (None, None) => theta,
            (Some(lo), None) => lo + theta.exp(),
            (None, Some(hi)) => hi - theta.exp(),
            (Some(lo), Some(hi)) => lo + (hi - lo) * sigmoid(theta),
        }
    }

    /// Free variable for the parameter value `x`, pulled strictly inside the range.
    pub fn to_free(&self, x: f64) -> f64 {
        match (self.lower, self.upper) {
            (None, None) => x,
            (Some(lo), None) => (x - lo).max(INTERIOR).ln(),
            (None, Some(hi)) => (hi - x).max(INTERIOR).ln(),
            (Some(lo), Some(hi)) => {
                let p = ((x - lo) / (hi - lo)).clamp(INTERIOR, 1.0 - INTERIOR);
                (p / (1.0 - p)).ln()
            }
        }
    }

    /// `d param / d theta`.
    pub fn jacobian(&self, theta: f64) -> f64 {
        match (self.lower, self.upper) {
            (None, None) => 1.0,
            (Some(_), None) => theta.exp(),
            (None, Some(_)) => -theta.exp(),
            (Some(lo), Some(hi)) => {
                let s = sigmoid(theta);
                (hi - lo) * s * (1.0 - s)
            }
        }
    }
}

/// Central-difference gradient of `f` at `x`.
pub fn central_difference<F>(f: &F, x: &[f64]) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut shifted = x.to_vec();
    (0..x.len())
        .map(|i| {
            let h = FD_STEP * x[i].abs().max(1.0);
            shifted[i] = x[i] + h;
            let up = f(&shifted);
            shifted[i] = x[i] - h;
            let down = f(&shifted);
            shifted[i] = x[i];
            (up - down) / (2.0 * h)
        })
        .collect()
}

/// Stopping rules and budgets for one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Gradient norm at which the search stops.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Objective evaluations allowed before the search is cut off.
    pub max_evaluations: usize,
}

/// Best point found plus diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub x: Vec<f64>,
    pub value: f64,
    pub converged: bool,
    pub message: String,
    pub iterations: usize,
    pub evaluations: usize,
}

/// Minimize `objective` (value and gradient in parameter space) inside `bounds`.
///
/// A failed line search, the iteration cap and the evaluation cap all end
/// the search with the best point so far and `converged == false`. Any other
/// solver failure is returned as its message.
pub fn minimize_bounded<F>(
    objective: F,
    x0: &[f64],
    bounds: &[Bound],
    options: &SearchOptions,
) -> std::result::Result<SearchResult, String>
where
    F: Fn(&[f64]) -> (f64, Vec<f64>),
{
    let evaluations = Cell::new(0usize);
    let exhausted = Cell::new(false);
    let to_params = |theta: &Array1<f64>| -> Vec<f64> {
        theta
            .iter()
            .zip(bounds)
            .map(|(t, b)| b.to_param(*t))
            .collect()
    };

    let cost_and_grad = |theta: &Array1<f64>| -> (f64, Array1<f64>) {
        if evaluations.get() >= options.max_evaluations {
            exhausted.set(true);
            return (f64::INFINITY, Array1::zeros(theta.len()));
        }
        evaluations.set(evaluations.get() + 1);

        let (value, grad) = objective(&to_params(theta));
        let grad_theta: Array1<f64> = grad
            .iter()
            .zip(theta.iter().zip(bounds))
            .map(|(g, (t, b))| {
                let chained = g * b.jacobian(*t);
                if chained.is_finite() {
                    chained
                } else {
                    0.0
                }
            })
            .collect();
        let value = if value.is_finite() { value } else { f64::INFINITY };
        (value, grad_theta)
    };

    let theta0: Array1<f64> = x0.iter().zip(bounds).map(|(x, b)| b.to_free(*x)).collect();
    let mut solver = Bfgs::new(theta0, cost_and_grad)
        .with_tolerance(options.tolerance)
        .with_max_iterations(options.max_iterations);

    let (solution, converged, message) = match solver.run() {
        Ok(solution) => (solution, true, "gradient norm below tolerance".to_string()),
        Err(BfgsError::LineSearchFailed { last_solution, .. }) => {
            let message = if exhausted.get() {
                "evaluation limit reached"
            } else {
                "line search failed; kept the best point found"
            };
            (*last_solution, false, message.to_string())
        }
        Err(BfgsError::MaxIterationsReached { last_solution, .. }) => {
            (*last_solution, false, "iteration limit reached".to_string())
        }
        Err(e) => return Err(format!("{:?}", e)),
    };

    Ok(SearchResult {
        x: to_params(&solution.final_point),
        value: solution.final_value,
        converged,
        message,
        iterations: solution.iterations,
        evaluations: evaluations.get(),
    })
}
