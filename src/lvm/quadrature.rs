//! Gauss–Hermite quadrature rules.
//!
//! Nodes and weights for the physicists' weight function `exp(-x^2)` are
//! found by Newton iteration on the orthonormal Hermite recurrence, starting
//! from the classic asymptotic guesses for each root.

use crate::error::{RatingError, Result};
use std::f64::consts::{PI, SQRT_2};

const NEWTON_TOLERANCE: f64 = 1e-14;
const MAX_NEWTON_STEPS: usize = 100;

/// Gauss–Hermite nodes and weights, nodes sorted ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussHermite {
    pub nodes: Vec<f64>,
    pub weights: Vec<f64>,
}

impl GaussHermite {
    /// Compute an `n`-point rule.
    pub fn new(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(RatingError::Config(
                "quadrature needs at least one node".to_string(),
            ));
        }

        let pim4 = PI.powf(-0.25);
        let nf = n as f64;
        let mut nodes = vec![0.0; n];
        let mut weights = vec![0.0; n];
        let mut z = 0.0_f64;

        for i in 0..(n + 1) / 2 {
            z = match i {
                0 => (2.0 * nf + 1.0).sqrt() - 1.85575 * (2.0 * nf + 1.0).powf(-1.0 / 6.0),
                1 => z - 1.14 * nf.powf(0.426) / z,
                2 => 1.86 * z - 0.86 * nodes[0],
                3 => 1.91 * z - 0.91 * nodes[1],
                _ => 2.0 * z - nodes[i - 2],
            };

            let mut derivative = 0.0;
            for _ in 0..MAX_NEWTON_STEPS {
                let (p1, p2) = hermite_pair(z, n, pim4);
                derivative = (2.0 * nf).sqrt() * p2;
                let previous = z;
                z = previous - p1 / derivative;
                if (z - previous).abs() <= NEWTON_TOLERANCE {
                    break;
                }
            }

            nodes[i] = z;
            nodes[n - 1 - i] = -z;
            weights[i] = 2.0 / (derivative * derivative);
            weights[n - 1 - i] = weights[i];
        }

        nodes.reverse();
        weights.reverse();
        Ok(Self { nodes, weights })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Rescale for integration against the standard normal density.
    ///
    /// Returns `(alpha_k, ln b_k)` with `alpha_k = sqrt(2) x_k` and
    /// `b_k = sqrt(2) exp(x_k^2) w_k`, so that
    /// `∫ g(a) φ(a) da ≈ Σ_k b_k φ(alpha_k) g(alpha_k)`.
    pub fn standard_normal(&self) -> (Vec<f64>, Vec<f64>) {
        let alphas = self.nodes.iter().map(|x| x * SQRT_2).collect();
        let log_b = self
            .nodes
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| x * x + w.ln() + SQRT_2.ln())
            .collect();
        (alphas, log_b)
    }
}

/// Orthonormal Hermite values `(p_n(z), p_{n-1}(z))`.
fn hermite_pair(z: f64, n: usize, pim4: f64) -> (f64, f64) {
    let mut p1 = pim4;
    let mut p2 = 0.0;
    for j in 0..n {
        let p3 = p2;
        p2 = p1;
        let jf = j as f64;
        p1 = z * (2.0 / (jf + 1.0)).sqrt() * p2 - (jf / (jf + 1.0)).sqrt() * p3;
    }
    (p1, p2)
}
