//! Log-likelihood kernels for the latent variable model.
//!
//! Each hospital has a latent ability `a ~ N(0, 1)` and measure `j` is
//! observed as `N(mu_j + gamma_j * a, err_j)`. Missing cells are stored as
//! zero in both the score and weight matrices, which removes them from every
//! weighted sum below because their weight is exactly zero.

use crate::lvm::quadrature::GaussHermite;
use crate::models::MeasureMatrix;
use ndarray::{Array1, Array2};

/// `ln(2 pi)`.
pub const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Log density of `N(loc, scale)` at `x`.
#[inline]
pub fn norm_logpdf(x: f64, loc: f64, scale: f64) -> f64 {
    let u = (x - loc) / scale;
    -u * u / 2.0 - 0.5 * LN_2PI - scale.ln()
}

/// Log density of the standard normal at `x`.
#[inline]
pub fn std_norm_logpdf(x: f64) -> f64 {
    -x * x / 2.0 - 0.5 * LN_2PI
}

/// `ln Σ_k exp(a_k + ln_b_k)` without overflow.
pub fn log_sum_exp(a: &[f64], ln_b: &[f64]) -> f64 {
    let max = a
        .iter()
        .zip(ln_b)
        .map(|(x, lb)| x + lb)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let total: f64 = a
        .iter()
        .zip(ln_b)
        .map(|(x, lb)| (x + lb - max).exp())
        .sum();
    max + total.ln()
}

/// Weighted log-likelihood of one hospital's scores at a given ability,
/// including the standard normal prior on the ability.
pub fn hospital_loglik(
    alpha: f64,
    mu: &[f64],
    gamma: &[f64],
    err: &[f64],
    z: &[f64],
    w: &[f64],
) -> f64 {
    let mut ll = std_norm_logpdf(alpha);
    for j in 0..z.len() {
        ll += w[j] * norm_logpdf(z[j], mu[j] + gamma[j] * alpha, err[j]);
    }
    ll
}

/// Split a packed `[mu.., gamma.., err..]` vector.
pub fn split_packed(packed: &[f64]) -> (&[f64], &[f64], &[f64]) {
    let m = packed.len() / 3;
    (&packed[..m], &packed[m..2 * m], &packed[2 * m..])
}

/// Per-measure sufficient sums for one hospital.
struct HospitalSums {
    a: f64,
    b: f64,
    c: f64,
    f: f64,
}

/// Zero-filled scores and weights for one measure group.
#[derive(Debug, Clone)]
pub struct DenseGroup {
    pub z: Array2<f64>,
    pub w: Array2<f64>,
}

impl DenseGroup {
    /// Densify a validated (Z, W) pair.
    pub fn new(z: &MeasureMatrix, w: &MeasureMatrix) -> Self {
        Self {
            z: z.zero_filled(),
            w: w.zero_filled(),
        }
    }

    pub fn n_hospitals(&self) -> usize {
        self.z.nrows()
    }

    pub fn n_measures(&self) -> usize {
        self.z.ncols()
    }

    fn sums(&self, i: usize, mu: &[f64], gamma: &[f64], err: &[f64]) -> HospitalSums {
        let mut s = HospitalSums {
            a: 0.0,
            b: 0.0,
            c: 0.0,
            f: 0.0,
        };
        for j in 0..mu.len() {
            let w = self.w[[i, j]];
            let d = self.z[[i, j]] - mu[j];
            let q = w / (err[j] * err[j]);
            s.a += q * gamma[j] * gamma[j];
            s.b += q * d * gamma[j];
            s.c += q * d * d;
            s.f += w * (2.0 * err[j].abs().ln() + LN_2PI);
        }
        s
    }

    /// Closed-form marginal log-likelihood of every hospital.
    ///
    /// With `A = Σ q_j gamma_j^2` (`q_j = w_j / err_j^2`), `B = Σ q_j d_j gamma_j`,
    /// `C = Σ q_j d_j^2` and `F = Σ w_j (2 ln|err_j| + ln 2pi)`:
    /// `ll = (B^2 / (A + 1) - C - F - ln(1 + A)) / 2`.
    pub fn exact_loglik(&self, packed: &[f64]) -> Array1<f64> {
        let (mu, gamma, err) = split_packed(packed);
        Array1::from_shape_fn(self.n_hospitals(), |i| {
            let s = self.sums(i, mu, gamma, err);
            0.5 * (s.b * s.b / (s.a + 1.0) - s.c - s.f - s.a.ln_1p())
        })
    }

    /// Gradient of `-Σ_i ll_i` for the exact evaluator.
    pub fn exact_neg_gradient(&self, packed: &[f64], grad: &mut [f64]) {
        let (mu, gamma, err) = split_packed(packed);
        let m = mu.len();
        grad.iter_mut().for_each(|g| *g = 0.0);

        for i in 0..self.n_hospitals() {
            let s = self.sums(i, mu, gamma, err);
            let a1 = s.a + 1.0;
            let ratio = s.b / a1;
            for j in 0..m {
                let w = self.w[[i, j]];
                if w == 0.0 {
                    continue;
                }
                let d = self.z[[i, j]] - mu[j];
                let q = w / (err[j] * err[j]);
                let resid = d - ratio * gamma[j];

                grad[j] -= q * resid;
                grad[m + j] -= q * (ratio * d - gamma[j] * (ratio * ratio + 1.0 / a1));
                grad[2 * m + j] -=
                    (q * (resid * resid + gamma[j] * gamma[j] / a1) - w) / err[j];
            }
        }
    }

    /// Marginal log-likelihood of every hospital by Gauss–Hermite quadrature.
    pub fn quadrature_loglik(&self, packed: &[f64], rule: &GaussHermite) -> Array1<f64> {
        let (mu, gamma, err) = split_packed(packed);
        let (alphas, ln_b) = rule.standard_normal();
        let mut terms = vec![0.0; alphas.len()];

        Array1::from_shape_fn(self.n_hospitals(), |i| {
            let z = self.z.row(i);
            let w = self.w.row(i);
            for (k, &alpha) in alphas.iter().enumerate() {
                let mut t = std_norm_logpdf(alpha);
                for j in 0..mu.len() {
                    t += w[j] * norm_logpdf(z[j], mu[j] + gamma[j] * alpha, err[j]);
                }
                terms[k] = t;
            }
            log_sum_exp(&terms, &ln_b)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn norm_pdf(x: f64, loc: f64, scale: f64) -> f64 {
        let u = (x - loc) / scale;
        (-u * u / 2.0).exp() / (scale * (2.0 * PI).sqrt())
    }

    fn sample_group() -> DenseGroup {
        let z = MeasureMatrix::from_rows(&[
            vec![Some(0.4), Some(-1.2), None],
            vec![Some(1.5), Some(0.3), Some(0.9)],
            vec![None, Some(-0.2), Some(-2.1)],
            vec![Some(-0.7), None, None],
        ])
        .unwrap();
        let w = MeasureMatrix::from_rows(&[
            vec![Some(1.2), Some(0.8), None],
            vec![Some(0.9), Some(1.1), Some(1.4)],
            vec![None, Some(0.5), Some(0.7)],
            vec![Some(1.0), None, None],
        ])
        .unwrap();
        DenseGroup::new(&z, &w)
    }

    const PARAMS: [f64; 9] = [0.1, -0.2, 0.05, 0.6, 0.4, 0.8, 0.9, 1.1, 0.7];

    #[test]
    fn test_logpdf_matches_density() {
        for &(x, loc, scale) in &[(0.3, -0.1, 0.8), (2.5, 1.0, 2.0), (-4.0, 0.0, 1.0)] {
            assert_abs_diff_eq!(
                norm_logpdf(x, loc, scale),
                norm_pdf(x, loc, scale).ln(),
                epsilon = 1e-12
            );
        }
        assert_abs_diff_eq!(std_norm_logpdf(0.7), norm_logpdf(0.7, 0.0, 1.0), epsilon = 1e-15);
    }

    #[test]
    fn test_log_sum_exp_is_stable() {
        let a = [1000.0, 1000.0];
        let ln_b = [0.0, 0.0];
        assert_abs_diff_eq!(log_sum_exp(&a, &ln_b), 1000.0 + 2f64.ln(), epsilon = 1e-9);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY], &[0.0]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_quadrature_agrees_with_exact() {
        let group = sample_group();
        let rule = GaussHermite::new(30).unwrap();
        let exact = group.exact_loglik(&PARAMS);
        let quad = group.quadrature_loglik(&PARAMS, &rule);
        for (e, q) in exact.iter().zip(quad.iter()) {
            assert_abs_diff_eq!(e, q, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_exact_gradient_matches_finite_difference() {
        let group = sample_group();
        let objective = |p: &[f64]| -group.exact_loglik(p).sum();

        let mut grad = [0.0; 9];
        group.exact_neg_gradient(&PARAMS, &mut grad);

        for k in 0..PARAMS.len() {
            let h = 1e-6;
            let mut up = PARAMS;
            let mut down = PARAMS;
            up[k] += h;
            down[k] -= h;
            let numeric = (objective(&up) - objective(&down)) / (2.0 * h);
            assert_abs_diff_eq!(grad[k], numeric, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_hospital_with_no_data_has_prior_only_likelihood() {
        let group = sample_group();
        let z = [0.0, 0.0, 0.0];
        let w = [0.0, 0.0, 0.0];
        let (mu, gamma, err) = split_packed(&PARAMS);
        assert_abs_diff_eq!(
            hospital_loglik(0.5, mu, gamma, err, &z, &w),
            std_norm_logpdf(0.5),
            epsilon = 1e-15
        );
        // The marginal of an empty row integrates the prior to one.
        let empty = DenseGroup {
            z: Array2::zeros((1, 3)),
            w: Array2::zeros((1, 3)),
        };
        assert_abs_diff_eq!(empty.exact_loglik(&PARAMS)[0], 0.0, epsilon = 1e-15);
        assert_eq!(group.n_measures(), 3);
    }
}
