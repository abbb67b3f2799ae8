//! Random effect prediction: each hospital's latent ability for a group.

use crate::error::{RatingError, Result};
use crate::lvm::estimator::check_alignment;
use crate::lvm::kernel::hospital_loglik;
use crate::lvm::search::{minimize_bounded, Bound, SearchOptions};
use crate::models::{GroupScores, LvmParameters, MeasureMatrix};
use ndarray::ArrayView1;
use rayon::prelude::*;
use tracing::debug;

/// Stopping rules for the per-hospital scalar problem.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictConfig {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 1_000,
        }
    }
}

fn ability_slope(alpha: f64, mu: &[f64], gamma: &[f64], err: &[f64], z: &[f64], w: &[f64]) -> f64 {
    let mut slope = -alpha;
    for j in 0..z.len() {
        let resid = z[j] - mu[j] - gamma[j] * alpha;
        slope += w[j] * gamma[j] * resid / (err[j] * err[j]);
    }
    slope
}

/// Maximize one hospital's posterior log-likelihood over its ability,
/// starting from zero. Missing entries are zeroed before summation.
pub fn predict_hospital(
    mu: &[f64],
    gamma: &[f64],
    err: &[f64],
    z_row: ArrayView1<'_, Option<f64>>,
    w_row: ArrayView1<'_, Option<f64>>,
    config: &PredictConfig,
) -> Result<f64> {
    let z: Vec<f64> = z_row.iter().map(|v| v.unwrap_or(0.0)).collect();
    let w: Vec<f64> = w_row.iter().map(|v| v.unwrap_or(0.0)).collect();
    let objective = |x: &[f64]| {
        let value = -hospital_loglik(x[0], mu, gamma, err, &z, &w);
        (value, vec![-ability_slope(x[0], mu, gamma, err, &z, &w)])
    };
    let options = SearchOptions {
        tolerance: config.tolerance,
        max_iterations: config.max_iterations,
        max_evaluations: usize::MAX,
    };

    let solution = minimize_bounded(objective, &[0.0], &[Bound::FREE], &options)
        .map_err(|reason| RatingError::degenerate("ability", reason))?;
    if !solution.converged {
        debug!("ability search stopped early: {}", solution.message);
    }
    Ok(solution.x[0])
}

/// Predict every hospital's ability for one group, in input row order.
///
/// Hospitals without any measure in the group get a missing score.
pub fn predict_effects(
    group: &str,
    params: &LvmParameters,
    z: &MeasureMatrix,
    w: &MeasureMatrix,
    config: &PredictConfig,
) -> Result<GroupScores> {
    check_alignment(group, z, w)?;
    if params.len() != z.n_measures() {
        return Err(RatingError::Shape(format!(
            "{}: {} fitted measures but {} score columns",
            group,
            params.len(),
            z.n_measures()
        )));
    }
    if let Some(bad) = params.measures().iter().find(|p| !(p.err > 0.0)) {
        return Err(RatingError::contract(
            group,
            format!("measure {} has non-positive err {}", bad.measure, bad.err),
        ));
    }

    let (mu, gamma, err) = (params.mu(), params.gamma(), params.err());
    let scores = (0..z.n_hospitals())
        .into_par_iter()
        .map(|i| {
            z.row_has_data(i)
                .then(|| predict_hospital(&mu, &gamma, &err, z.row(i), w.row(i), config))
                .transpose()
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(GroupScores {
        group: group.to_string(),
        scores,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lvm::estimator::tests::synthetic_group;
    use crate::lvm::estimator::{estimate_group, LvmConfig};
    use crate::models::MeasureParams;
    use approx::assert_abs_diff_eq;

    fn params() -> LvmParameters {
        LvmParameters::new(vec![
            MeasureParams {
                measure: "A".to_string(),
                mu: 0.1,
                gamma: 0.8,
                err: 0.6,
            },
            MeasureParams {
                measure: "B".to_string(),
                mu: -0.2,
                gamma: 0.5,
                err: 0.9,
            },
        ])
    }

    /// The posterior mode has the closed form `B / (A + 1)`.
    fn closed_form(p: &LvmParameters, z: &[Option<f64>], w: &[Option<f64>]) -> f64 {
        let (mut a, mut b) = (0.0, 0.0);
        for (j, m) in p.measures().iter().enumerate() {
            let (zj, wj) = (z[j].unwrap_or(0.0), w[j].unwrap_or(0.0));
            let q = wj / (m.err * m.err);
            a += q * m.gamma * m.gamma;
            b += q * (zj - m.mu) * m.gamma;
        }
        b / (a + 1.0)
    }

    #[test]
    fn test_matches_closed_form_mode() {
        let p = params();
        let rows = vec![
            vec![Some(1.3), Some(0.4)],
            vec![Some(-2.0), None],
            vec![None, Some(0.9)],
        ];
        let weights = vec![
            vec![Some(1.5), Some(0.7)],
            vec![Some(0.4), None],
            vec![None, Some(2.0)],
        ];
        let z = MeasureMatrix::from_rows(&rows).unwrap();
        let w = MeasureMatrix::from_rows(&weights).unwrap();
        let scores = predict_effects("g", &p, &z, &w, &PredictConfig::default()).unwrap();

        for (i, score) in scores.scores.iter().enumerate() {
            let expected = closed_form(&p, &rows[i], &weights[i]);
            assert_abs_diff_eq!(score.unwrap(), expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_empty_row_is_missing() {
        let z = MeasureMatrix::from_rows(&[vec![None, None], vec![Some(0.2), None]]).unwrap();
        let w = MeasureMatrix::from_rows(&[vec![None, None], vec![Some(1.0), None]]).unwrap();
        let scores = predict_effects("g", &params(), &z, &w, &PredictConfig::default()).unwrap();
        assert_eq!(scores.scores[0], None);
        assert!(scores.scores[1].is_some());
    }

    #[test]
    fn test_order_follows_rows_and_tracks_ability() {
        let truth = [(0.0, 0.9, 0.4), (0.1, 0.7, 0.5), (-0.1, 0.8, 0.3)];
        let (group, z, w) = synthetic_group(&truth, 500, 0.0, 99);
        let (fitted, _) = estimate_group(&group, &z, &w, &LvmConfig::default()).unwrap();
        let scores =
            predict_effects(&group.name, &fitted, &z, &w, &PredictConfig::default()).unwrap();
        assert_eq!(scores.scores.len(), 500);

        // Row order is preserved: each score matches a direct single-row solve.
        let (mu, gamma, err) = (fitted.mu(), fitted.gamma(), fitted.err());
        for i in [0, 137, 499] {
            let direct =
                predict_hospital(&mu, &gamma, &err, z.row(i), w.row(i), &PredictConfig::default())
                    .unwrap();
            assert_eq!(scores.scores[i], Some(direct));
        }
    }

    #[test]
    fn test_rejects_misaligned_weights() {
        let z = MeasureMatrix::from_rows(&[vec![Some(0.2), None]]).unwrap();
        let w = MeasureMatrix::from_rows(&[vec![Some(1.0), Some(1.0)]]).unwrap();
        let err = predict_effects("g", &params(), &z, &w, &PredictConfig::default()).unwrap_err();
        assert!(matches!(err, RatingError::ContractViolation { .. }));
    }
}
