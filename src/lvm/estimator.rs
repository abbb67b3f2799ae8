//! Maximum likelihood fitting of one measure group.
//!
//! The per-measure parameters `(mu, gamma, err)` are packed as
//! `[mu_1..mu_m, gamma_1..gamma_m, err_1..err_m]` and found by minimizing
//! the negated sum of the hospitals' marginal log-likelihoods.

use crate::error::{RatingError, Result};
use crate::lvm::kernel::DenseGroup;
use crate::lvm::predictor::PredictConfig;
use crate::lvm::quadrature::GaussHermite;
use crate::lvm::search::{central_difference, minimize_bounded, Bound, SearchOptions};
use crate::models::{ConvergenceInfo, LvmParameters, MeasureGroup, MeasureMatrix};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Starting value for every measure's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialParams {
    pub mu: f64,
    pub gamma: f64,
    pub err: f64,
}

impl Default for InitialParams {
    fn default() -> Self {
        Self {
            mu: 0.025,
            gamma: 0.5,
            err: 0.88,
        }
    }
}

/// Bounds per parameter type, replicated across measures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamBounds {
    pub mu: Bound,
    pub gamma: Bound,
    pub err: Bound,
}

impl Default for ParamBounds {
    fn default() -> Self {
        Self {
            mu: Bound::FREE,
            gamma: Bound::FREE,
            err: Bound::lower(1e-3),
        }
    }
}

/// How the marginal likelihood is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Evaluator {
    /// Closed-form integral over the latent ability.
    #[default]
    Exact,
    /// Gauss–Hermite approximation with the given node count.
    Quadrature { nodes: usize },
}

/// Tunables for one group fit. Passed explicitly into every call.
#[derive(Debug, Clone, PartialEq)]
pub struct LvmConfig {
    pub initial: InitialParams,
    pub bounds: ParamBounds,
    /// Gradient norm at which the parameter search stops.
    pub tolerance: f64,
    pub evaluator: Evaluator,
    pub max_iterations: usize,
    pub max_evaluations: usize,
    pub prediction: PredictConfig,
}

impl Default for LvmConfig {
    fn default() -> Self {
        Self {
            initial: InitialParams::default(),
            bounds: ParamBounds::default(),
            tolerance: 1e-15,
            evaluator: Evaluator::Exact,
            max_iterations: 15_000,
            max_evaluations: 15_000,
            prediction: PredictConfig::default(),
        }
    }
}

impl LvmConfig {
    fn search_options(&self) -> SearchOptions {
        SearchOptions {
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
            max_evaluations: self.max_evaluations,
        }
    }

    /// Replicate the per-type initial values across `m` measures.
    pub fn packed_initial(&self, m: usize) -> Vec<f64> {
        pack([self.initial.mu, self.initial.gamma, self.initial.err], m)
    }

    /// Replicate the per-type bounds across `m` measures.
    pub fn packed_bounds(&self, m: usize) -> Vec<Bound> {
        pack([self.bounds.mu, self.bounds.gamma, self.bounds.err], m)
    }
}

fn pack<T: Copy>(per_type: [T; 3], m: usize) -> Vec<T> {
    per_type
        .iter()
        .flat_map(|v| std::iter::repeat(*v).take(m))
        .collect()
}

/// Check the (Z, W) contract before any computation.
///
/// A cell must be missing in both matrices or present in both, present
/// scores must be finite and present weights finite and non-negative.
pub fn check_alignment(context: &str, z: &MeasureMatrix, w: &MeasureMatrix) -> Result<()> {
    if z.values().dim() != w.values().dim() {
        return Err(RatingError::Shape(format!(
            "{}: scores are {:?} but weights are {:?}",
            context,
            z.values().dim(),
            w.values().dim()
        )));
    }

    for ((i, j), zv) in z.values().indexed_iter() {
        match (zv, w.get(i, j)) {
            (Some(score), Some(weight)) => {
                if !score.is_finite() {
                    return Err(RatingError::contract(
                        context,
                        format!("hospital {} measure {} has non-finite score", i, j),
                    ));
                }
                if !weight.is_finite() || weight < 0.0 {
                    return Err(RatingError::contract(
                        context,
                        format!("hospital {} measure {} has invalid weight {}", i, j, weight),
                    ));
                }
            }
            (None, None) => {}
            (Some(_), None) => {
                return Err(RatingError::contract(
                    context,
                    format!("hospital {} measure {} has a score but no weight", i, j),
                ))
            }
            (None, Some(_)) => {
                return Err(RatingError::contract(
                    context,
                    format!("hospital {} measure {} has a weight but no score", i, j),
                ))
            }
        }
    }
    Ok(())
}

/// [`check_alignment`] plus the requirement that the group can be fitted at all.
pub fn validate_inputs(context: &str, z: &MeasureMatrix, w: &MeasureMatrix) -> Result<()> {
    check_alignment(context, z, w)?;
    if z.n_hospitals() == 0 || z.n_measures() == 0 {
        return Err(RatingError::degenerate(
            context,
            format!(
                "{} hospitals and {} measures",
                z.n_hospitals(),
                z.n_measures()
            ),
        ));
    }
    if !w.values().iter().flatten().any(|v| *v > 0.0) {
        return Err(RatingError::degenerate(
            context,
            "no measure carries a positive weight",
        ));
    }
    Ok(())
}

/// Per-hospital marginal log-likelihood at fixed packed parameters.
pub fn marginal_loglik(
    z: &MeasureMatrix,
    w: &MeasureMatrix,
    params: &LvmParameters,
    evaluator: Evaluator,
) -> Result<Array1<f64>> {
    validate_inputs("log-likelihood", z, w)?;
    let data = DenseGroup::new(z, w);
    let packed = params.pack();
    Ok(match evaluator {
        Evaluator::Exact => data.exact_loglik(&packed),
        Evaluator::Quadrature { nodes } => {
            data.quadrature_loglik(&packed, &GaussHermite::new(nodes)?)
        }
    })
}

/// Fit the latent variable model for one measure group.
///
/// Non-convergence is not an error: it is logged and reported in the
/// returned [`ConvergenceInfo`] alongside the best parameters found.
pub fn estimate_group(
    group: &MeasureGroup,
    z: &MeasureMatrix,
    w: &MeasureMatrix,
    config: &LvmConfig,
) -> Result<(LvmParameters, ConvergenceInfo)> {
    let started = Instant::now();
    validate_inputs(&group.name, z, w)?;
    if group.len() != z.n_measures() {
        return Err(RatingError::Shape(format!(
            "{} names {} measures but the matrix has {}",
            group.name,
            group.len(),
            z.n_measures()
        )));
    }

    for j in 0..w.n_measures() {
        let total: f64 = w.column(j).iter().flatten().sum();
        if total <= 0.0 {
            warn!(
                "{}: measure {} has no positive weight; its parameters stay at their initial values",
                group.name, group.measures[j]
            );
        }
    }

    for (name, bound) in [
        ("mu", config.bounds.mu),
        ("gamma", config.bounds.gamma),
        ("err", config.bounds.err),
    ] {
        if !bound.is_valid() {
            return Err(RatingError::Config(format!(
                "{}: invalid {} bounds {:?}",
                group.name, name, bound
            )));
        }
    }

    let m = z.n_measures();
    let data = DenseGroup::new(z, w);
    let x0 = config.packed_initial(m);
    let bounds = config.packed_bounds(m);
    let options = config.search_options();
    debug!(
        "{}: fitting {} measures over {} hospitals ({:?})",
        group.name,
        m,
        z.n_hospitals(),
        config.evaluator
    );

    let searched = match config.evaluator {
        Evaluator::Exact => {
            let objective = |x: &[f64]| {
                let mut grad = vec![0.0; x.len()];
                data.exact_neg_gradient(x, &mut grad);
                (-data.exact_loglik(x).sum(), grad)
            };
            minimize_bounded(objective, &x0, &bounds, &options)
        }
        Evaluator::Quadrature { nodes } => {
            let rule = GaussHermite::new(nodes)?;
            let value = |x: &[f64]| -data.quadrature_loglik(x, &rule).sum();
            let objective = |x: &[f64]| (value(x), central_difference(&value, x));
            minimize_bounded(objective, &x0, &bounds, &options)
        }
    };
    let solution = searched.map_err(|reason| {
        RatingError::degenerate(&group.name, format!("parameter search failed: {}", reason))
    })?;

    let parameters = LvmParameters::from_packed(&group.measures, &solution.x)?;
    let elapsed = started.elapsed();
    let convergence = ConvergenceInfo {
        converged: solution.converged,
        message: solution.message,
        iterations: solution.iterations,
        evaluations: solution.evaluations,
        objective: solution.value,
        elapsed_seconds: elapsed.as_secs_f64(),
    };

    if convergence.converged {
        info!("{}: success - {:.3?}", group.name, elapsed);
    } else {
        warn!(
            "{}: {} after {} iterations ({:.3?})",
            group.name, convergence.message, convergence.iterations, elapsed
        );
    }

    Ok((parameters, convergence))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    /// Draw hospitals exactly from the model with known parameters.
    pub(crate) fn synthetic_group(
        truth: &[(f64, f64, f64)],
        n_hospitals: usize,
        missing_rate: f64,
        seed: u64,
    ) -> (MeasureGroup, MeasureMatrix, MeasureMatrix) {
        let mut rng = StdRng::seed_from_u64(seed);
        let std_normal = Normal::new(0.0, 1.0).unwrap();
        let mut z_rows = Vec::with_capacity(n_hospitals);
        let mut w_rows = Vec::with_capacity(n_hospitals);

        for _ in 0..n_hospitals {
            let alpha: f64 = std_normal.sample(&mut rng);
            let mut z_row = Vec::with_capacity(truth.len());
            let mut w_row = Vec::with_capacity(truth.len());
            for (j, &(mu, gamma, err)) in truth.iter().enumerate() {
                // Keep the first measure for everyone so no row is empty.
                if j > 0 && rng.gen::<f64>() < missing_rate {
                    z_row.push(None);
                    w_row.push(None);
                } else {
                    let noise: f64 = std_normal.sample(&mut rng);
                    z_row.push(Some(mu + gamma * alpha + err * noise));
                    w_row.push(Some(1.0));
                }
            }
            z_rows.push(z_row);
            w_rows.push(w_row);
        }

        let names = (0..truth.len()).map(|j| format!("M{}", j + 1)).collect();
        (
            MeasureGroup::with_suffix("synthetic", names, "_DEN"),
            MeasureMatrix::from_rows(&z_rows).unwrap(),
            MeasureMatrix::from_rows(&w_rows).unwrap(),
        )
    }

    const TRUTH: [(f64, f64, f64); 4] = [
        (0.2, 0.8, 0.5),
        (-0.1, 0.6, 0.7),
        (0.0, 0.9, 0.4),
        (0.3, 0.5, 0.8),
    ];

    #[test]
    fn test_recovers_known_parameters() {
        let (group, z, w) = synthetic_group(&TRUTH, 4000, 0.1, 20240117);
        let (params, info) = estimate_group(&group, &z, &w, &LvmConfig::default()).unwrap();

        assert!(info.objective.is_finite());
        for (fitted, &(mu, gamma, err)) in params.measures().iter().zip(TRUTH.iter()) {
            assert_abs_diff_eq!(fitted.mu, mu, epsilon = 0.08);
            // Gamma is identified up to sign.
            assert_abs_diff_eq!(fitted.gamma.abs(), gamma, epsilon = 0.08);
            assert_abs_diff_eq!(fitted.err, err, epsilon = 0.08);
        }
    }

    #[test]
    fn test_estimation_is_deterministic() {
        let (group, z, w) = synthetic_group(&TRUTH, 300, 0.2, 7);
        let config = LvmConfig::default();
        let first = estimate_group(&group, &z, &w, &config).unwrap();
        let second = estimate_group(&group, &z, &w, &config).unwrap();
        assert_eq!(first.0, second.0);
        assert_eq!(first.1.objective, second.1.objective);
        assert_eq!(first.1.iterations, second.1.iterations);
    }

    #[test]
    fn test_quadrature_fit_is_close_to_exact_fit() {
        let (group, z, w) = synthetic_group(&TRUTH[..2], 200, 0.0, 11);
        let exact = estimate_group(&group, &z, &w, &LvmConfig::default()).unwrap();
        let quad_config = LvmConfig {
            evaluator: Evaluator::Quadrature { nodes: 30 },
            tolerance: 1e-9,
            ..LvmConfig::default()
        };
        let quad = estimate_group(&group, &z, &w, &quad_config).unwrap();
        assert_abs_diff_eq!(exact.1.objective, quad.1.objective, epsilon = 1e-3);
    }

    #[test]
    fn test_evaluators_agree_at_fixed_parameters() {
        let (group, z, w) = synthetic_group(&TRUTH, 50, 0.3, 3);
        let params = LvmParameters::from_packed(
            &group.measures,
            &LvmConfig::default().packed_initial(group.len()),
        )
        .unwrap();
        let exact = marginal_loglik(&z, &w, &params, Evaluator::Exact).unwrap();
        let quad = marginal_loglik(&z, &w, &params, Evaluator::Quadrature { nodes: 30 }).unwrap();
        for (e, q) in exact.iter().zip(quad.iter()) {
            assert_abs_diff_eq!(e, q, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_err_respects_lower_bound() {
        // A measure that is an exact copy of the ability drives err to its bound.
        let rows: Vec<Vec<Option<f64>>> = (0..40)
            .map(|i| {
                let a = (i as f64 - 20.0) / 10.0;
                vec![Some(a), Some(0.5 * a + 0.1 * ((i % 3) as f64 - 1.0))]
            })
            .collect();
        let z = MeasureMatrix::from_rows(&rows).unwrap();
        let w = MeasureMatrix::from_rows(&vec![vec![Some(1.0), Some(1.0)]; 40]).unwrap();
        let group = MeasureGroup::with_suffix("bounded", vec!["A".into(), "B".into()], "_DEN");
        let (params, _) = estimate_group(&group, &z, &w, &LvmConfig::default()).unwrap();
        assert!(params.err().iter().all(|e| *e >= 1e-3));
    }

    #[test]
    fn test_contract_violation_detected() {
        let z = MeasureMatrix::from_rows(&[vec![Some(1.0), None], vec![Some(0.5), Some(0.2)]]).unwrap();
        let w = MeasureMatrix::from_rows(&[vec![Some(1.0), Some(1.0)], vec![Some(1.0), Some(1.0)]]).unwrap();
        let group = MeasureGroup::with_suffix("g", vec!["A".into(), "B".into()], "_DEN");
        let err = estimate_group(&group, &z, &w, &LvmConfig::default()).unwrap_err();
        assert!(matches!(err, RatingError::ContractViolation { .. }));
    }

    #[test]
    fn test_all_zero_weights_is_degenerate() {
        let z = MeasureMatrix::from_rows(&[vec![Some(1.0)], vec![Some(0.5)]]).unwrap();
        let w = MeasureMatrix::from_rows(&[vec![Some(0.0)], vec![Some(0.0)]]).unwrap();
        let group = MeasureGroup::with_suffix("g", vec!["A".into()], "_DEN");
        let err = estimate_group(&group, &z, &w, &LvmConfig::default()).unwrap_err();
        assert!(matches!(err, RatingError::DegenerateInput { .. }));
    }

    #[test]
    fn test_budget_exhaustion_is_not_fatal() {
        let (group, z, w) = synthetic_group(&TRUTH, 100, 0.0, 5);
        let config = LvmConfig {
            max_iterations: 1,
            ..LvmConfig::default()
        };
        let (params, info) = estimate_group(&group, &z, &w, &config).unwrap();
        assert!(!info.converged);
        assert_eq!(params.len(), TRUTH.len());
    }
}
