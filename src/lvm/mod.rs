//! Latent variable model for measure groups.
//!
//! This module provides the likelihood kernels, the bounded parameter search, the
//! per-group parameter estimator and the per-hospital ability predictor.

pub mod estimator;
pub mod kernel;
pub mod predictor;
pub mod quadrature;
pub mod search;

pub use estimator::{
    estimate_group, marginal_loglik, validate_inputs, Evaluator, InitialParams, LvmConfig,
    ParamBounds,
};
pub use predictor::{predict_effects, PredictConfig};
pub use search::Bound;
