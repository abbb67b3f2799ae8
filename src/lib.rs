//! CareStars - hospital quality star ratings.
//!
//! Measures are standardized per group, each group is fitted with a one-factor
//! latent variable model, group abilities are combined into a weighted summary
//! score and the summaries are clustered into ordinal star labels.

pub mod analysis;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod dataset;
pub mod error;
pub mod lvm;
pub mod models;
pub mod pipeline;
pub mod report;

pub use error::{RatingError, Result};
