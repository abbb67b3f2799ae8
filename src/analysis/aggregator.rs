//! Group score aggregation and winsorizing.
//!
//! This module combines per-group hospital scores into one weighted summary
//! score per hospital and clips the summary distribution at its extreme
//! percentiles.

use crate::error::{RatingError, Result};
use crate::models::{GroupScores, SummaryScores};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

/// Lower winsorizing percentile for summary scores.
pub const SUMMARY_LOWER_QUANTILE: f64 = 0.005;
/// Upper winsorizing percentile for summary scores.
pub const SUMMARY_UPPER_QUANTILE: f64 = 0.995;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Fixed group weights, in group order. Non-negative and summing to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupWeights {
    entries: Vec<(String, f64)>,
}

impl GroupWeights {
    pub fn new(entries: Vec<(String, f64)>) -> Result<Self> {
        if entries.is_empty() {
            return Err(RatingError::Config("no group weights given".to_string()));
        }
        for (i, (name, weight)) in entries.iter().enumerate() {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(RatingError::Config(format!(
                    "group {} has invalid weight {}",
                    name, weight
                )));
            }
            if entries[..i].iter().any(|(other, _)| other == name) {
                return Err(RatingError::Config(format!(
                    "group {} is weighted twice",
                    name
                )));
            }
        }
        let total: f64 = entries.iter().map(|(_, w)| w).sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(RatingError::Config(format!(
                "group weights sum to {}, expected 1",
                total
            )));
        }
        Ok(Self { entries })
    }

    pub fn get(&self, group: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(name, _)| name == group)
            .map(|(_, w)| *w)
    }

    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }
}

/// Spread the weight of missing groups over the available ones.
///
/// Returns `None` for groups without a score. When no group is available,
/// or all available groups carry zero weight, every entry is `None`.
pub fn redistribute_weights(scores: &[Option<f64>], weights: &[f64]) -> Vec<Option<f64>> {
    let available: f64 = scores
        .iter()
        .zip(weights)
        .filter(|(s, _)| s.is_some())
        .map(|(_, w)| w)
        .sum();
    if available <= 0.0 {
        return vec![None; scores.len()];
    }
    scores
        .iter()
        .zip(weights)
        .map(|(s, w)| s.map(|_| w / available))
        .collect()
}

/// Clip `x` into `[lo, hi]`.
pub fn winsorize(x: f64, lo: f64, hi: f64) -> f64 {
    if x < lo {
        lo
    } else if x > hi {
        hi
    } else {
        x
    }
}

fn sorted_present(values: &[Option<f64>]) -> Vec<f64> {
    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    present.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    present
}

/// Quantile that rounds down to the nearest data value at or below it.
pub fn quantile_lower(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = q * last as f64;
    sorted.get(pos.floor() as usize).copied()
}

/// Quantile that rounds up to the nearest data value at or above it.
pub fn quantile_higher(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = q * last as f64;
    sorted.get((pos.ceil() as usize).min(last)).copied()
}

/// Combine group scores into summary scores and their winsorized variant.
///
/// `group_scores` must all cover the same hospitals in the same order and
/// every group must have a weight.
pub fn summarize(group_scores: &[GroupScores], weights: &GroupWeights) -> Result<SummaryScores> {
    let n = group_scores.first().map_or(0, |g| g.scores.len());
    let mut group_weights = Vec::with_capacity(group_scores.len());
    for g in group_scores {
        if g.scores.len() != n {
            return Err(RatingError::Shape(format!(
                "group {} scores {} hospitals, expected {}",
                g.group,
                g.scores.len(),
                n
            )));
        }
        let weight = weights.get(&g.group).ok_or_else(|| {
            RatingError::contract("summary", format!("group {} has no weight", g.group))
        })?;
        group_weights.push(weight);
    }

    let summary: Vec<Option<f64>> = (0..n)
        .map(|i| {
            let row: Vec<Option<f64>> = group_scores.iter().map(|g| g.scores[i]).collect();
            let shares = redistribute_weights(&row, &group_weights);
            if shares.iter().all(Option::is_none) {
                return None;
            }
            Some(
                row.iter()
                    .zip(&shares)
                    .filter_map(|(s, w)| Some((*s)? * (*w)?))
                    .sum(),
            )
        })
        .collect();

    let sorted = sorted_present(&summary);
    let lower = quantile_lower(&sorted, SUMMARY_LOWER_QUANTILE);
    let upper = quantile_higher(&sorted, SUMMARY_UPPER_QUANTILE);
    let winsorized = match (lower, upper) {
        (Some(lo), Some(hi)) => summary
            .iter()
            .map(|s| s.map(|x| winsorize(x, lo, hi)))
            .collect(),
        _ => summary.clone(),
    };

    debug!(
        "summarized {} hospitals ({} without any group score), bounds {:?}..{:?}",
        n,
        summary.iter().filter(|s| s.is_none()).count(),
        lower,
        upper
    );

    Ok(SummaryScores {
        summary,
        winsorized,
        lower,
        upper,
    })
}
