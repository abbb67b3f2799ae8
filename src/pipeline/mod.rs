//! Rating pipeline.
//!
//! Fits every measure group as an independent unit of work, combines the
//! group scores into summary scores and turns those into stars. Group fits
//! either run one after another or fan out over tokio's blocking pool,
//! bounded by a semaphore. A failed group is reported with its name and
//! never aborts its siblings.

use crate::analysis::{measure_weights, summarize, GroupWeights};
use crate::cluster::{assign_clusters, ClusterStrategy};
use crate::dataset::{PreparedGroup, StandardizedData};
use crate::error::{RatingError, Result};
use crate::lvm::{estimate_group, predict_effects, LvmConfig};
use crate::models::{GroupFit, GroupOutcome, GroupScores, SummaryScores};
use futures::future::join_all;
use indicatif::ProgressBar;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Everything needed to rate a standardized dataset.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub lvm: LvmConfig,
    pub strategy: ClusterStrategy,
    /// Number of star labels.
    pub clusters: usize,
    pub weights: GroupWeights,
    /// Maximum groups fitted at the same time.
    pub concurrency: usize,
    /// Fan out over worker threads instead of fitting groups in order.
    pub parallel: bool,
}

/// Result of a full rating run, aligned with the standardized hospital order.
#[derive(Debug, Clone)]
pub struct RatingOutcome {
    pub hospitals: Vec<String>,
    pub outcomes: Vec<GroupOutcome>,
    pub summary: SummaryScores,
    pub stars: Vec<Option<u8>>,
}

impl RatingOutcome {
    /// Group scores in group order; failed groups are all missing.
    pub fn group_scores(&self) -> Vec<GroupScores> {
        self.outcomes
            .iter()
            .map(|o| o.scores_or_missing(self.hospitals.len()))
            .collect()
    }

    pub fn failed_groups(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }
}

/// Fit one group and predict every hospital's ability in it.
pub fn score_group(prepared: &PreparedGroup, config: &LvmConfig) -> Result<GroupFit> {
    let name = &prepared.group.name;
    let weights = measure_weights(name, &prepared.scores, &prepared.denominators)?;
    let (parameters, convergence) =
        estimate_group(&prepared.group, &prepared.scores, &weights, config)?;
    let scores = predict_effects(
        name,
        &parameters,
        &prepared.scores,
        &weights,
        &config.prediction,
    )?;
    Ok(GroupFit {
        parameters,
        convergence,
        scores,
    })
}

fn log_outcome(outcome: &GroupOutcome) {
    match &outcome.result {
        Ok(fit) => debug!(
            "{}: {} hospitals scored",
            outcome.group,
            fit.scores.scores.iter().filter(|s| s.is_some()).count()
        ),
        Err(e) if e.is_input_fault() => {
            warn!("{}: group {}: {}", outcome.group, failure_kind(e), e)
        }
        Err(e) => error!("{}: group {}: {}", outcome.group, failure_kind(e), e),
    }
}

/// Input faults skip a group; anything else means the group's work failed.
fn failure_kind(e: &RatingError) -> &'static str {
    if e.is_input_fault() {
        "skipped"
    } else {
        "failed"
    }
}

/// Fit every group in order on the current thread.
pub fn run_groups_serial(
    data: &StandardizedData,
    config: &LvmConfig,
    progress: Option<&ProgressBar>,
) -> Vec<GroupOutcome> {
    data.groups
        .iter()
        .map(|prepared| {
            let outcome = GroupOutcome {
                group: prepared.group.name.clone(),
                result: score_group(prepared, config),
            };
            log_outcome(&outcome);
            if let Some(pb) = progress {
                pb.inc(1);
            }
            outcome
        })
        .collect()
}

/// Fit every group on tokio's blocking pool, at most `concurrency` at a time.
///
/// Each task owns a copy of its group's data. Outcomes come back in group
/// order; a panicking task becomes a [`RatingError::Worker`] for its group.
pub async fn run_groups_parallel(
    data: &StandardizedData,
    config: &LvmConfig,
    concurrency: usize,
    progress: Option<&ProgressBar>,
) -> Vec<GroupOutcome> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    let tasks = data.groups.iter().cloned().map(|prepared| {
        let semaphore = Arc::clone(&semaphore);
        let config = config.clone();
        let progress = progress.cloned();
        let name = prepared.group.name.clone();

        async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    let handle =
                        tokio::task::spawn_blocking(move || score_group(&prepared, &config));
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(RatingError::Worker(name.clone(), e.to_string())),
                    }
                }
                Err(e) => Err(RatingError::Worker(name.clone(), e.to_string())),
            };
            if let Some(pb) = progress {
                pb.inc(1);
            }
            GroupOutcome {
                group: name,
                result,
            }
        }
    });

    let outcomes = join_all(tasks).await;
    outcomes.iter().for_each(log_outcome);
    outcomes
}

/// Stars for every hospital from its winsorized summary score.
///
/// Hospitals without a summary get no star.
pub fn rate(
    summary: &SummaryScores,
    strategy: &ClusterStrategy,
    clusters: usize,
) -> Result<Vec<Option<u8>>> {
    let (rows, scores): (Vec<usize>, Vec<f64>) = summary
        .winsorized
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.map(|v| (i, v)))
        .unzip();

    let labels = assign_clusters(&scores, strategy, clusters)?;

    let mut stars = vec![None; summary.winsorized.len()];
    for (row, label) in rows.into_iter().zip(labels) {
        stars[row] = Some(label);
    }
    let unrated = stars.iter().filter(|s| s.is_none()).count();
    if unrated > 0 {
        info!("{} hospitals have no summary score and are unrated", unrated);
    }
    Ok(stars)
}

/// Fit all groups, summarize and rate.
pub async fn run_pipeline(
    data: &StandardizedData,
    plan: &RunPlan,
    progress: Option<&ProgressBar>,
) -> Result<RatingOutcome> {
    info!(
        "Rating {} hospitals across {} groups",
        data.n_hospitals(),
        data.groups.len()
    );

    let outcomes = if plan.parallel {
        run_groups_parallel(data, &plan.lvm, plan.concurrency, progress).await
    } else {
        run_groups_serial(data, &plan.lvm, progress)
    };

    let group_scores: Vec<GroupScores> = outcomes
        .iter()
        .map(|o| o.scores_or_missing(data.n_hospitals()))
        .collect();
    let summary = summarize(&group_scores, &plan.weights)?;
    let stars = rate(&summary, &plan.strategy, plan.clusters)?;

    Ok(RatingOutcome {
        hospitals: data.hospitals.clone(),
        outcomes,
        summary,
        stars,
    })
}
