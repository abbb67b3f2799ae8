//! Rating reports.
//!
//! [`build_report`] collects a finished run into a [`Report`]; the
//! generator renders it.

pub mod generator;

pub use generator::*;

use crate::lvm::Evaluator;
use crate::models::{GroupReport, HospitalResult, Report, ReportMetadata};
use crate::pipeline::{RatingOutcome, RunPlan};
use chrono::Utc;

/// Human-readable name of the likelihood evaluator.
pub fn estimator_label(evaluator: &Evaluator) -> String {
    match evaluator {
        Evaluator::Exact => "exact".to_string(),
        Evaluator::Quadrature { nodes } => format!("quadrature ({} nodes)", nodes),
    }
}

/// Assemble the report for one run.
pub fn build_report(
    input: &str,
    outcome: &RatingOutcome,
    plan: &RunPlan,
    duration_seconds: f64,
) -> Report {
    let groups: Vec<GroupReport> = outcome
        .outcomes
        .iter()
        .map(|o| {
            let weight = plan.weights.get(&o.group).unwrap_or(0.0);
            match &o.result {
                Ok(fit) => GroupReport {
                    name: o.group.clone(),
                    weight,
                    parameters: fit.parameters.measures().to_vec(),
                    convergence: Some(fit.convergence.clone()),
                    error: None,
                },
                Err(e) => GroupReport {
                    name: o.group.clone(),
                    weight,
                    parameters: Vec::new(),
                    convergence: None,
                    error: Some(e.to_string()),
                },
            }
        })
        .collect();

    let group_scores = outcome.group_scores();
    let hospitals: Vec<HospitalResult> = outcome
        .hospitals
        .iter()
        .enumerate()
        .map(|(i, id)| HospitalResult {
            id: id.clone(),
            group_scores: group_scores.iter().map(|g| g.scores[i]).collect(),
            summary: outcome.summary.summary[i],
            summary_winsorized: outcome.summary.winsorized[i],
            stars: outcome.stars[i],
        })
        .collect();

    let failed = outcome.failed_groups();
    let metadata = ReportMetadata {
        input: input.to_string(),
        analysis_date: Utc::now(),
        strategy: plan.strategy.kind(),
        estimator: estimator_label(&plan.lvm.evaluator),
        hospitals: hospitals.len(),
        groups_estimated: groups.len() - failed,
        groups_failed: failed,
        duration_seconds,
    };

    Report {
        metadata,
        group_names: groups.iter().map(|g| g.name.clone()).collect(),
        distribution: Report::star_distribution(&hospitals, plan.clusters),
        groups,
        hospitals,
    }
}
