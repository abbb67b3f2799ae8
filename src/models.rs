//! Data models for the rating engine.
//!
//! This module contains the core data structures shared by every stage:
//! measure matrices, fitted model parameters, per-group scores, summary
//! scores and the final report.

use crate::error::{RatingError, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A clinically related bundle of measures scored jointly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureGroup {
    /// Group name, e.g. "mortality".
    pub name: String,
    /// Measure columns, in model order.
    pub measures: Vec<String>,
    /// Denominator column for each measure, aligned with `measures`.
    pub denominators: Vec<String>,
}

impl MeasureGroup {
    /// Build a group whose denominators follow the `<measure><suffix>` naming rule.
    pub fn with_suffix(name: impl Into<String>, measures: Vec<String>, suffix: &str) -> Self {
        let denominators = measures.iter().map(|m| format!("{}{}", m, suffix)).collect();
        Self {
            name: name.into(),
            measures,
            denominators,
        }
    }

    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }
}

/// Hospitals × measures matrix with explicit missing cells.
///
/// Used both for standardized measure scores (Z) and for measure weights (W).
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureMatrix {
    values: Array2<Option<f64>>,
}

/// Weights share the measure matrix representation.
pub type WeightMatrix = MeasureMatrix;

impl MeasureMatrix {
    pub fn from_array(values: Array2<Option<f64>>) -> Self {
        Self { values }
    }

    /// Build from hospital rows. All rows must have the same length.
    pub fn from_rows(rows: &[Vec<Option<f64>>]) -> Result<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_cols) {
            return Err(RatingError::Shape(format!(
                "row {} has {} measures, expected {}",
                i,
                row.len(),
                n_cols
            )));
        }
        let flat: Vec<Option<f64>> = rows.iter().flatten().copied().collect();
        Array2::from_shape_vec((n_rows, n_cols), flat)
            .map(Self::from_array)
            .map_err(|e| RatingError::Shape(e.to_string()))
    }

    /// Build from measure columns, each of length `n_hospitals`.
    pub fn from_columns(columns: &[&[Option<f64>]], n_hospitals: usize) -> Result<Self> {
        let mut values = Array2::from_elem((n_hospitals, columns.len()), None);
        for (j, column) in columns.iter().enumerate() {
            if column.len() != n_hospitals {
                return Err(RatingError::Shape(format!(
                    "column {} has {} hospitals, expected {}",
                    j,
                    column.len(),
                    n_hospitals
                )));
            }
            for (i, v) in column.iter().enumerate() {
                values[[i, j]] = *v;
            }
        }
        Ok(Self { values })
    }

    pub fn n_hospitals(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_measures(&self) -> usize {
        self.values.ncols()
    }

    pub fn get(&self, hospital: usize, measure: usize) -> Option<f64> {
        self.values[[hospital, measure]]
    }

    pub fn values(&self) -> &Array2<Option<f64>> {
        &self.values
    }

    pub fn row(&self, hospital: usize) -> ArrayView1<'_, Option<f64>> {
        self.values.row(hospital)
    }

    pub fn column(&self, measure: usize) -> ArrayView1<'_, Option<f64>> {
        self.values.column(measure)
    }

    /// Dense copy with missing cells replaced by zero.
    pub fn zero_filled(&self) -> Array2<f64> {
        self.values.mapv(|v| v.unwrap_or(0.0))
    }

    /// Number of hospitals with a value for the given measure.
    pub fn observed_count(&self, measure: usize) -> usize {
        self.column(measure).iter().filter(|v| v.is_some()).count()
    }

    /// True when the hospital has at least one value in this matrix.
    pub fn row_has_data(&self, hospital: usize) -> bool {
        self.row(hospital).iter().any(Option::is_some)
    }
}

/// Fitted parameters for one measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureParams {
    pub measure: String,
    pub mu: f64,
    pub gamma: f64,
    pub err: f64,
}

/// Fitted latent variable model parameters for one group. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LvmParameters {
    measures: Vec<MeasureParams>,
}

impl LvmParameters {
    pub fn new(measures: Vec<MeasureParams>) -> Self {
        Self { measures }
    }

    /// Unpack a `[mu.., gamma.., err..]` vector.
    pub fn from_packed(names: &[String], packed: &[f64]) -> Result<Self> {
        let m = names.len();
        if packed.len() != 3 * m {
            return Err(RatingError::Shape(format!(
                "packed parameter vector has length {}, expected {}",
                packed.len(),
                3 * m
            )));
        }
        let measures = names
            .iter()
            .enumerate()
            .map(|(j, name)| MeasureParams {
                measure: name.clone(),
                mu: packed[j],
                gamma: packed[m + j],
                err: packed[2 * m + j],
            })
            .collect();
        Ok(Self { measures })
    }

    /// Pack into `[mu.., gamma.., err..]`.
    pub fn pack(&self) -> Vec<f64> {
        let mut out = self.mu();
        out.extend(self.gamma());
        out.extend(self.err());
        out
    }

    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }

    pub fn measures(&self) -> &[MeasureParams] {
        &self.measures
    }

    pub fn mu(&self) -> Vec<f64> {
        self.measures.iter().map(|p| p.mu).collect()
    }

    pub fn gamma(&self) -> Vec<f64> {
        self.measures.iter().map(|p| p.gamma).collect()
    }

    pub fn err(&self) -> Vec<f64> {
        self.measures.iter().map(|p| p.err).collect()
    }
}

/// Diagnostics returned by every optimizer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceInfo {
    pub converged: bool,
    pub message: String,
    pub iterations: usize,
    pub evaluations: usize,
    /// Final value of the minimized objective.
    pub objective: f64,
    pub elapsed_seconds: f64,
}

/// Latent ability estimates for one group, aligned with the hospital order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupScores {
    pub group: String,
    pub scores: Vec<Option<f64>>,
}

/// Everything produced for one measure group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupFit {
    pub parameters: LvmParameters,
    pub convergence: ConvergenceInfo,
    pub scores: GroupScores,
}

/// Result of one independently scheduled group. Failures stay tagged with
/// their group so siblings remain usable.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub group: String,
    pub result: Result<GroupFit>,
}

impl GroupOutcome {
    /// Scores for the summary stage; a failed group contributes only missing values.
    pub fn scores_or_missing(&self, n_hospitals: usize) -> GroupScores {
        match &self.result {
            Ok(fit) => fit.scores.clone(),
            Err(_) => GroupScores {
                group: self.group.clone(),
                scores: vec![None; n_hospitals],
            },
        }
    }
}

/// Weighted summary of group scores per hospital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryScores {
    pub summary: Vec<Option<f64>>,
    pub winsorized: Vec<Option<f64>>,
    /// Lower winsorizing bound (0.5th percentile, rounded down to a data value).
    pub lower: Option<f64>,
    /// Upper winsorizing bound (99.5th percentile, rounded up to a data value).
    pub upper: Option<f64>,
}

/// Clustering strategy used to turn scores into star labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Simple Cluster Seeking (deterministic).
    Scs,
    /// Iterative centroid clustering with random restarts.
    Centroid,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Scs => write!(f, "Simple Cluster Seeking"),
            StrategyKind::Centroid => write!(f, "Centroid (k-means)"),
        }
    }
}

/// Metadata about a rating run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub input: String,
    pub analysis_date: DateTime<Utc>,
    pub strategy: StrategyKind,
    pub estimator: String,
    pub hospitals: usize,
    pub groups_estimated: usize,
    pub groups_failed: usize,
    pub duration_seconds: f64,
}

/// Per-group section of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupReport {
    pub name: String,
    pub weight: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<MeasureParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convergence: Option<ConvergenceInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One hospital's line in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HospitalResult {
    pub id: String,
    /// Group scores, aligned with [`Report::group_names`].
    pub group_scores: Vec<Option<f64>>,
    pub summary: Option<f64>,
    pub summary_winsorized: Option<f64>,
    pub stars: Option<u8>,
}

/// Complete output of a rating run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub group_names: Vec<String>,
    pub groups: Vec<GroupReport>,
    pub hospitals: Vec<HospitalResult>,
    /// Number of hospitals per star label, index 0 is one star.
    pub distribution: Vec<usize>,
}

impl Report {
    /// Count hospitals per star label for labels `1..=k`.
    pub fn star_distribution(hospitals: &[HospitalResult], k: usize) -> Vec<usize> {
        let mut counts = vec![0; k];
        for stars in hospitals.iter().filter_map(|h| h.stars) {
            if let Some(slot) = (stars as usize).checked_sub(1).and_then(|i| counts.get_mut(i)) {
                *slot += 1;
            }
        }
        counts
    }

    /// Hospitals that received no rating.
    pub fn unrated(&self) -> usize {
        self.hospitals.iter().filter(|h| h.stars.is_none()).count()
    }
}
