//! Star assignment by one-dimensional clustering.
//!
//! Two strategies are available: the deterministic Simple Cluster Seeking
//! procedure and randomized centroid clustering. Both hand back ordinal
//! labels `1..=k` that never decrease as the score increases.

pub mod centroid;
pub mod scs;

pub use centroid::{kmeans, CentroidConfig, Partition};
pub use scs::{choose_initial_seeds, close_inner, close_outer, rapidclus};

use crate::error::{RatingError, Result};
use crate::models::StrategyKind;
use tracing::{debug, warn};

/// How scores are partitioned into stars.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterStrategy {
    /// Simple Cluster Seeking with this many refinement passes.
    Scs { iterations: usize },
    Centroid(CentroidConfig),
}

impl Default for ClusterStrategy {
    fn default() -> Self {
        ClusterStrategy::Scs { iterations: 1 }
    }
}

impl ClusterStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            ClusterStrategy::Scs { .. } => StrategyKind::Scs,
            ClusterStrategy::Centroid(_) => StrategyKind::Centroid,
        }
    }
}

fn distinct_count(scores: &[f64]) -> usize {
    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.len()
}

/// Label every score with a cluster in `1..=k`, ascending with the score.
///
/// Fails with [`RatingError::DegenerateInput`] when there are fewer distinct
/// scores than clusters.
pub fn assign_clusters(scores: &[f64], strategy: &ClusterStrategy, k: usize) -> Result<Vec<u8>> {
    if k == 0 || k > u8::MAX as usize {
        return Err(RatingError::Config(format!(
            "cluster count must be between 1 and {}, got {}",
            u8::MAX,
            k
        )));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(RatingError::contract(
            "clustering",
            format!("score {} is not finite", bad),
        ));
    }
    let distinct = distinct_count(scores);
    if distinct < k {
        return Err(RatingError::degenerate(
            "clustering",
            format!("{} distinct scores for {} clusters", distinct, k),
        ));
    }

    let labels = match strategy {
        ClusterStrategy::Scs { iterations } => {
            scs::labels_from_seeds(&rapidclus(scores, k, *iterations))
        }
        ClusterStrategy::Centroid(config) => {
            let partition = kmeans(scores, k, config).ok_or_else(|| {
                RatingError::degenerate("clustering", "no scores to cluster")
            })?;
            centroid::labels_from_partition(&partition)
        }
    };

    let found = labels.iter().copied().max().unwrap_or(0) as usize;
    if found < k {
        warn!(
            "{} produced {} clusters instead of {}",
            strategy.kind(),
            found,
            k
        );
    } else {
        debug!("{} assigned {} scores to {} clusters", strategy.kind(), scores.len(), k);
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread(n: usize) -> Vec<f64> {
        (0..n).map(|i| ((i * 7_919) % 1_013) as f64 / 50.0).collect()
    }

    fn assert_monotone_with_k_labels(scores: &[f64], labels: &[u8], k: usize) {
        let mut pairs: Vec<(f64, u8)> = scores.iter().copied().zip(labels.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert!(pairs.windows(2).all(|w| w[0].1 <= w[1].1));
        let mut distinct = labels.to_vec();
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct, (1..=k as u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_scs_gives_k_monotone_labels() {
        let scores = spread(800);
        let labels = assign_clusters(&scores, &ClusterStrategy::default(), 5).unwrap();
        assert_eq!(labels.len(), scores.len());
        assert_monotone_with_k_labels(&scores, &labels, 5);
    }

    #[test]
    fn test_centroid_gives_k_monotone_labels() {
        let scores = spread(800);
        let strategy = ClusterStrategy::Centroid(CentroidConfig {
            restarts: 20,
            seed: Some(5),
            ..CentroidConfig::default()
        });
        let labels = assign_clusters(&scores, &strategy, 5).unwrap();
        assert_monotone_with_k_labels(&scores, &labels, 5);
    }

    #[test]
    fn test_exactly_k_distinct_values() {
        let scores = [3.0, 1.0, 2.0, 1.0, 3.0];
        let labels = assign_clusters(&scores, &ClusterStrategy::default(), 3).unwrap();
        assert_eq!(labels, vec![3, 1, 2, 1, 3]);
    }

    #[test]
    fn test_too_few_distinct_values_is_degenerate() {
        let scores = [1.0, 1.0, 2.0, 2.0];
        let err = assign_clusters(&scores, &ClusterStrategy::default(), 5).unwrap_err();
        assert!(matches!(err, RatingError::DegenerateInput { .. }));
    }

    #[test]
    fn test_non_finite_score_is_rejected() {
        let err = assign_clusters(&[1.0, f64::NAN], &ClusterStrategy::default(), 1).unwrap_err();
        assert!(matches!(err, RatingError::ContractViolation { .. }));
    }
}
