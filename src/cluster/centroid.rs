//! Iterative centroid (k-means) clustering of one-dimensional scores.
//!
//! Each restart seeds with k-means++ and runs Lloyd iterations until the
//! centroids move less than the tolerance. Restarts run on the rayon pool and
//! the partition with the lowest within-cluster sum of squares wins.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

/// Settings for centroid clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct CentroidConfig {
    pub restarts: usize,
    /// Convergence threshold on squared centroid movement, relative to the
    /// data variance.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Base seed; restart `r` uses `seed + r`. Drawn from entropy when unset.
    pub seed: Option<u64>,
}

impl Default for CentroidConfig {
    fn default() -> Self {
        Self {
            restarts: 500,
            tolerance: 1e-6,
            max_iterations: 300,
            seed: None,
        }
    }
}

/// A finished partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Cluster centres, one per cluster index.
    pub centroids: Vec<f64>,
    /// Cluster index of every input point.
    pub assignment: Vec<usize>,
    /// Within-cluster sum of squares.
    pub inertia: f64,
    pub iterations: usize,
}

fn nearest(centroids: &[f64], x: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (c, centre) in centroids.iter().enumerate() {
        let d = (x - centre).abs();
        if d < best_dist {
            best = c;
            best_dist = d;
        }
    }
    best
}

fn plus_plus_init(data: &[f64], k: usize, rng: &mut StdRng) -> Vec<f64> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(data[rng.gen_range(0..data.len())]);
    let mut dist: Vec<f64> = data.iter().map(|x| (x - centroids[0]).powi(2)).collect();

    while centroids.len() < k {
        let total: f64 = dist.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut pick = data.len() - 1;
            for (i, d) in dist.iter().enumerate() {
                if target < *d {
                    pick = i;
                    break;
                }
                target -= d;
            }
            pick
        } else {
            rng.gen_range(0..data.len())
        };
        let centre = data[next];
        centroids.push(centre);
        for (d, x) in dist.iter_mut().zip(data) {
            *d = d.min((x - centre).powi(2));
        }
    }
    centroids
}

fn variance(data: &[f64]) -> f64 {
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
}

/// Run one k-means restart. `data` must be non-empty and `k >= 1`.
pub fn lloyd(data: &[f64], k: usize, config: &CentroidConfig, rng: &mut StdRng) -> Partition {
    let threshold = config.tolerance * variance(data);
    let mut centroids = plus_plus_init(data, k, rng);
    let mut assignment = vec![0; data.len()];
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;
        for (slot, x) in assignment.iter_mut().zip(data) {
            *slot = nearest(&centroids, *x);
        }

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (c, x) in assignment.iter().zip(data) {
            sums[*c] += x;
            counts[*c] += 1;
        }

        let mut updated: Vec<f64> = (0..k)
            .map(|c| {
                if counts[c] > 0 {
                    sums[c] / counts[c] as f64
                } else {
                    centroids[c]
                }
            })
            .collect();

        // Empty clusters take over the point farthest from its centre.
        for c in (0..k).filter(|c| counts[*c] == 0) {
            let far = data
                .iter()
                .zip(&assignment)
                .map(|(x, a)| (x - updated[*a]).abs())
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i);
            if let Some(i) = far {
                updated[c] = data[i];
                assignment[i] = c;
            }
        }

        let shift: f64 = centroids
            .iter()
            .zip(&updated)
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        centroids = updated;
        if shift <= threshold {
            break;
        }
    }

    for (slot, x) in assignment.iter_mut().zip(data) {
        *slot = nearest(&centroids, *x);
    }
    let inertia = assignment
        .iter()
        .zip(data)
        .map(|(c, x)| (x - centroids[*c]).powi(2))
        .sum();

    Partition {
        centroids,
        assignment,
        inertia,
        iterations,
    }
}

/// Best of `config.restarts` independent k-means runs.
///
/// Ties on inertia go to the earliest restart, so a fixed seed gives a fixed
/// result regardless of thread scheduling.
pub fn kmeans(data: &[f64], k: usize, config: &CentroidConfig) -> Option<Partition> {
    if data.is_empty() || k == 0 {
        return None;
    }
    let base = config.seed.unwrap_or_else(rand::random);
    let best = (0..config.restarts.max(1))
        .into_par_iter()
        .map(|r| {
            let mut rng = StdRng::seed_from_u64(base.wrapping_add(r as u64));
            (r, lloyd(data, k, config, &mut rng))
        })
        .min_by(|a, b| {
            a.1.inertia
                .total_cmp(&b.1.inertia)
                .then(a.0.cmp(&b.0))
        })?;

    debug!(
        "k-means: restart {} won with inertia {:.6} after {} iterations",
        best.0, best.1.inertia, best.1.iterations
    );
    Some(best.1)
}

/// Ordinal labels `1..` for every point, ascending by centroid value.
///
/// Only centroids that received points are ranked.
pub fn labels_from_partition(partition: &Partition) -> Vec<u8> {
    let mut used: Vec<f64> = partition
        .assignment
        .iter()
        .map(|c| partition.centroids[*c])
        .collect();
    used.sort_by(f64::total_cmp);
    used.dedup();
    partition
        .assignment
        .iter()
        .map(|c| {
            let centre = partition.centroids[*c];
            used.partition_point(|u| *u < centre) as u8 + 1
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn config(seed: u64) -> CentroidConfig {
        CentroidConfig {
            restarts: 50,
            seed: Some(seed),
            ..CentroidConfig::default()
        }
    }

    #[test]
    fn test_separated_groups_are_found() {
        let data = [0.0, 0.1, 0.2, 5.0, 5.1, 5.2, 10.0, 10.1, 10.2];
        let part = kmeans(&data, 3, &config(7)).unwrap();
        let mut centres = part.centroids.clone();
        centres.sort_by(f64::total_cmp);
        assert_abs_diff_eq!(centres[0], 0.1, epsilon = 1e-9);
        assert_abs_diff_eq!(centres[1], 5.1, epsilon = 1e-9);
        assert_abs_diff_eq!(centres[2], 10.1, epsilon = 1e-9);
        assert_eq!(labels_from_partition(&part), vec![1, 1, 1, 2, 2, 2, 3, 3, 3]);
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let data: Vec<f64> = (0..300).map(|i| ((i * 37) % 101) as f64 / 10.0).collect();
        let a = kmeans(&data, 5, &config(11)).unwrap();
        let b = kmeans(&data, 5, &config(11)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_labels_are_monotone() {
        let data: Vec<f64> = (0..400).map(|i| ((i * 53) % 397) as f64 * 0.01).collect();
        let part = kmeans(&data, 5, &config(3)).unwrap();
        let labels = labels_from_partition(&part);
        let mut pairs: Vec<(f64, u8)> = data.iter().copied().zip(labels.clone()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert!(pairs.windows(2).all(|w| w[0].1 <= w[1].1));
        let mut distinct = labels;
        distinct.sort_unstable();
        distinct.dedup();
        assert_eq!(distinct, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_empty_input_has_no_partition() {
        assert!(kmeans(&[], 3, &CentroidConfig::default()).is_none());
    }
}
