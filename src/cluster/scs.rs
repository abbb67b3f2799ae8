//! Simple Cluster Seeking.
//!
//! A one-pass seed selection followed by a fixed number of mean-update
//! passes. Given the same input order it always produces the same seeds,
//! matching the FASTCLUS / QUICK CLUSTER procedure of the classic stats
//! packages.
//!
//! Every helper here takes seeds sorted ascending.

/// Closest adjacent pair of `seeds`: `(i - 1, i, seeds[i - 1], seeds[i], gap)`.
///
/// Ties resolve to the first pair. Returns `None` with fewer than two seeds.
pub fn close_inner(seeds: &[f64]) -> Option<(usize, usize, f64, f64, f64)> {
    let i = (1..seeds.len()).min_by(|&a, &b| {
        let gap_a = seeds[a] - seeds[a - 1];
        let gap_b = seeds[b] - seeds[b - 1];
        gap_a.total_cmp(&gap_b)
    })?;
    let (prev, next) = (seeds[i - 1], seeds[i]);
    Some((i - 1, i, prev, next, next - prev))
}

/// Seed nearest to `x`: `(index, value, distance)`.
///
/// An exact midpoint resolves to the lower seed. Returns `None` for no seeds.
pub fn close_outer(seeds: &[f64], x: f64) -> Option<(usize, f64, f64)> {
    let first = *seeds.first()?;
    let last = *seeds.last()?;
    let i = seeds.partition_point(|s| *s <= x);
    if i == seeds.len() {
        return Some((i - 1, last, x - last));
    }
    if i == 0 {
        return Some((0, first, first - x));
    }
    let (next, prev) = (seeds[i], seeds[i - 1]);
    let (d_next, d_prev) = (next - x, x - prev);
    if d_next < d_prev {
        Some((i, next, d_next))
    } else {
        Some((i - 1, prev, d_prev))
    }
}

fn nearest_value(seeds: &[f64], x: f64) -> f64 {
    close_outer(seeds, x).map_or(x, |(_, v, _)| v)
}

fn nearest_distance(seeds: &[f64], x: f64) -> f64 {
    close_outer(seeds, x).map_or(f64::INFINITY, |(_, _, d)| d)
}

fn insert_sorted(seeds: &mut Vec<f64>, x: f64) {
    let at = seeds.partition_point(|s| *s <= x);
    seeds.insert(at, x);
}

/// Phase one: pick `k` well spread seeds, visiting points in input order.
pub fn choose_initial_seeds(data: &[f64], k: usize) -> Vec<f64> {
    let head = k.min(data.len());
    let mut seeds = data[..head].to_vec();
    seeds.sort_by(f64::total_cmp);
    if seeds.len() < 2 {
        return seeds;
    }

    for &x in &data[head..] {
        let (Some((near_idx, near_val, x_dist)), Some((ia, _, va, vb, gap))) =
            (close_outer(&seeds, x), close_inner(&seeds))
        else {
            continue;
        };

        if x_dist > gap {
            // Drop whichever of the closest pair sits more crowded once x joins.
            let mut others = seeds.clone();
            others.drain(ia..ia + 2);
            insert_sorted(&mut others, x);
            let evict = if nearest_distance(&others, va) < nearest_distance(&others, vb) {
                ia
            } else {
                ia + 1
            };
            seeds.remove(evict);
            insert_sorted(&mut seeds, x);
        } else {
            let mut others = seeds.clone();
            if let Some(pos) = others.iter().position(|s| *s == near_val) {
                others.remove(pos);
            }
            if nearest_distance(&others, x) > nearest_distance(&others, near_val) {
                seeds.remove(near_idx);
                insert_sorted(&mut seeds, x);
            }
        }
    }

    seeds
}

/// Cluster one-dimensional `data` into at most `k` groups.
///
/// Returns, for every input point in order, the value of the seed it was
/// finally assigned to. Seeds that attract no points disappear, so fewer
/// than `k` distinct values may come back.
pub fn rapidclus(data: &[f64], k: usize, iterations: usize) -> Vec<f64> {
    let mut seeds = choose_initial_seeds(data, k);

    for _ in 0..iterations {
        // (seed value, running sum, count), in first-assignment order
        let mut clusters: Vec<(f64, f64, usize)> = Vec::with_capacity(seeds.len());
        for &x in data {
            let seed = nearest_value(&seeds, x);
            match clusters.iter_mut().find(|(s, _, _)| *s == seed) {
                Some((_, sum, count)) => {
                    *sum += x;
                    *count += 1;
                }
                None => clusters.push((seed, x, 1)),
            }
        }
        seeds = clusters
            .iter()
            .map(|(_, sum, count)| sum / *count as f64)
            .collect();
        seeds.sort_by(f64::total_cmp);
    }

    data.iter().map(|&x| nearest_value(&seeds, x)).collect()
}

/// Map SCS seed values to ordinal labels `1..`, ascending by seed.
pub fn labels_from_seeds(assigned: &[f64]) -> Vec<u8> {
    let mut centres = assigned.to_vec();
    centres.sort_by(f64::total_cmp);
    centres.dedup();
    assigned
        .iter()
        .map(|v| centres.partition_point(|c| c < v) as u8 + 1)
        .collect()
}
