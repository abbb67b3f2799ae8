//! Measure selection and standardization.
//!
//! Turns raw measure columns into z-scores. Measures reported by too few
//! hospitals are dropped, scores without a denominator are discarded,
//! hospitals left with no data are removed, and the z-scores are oriented so
//! that higher is better and clipped at a fixed number of standard deviations.

use crate::analysis::winsorize;
use crate::dataset::Dataset;
use crate::error::{RatingError, Result};
use crate::models::{MeasureGroup, MeasureMatrix};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Preprocessing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Measures reported by this many hospitals or fewer are dropped.
    #[serde(default = "default_min_hospitals")]
    pub min_hospitals: usize,

    /// z-scores are clipped to `[-winsor_limit, winsor_limit]`.
    #[serde(default = "default_winsor_limit")]
    pub winsor_limit: f64,

    /// Measures where a lower raw value is better.
    #[serde(default)]
    pub flipped_measures: Vec<String>,

    /// Suffix naming a measure's denominator column.
    #[serde(default = "default_denominator_suffix")]
    pub denominator_suffix: String,
}

fn default_min_hospitals() -> usize {
    100
}

fn default_winsor_limit() -> f64 {
    3.0
}

fn default_denominator_suffix() -> String {
    "_DEN".to_string()
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            min_hospitals: default_min_hospitals(),
            winsor_limit: default_winsor_limit(),
            flipped_measures: Vec::new(),
            denominator_suffix: default_denominator_suffix(),
        }
    }
}

/// One group's standardized scores and raw denominators.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedGroup {
    /// The group restricted to surviving measures.
    pub group: MeasureGroup,
    pub scores: MeasureMatrix,
    pub denominators: MeasureMatrix,
}

/// Output of [`standardize`], aligned with `hospitals`.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardizedData {
    pub hospitals: Vec<String>,
    pub groups: Vec<PreparedGroup>,
}

impl StandardizedData {
    pub fn n_hospitals(&self) -> usize {
        self.hospitals.len()
    }
}

struct Kept {
    name: String,
    denominator: String,
    values: Vec<Option<f64>>,
    denominators: Vec<Option<f64>>,
}

fn lookup<'a>(dataset: &'a Dataset, group: &str, column: &str) -> Result<&'a [Option<f64>]> {
    dataset.column(column).ok_or_else(|| {
        RatingError::contract(group, format!("column {} is not in the dataset", column))
    })
}

fn z_scores(name: &str, values: &[Option<f64>]) -> Result<Vec<Option<f64>>> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    let n = present.len() as f64;
    if present.len() < 2 {
        return Err(RatingError::degenerate(
            name,
            format!("{} values cannot be standardized", present.len()),
        ));
    }
    let mean = present.iter().sum::<f64>() / n;
    let var = present.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if !(std > 0.0) || !std.is_finite() {
        return Err(RatingError::degenerate(
            name,
            format!("standard deviation is {}", std),
        ));
    }
    Ok(values.iter().map(|v| v.map(|x| (x - mean) / std)).collect())
}

/// Select, clean and standardize the measures of every group.
pub fn standardize(
    dataset: &Dataset,
    groups: &[MeasureGroup],
    config: &PreprocessConfig,
) -> Result<StandardizedData> {
    dataset.check()?;

    // Steps 1-2: drop thin measures, null scores without a denominator.
    let mut kept: Vec<Vec<Kept>> = Vec::with_capacity(groups.len());
    for group in groups {
        if group.denominators.len() != group.measures.len() {
            return Err(RatingError::Config(format!(
                "group {} lists {} measures but {} denominators",
                group.name,
                group.measures.len(),
                group.denominators.len()
            )));
        }
        let mut members = Vec::new();
        for (measure, den_name) in group.measures.iter().zip(&group.denominators) {
            let values = lookup(dataset, &group.name, measure)?;
            let denominators = lookup(dataset, &group.name, den_name)?;
            let count = values.iter().filter(|v| v.is_some()).count();
            if count <= config.min_hospitals {
                info!(
                    "dropped {} (<={} hospitals have data)",
                    measure, config.min_hospitals
                );
                continue;
            }
            let values = values
                .iter()
                .zip(denominators)
                .map(|(v, d)| d.and(*v))
                .collect();
            members.push(Kept {
                name: measure.clone(),
                denominator: den_name.clone(),
                values,
                denominators: denominators.to_vec(),
            });
        }
        if members.is_empty() {
            warn!("{}: no measures left after filtering", group.name);
        }
        kept.push(members);
    }

    // Step 3: drop hospitals with nothing left.
    let rows: Vec<usize> = (0..dataset.n_hospitals())
        .filter(|&i| kept.iter().flatten().any(|m| m.values[i].is_some()))
        .collect();
    let dropped = dataset.n_hospitals() - rows.len();
    if dropped > 0 {
        info!("dropped {} hospitals without measure data", dropped);
    }

    // Steps 4-6: z-score, orient, clip.
    let mut prepared = Vec::with_capacity(groups.len());
    for (group, members) in groups.iter().zip(kept) {
        let mut score_cols = Vec::with_capacity(members.len());
        let mut den_cols = Vec::with_capacity(members.len());
        for member in &members {
            let subset: Vec<Option<f64>> = rows.iter().map(|&i| member.values[i]).collect();
            let sign = if config.flipped_measures.contains(&member.name) {
                -1.0
            } else {
                1.0
            };
            let limit = config.winsor_limit;
            let z = z_scores(&member.name, &subset)?
                .into_iter()
                .map(|v| v.map(|x| winsorize(sign * x, -limit, limit)))
                .collect::<Vec<_>>();
            score_cols.push(z);
            den_cols.push(rows.iter().map(|&i| member.denominators[i]).collect::<Vec<_>>());
        }

        let score_refs: Vec<&[Option<f64>]> = score_cols.iter().map(Vec::as_slice).collect();
        let den_refs: Vec<&[Option<f64>]> = den_cols.iter().map(Vec::as_slice).collect();
        let surviving = MeasureGroup {
            name: group.name.clone(),
            measures: members.iter().map(|m| m.name.clone()).collect(),
            denominators: members.iter().map(|m| m.denominator.clone()).collect(),
        };
        debug!(
            "{}: {} of {} measures kept",
            group.name,
            surviving.len(),
            group.len()
        );
        prepared.push(PreparedGroup {
            group: surviving,
            scores: MeasureMatrix::from_columns(&score_refs, rows.len())?,
            denominators: MeasureMatrix::from_columns(&den_refs, rows.len())?,
        });
    }

    Ok(StandardizedData {
        hospitals: rows.iter().map(|&i| dataset.hospitals[i].clone()).collect(),
        groups: prepared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;
    use approx::assert_abs_diff_eq;

    fn column(name: &str, values: Vec<Option<f64>>) -> Column {
        Column {
            name: name.to_string(),
            values,
        }
    }

    fn config() -> PreprocessConfig {
        PreprocessConfig {
            min_hospitals: 2,
            ..PreprocessConfig::default()
        }
    }

    fn dataset() -> Dataset {
        Dataset {
            hospitals: vec!["a", "b", "c", "d", "e"]
                .into_iter()
                .map(String::from)
                .collect(),
            columns: vec![
                column("M1", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), None]),
                column("M1_DEN", vec![Some(10.0), Some(10.0), None, Some(10.0), None]),
                column("M2", vec![Some(5.0), None, None, None, None]),
                column("M2_DEN", vec![Some(1.0), None, None, None, None]),
                column("M3", vec![Some(0.5), Some(1.5), Some(2.5), Some(3.5), None]),
                column("M3_DEN", vec![Some(1.0), Some(1.0), Some(1.0), Some(1.0), None]),
            ],
        }
    }

    #[test]
    fn test_standardize_drops_and_scales() {
        let groups = vec![MeasureGroup::with_suffix(
            "g",
            vec!["M1".to_string(), "M2".to_string(), "M3".to_string()],
            "_DEN",
        )];
        let out = standardize(&dataset(), &groups, &config()).unwrap();

        // M2 has one hospital; hospital e has no data.
        assert_eq!(out.groups[0].group.measures, vec!["M1", "M3"]);
        assert_eq!(out.groups[0].group.denominators, vec!["M1_DEN", "M3_DEN"]);
        assert_eq!(out.hospitals, vec!["a", "b", "c", "d"]);

        // c lost its score with its denominator; remaining 1, 2, 4.
        let scores = &out.groups[0].scores;
        assert_eq!(scores.get(2, 0), None);
        let mean: f64 = 7.0 / 3.0;
        let std = ((1.0 - mean).powi(2) + (2.0 - mean).powi(2) + (4.0 - mean).powi(2)) / 2.0;
        assert_abs_diff_eq!(scores.get(0, 0).unwrap(), (1.0 - mean) / std.sqrt(), epsilon = 1e-12);
        assert_eq!(out.groups[0].denominators.get(1, 0), Some(10.0));
    }

    #[test]
    fn test_flipped_measure_changes_sign() {
        let groups = vec![MeasureGroup::with_suffix("g", vec!["M1".to_string()], "_DEN")];
        let plain = standardize(&dataset(), &groups, &config()).unwrap();
        let flipped = standardize(
            &dataset(),
            &groups,
            &PreprocessConfig {
                flipped_measures: vec!["M1".to_string()],
                ..config()
            },
        )
        .unwrap();
        let a = plain.groups[0].scores.get(0, 0).unwrap();
        let b = flipped.groups[0].scores.get(0, 0).unwrap();
        assert_abs_diff_eq!(a, -b, epsilon = 1e-12);
    }

    #[test]
    fn test_scores_are_clipped() {
        let mut values: Vec<Option<f64>> = vec![Some(0.0); 40];
        values[0] = Some(1000.0);
        values[1] = Some(1.0);
        let data = Dataset {
            hospitals: (0..40).map(|i| i.to_string()).collect(),
            columns: vec![column("X", values), column("X_DEN", vec![Some(1.0); 40])],
        };
        let groups = vec![MeasureGroup::with_suffix("g", vec!["X".to_string()], "_DEN")];
        let out = standardize(&data, &groups, &config()).unwrap();
        assert_eq!(out.groups[0].scores.get(0, 0), Some(3.0));
    }

    #[test]
    fn test_missing_column_is_rejected() {
        let groups = vec![MeasureGroup::with_suffix("g", vec!["NOPE".to_string()], "_DEN")];
        let err = standardize(&dataset(), &groups, &config()).unwrap_err();
        assert!(matches!(err, RatingError::ContractViolation { .. }));
    }

    #[test]
    fn test_constant_measure_is_degenerate() {
        let data = Dataset {
            hospitals: vec!["a".into(), "b".into(), "c".into()],
            columns: vec![
                column("X", vec![Some(2.0); 3]),
                column("X_DEN", vec![Some(1.0); 3]),
            ],
        };
        let groups = vec![MeasureGroup::with_suffix("g", vec!["X".to_string()], "_DEN")];
        let err = standardize(&data, &groups, &config()).unwrap_err();
        assert!(matches!(err, RatingError::DegenerateInput { .. }));
    }
}
