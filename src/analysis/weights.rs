//! Measure weights from denominators.
//!
//! A measure's weight for a hospital is its share of the measure's total
//! denominator, scaled by the number of hospitals reporting the measure so
//! that the weights of one measure average to one.

use crate::error::{RatingError, Result};
use crate::models::{MeasureMatrix, WeightMatrix};
use ndarray::Array2;

/// Build the weight matrix aligned with `scores`.
///
/// Weights are missing exactly where scores are missing. A present score
/// with a missing or negative denominator violates the input contract.
pub fn measure_weights(
    context: &str,
    scores: &MeasureMatrix,
    denominators: &MeasureMatrix,
) -> Result<WeightMatrix> {
    if scores.values().dim() != denominators.values().dim() {
        return Err(RatingError::Shape(format!(
            "{}: scores are {:?} but denominators are {:?}",
            context,
            scores.values().dim(),
            denominators.values().dim()
        )));
    }

    let mut weights = Array2::from_elem(scores.values().dim(), None);
    for j in 0..scores.n_measures() {
        let reporting = scores.observed_count(j) as f64;
        let mut total = 0.0;
        for (i, den) in denominators.column(j).iter().enumerate() {
            match den {
                Some(d) if !d.is_finite() || *d < 0.0 => {
                    return Err(RatingError::contract(
                        context,
                        format!("hospital {} measure {} has invalid denominator {}", i, j, d),
                    ))
                }
                Some(d) => total += d,
                None if scores.get(i, j).is_some() => {
                    return Err(RatingError::contract(
                        context,
                        format!("hospital {} measure {} has a score but no denominator", i, j),
                    ))
                }
                None => {}
            }
        }

        if reporting > 0.0 && total <= 0.0 {
            return Err(RatingError::degenerate(
                context,
                format!("measure {} has a zero denominator total", j),
            ));
        }

        for i in 0..scores.n_hospitals() {
            if scores.get(i, j).is_some() {
                weights[[i, j]] = denominators.get(i, j).map(|d| d / total * reporting);
            }
        }
    }

    Ok(MeasureMatrix::from_array(weights))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_weights_average_to_one_per_measure() {
        let scores = MeasureMatrix::from_rows(&[
            vec![Some(0.1), Some(1.0)],
            vec![Some(-0.3), None],
            vec![Some(0.8), Some(-1.0)],
        ])
        .unwrap();
        let dens = MeasureMatrix::from_rows(&[
            vec![Some(100.0), Some(30.0)],
            vec![Some(300.0), None],
            vec![Some(600.0), Some(10.0)],
        ])
        .unwrap();
        let w = measure_weights("g", &scores, &dens).unwrap();

        assert_abs_diff_eq!(w.get(0, 0).unwrap(), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(w.get(2, 0).unwrap(), 1.8, epsilon = 1e-12);
        assert_abs_diff_eq!(w.get(0, 1).unwrap(), 1.5, epsilon = 1e-12);
        assert_eq!(w.get(1, 1), None);
    }

    #[test]
    fn test_score_without_denominator_is_rejected() {
        let scores = MeasureMatrix::from_rows(&[vec![Some(0.1)], vec![Some(0.2)]]).unwrap();
        let dens = MeasureMatrix::from_rows(&[vec![Some(10.0)], vec![None]]).unwrap();
        let err = measure_weights("g", &scores, &dens).unwrap_err();
        assert!(matches!(err, RatingError::ContractViolation { .. }));
    }

    #[test]
    fn test_denominator_without_score_gets_no_weight() {
        let scores = MeasureMatrix::from_rows(&[vec![Some(0.1)], vec![None]]).unwrap();
        let dens = MeasureMatrix::from_rows(&[vec![Some(10.0)], vec![Some(30.0)]]).unwrap();
        let w = measure_weights("g", &scores, &dens).unwrap();
        assert_eq!(w.get(1, 0), None);
        assert_abs_diff_eq!(w.get(0, 0).unwrap(), 0.25, epsilon = 1e-12);
    }
}
