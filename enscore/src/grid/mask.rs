//! Exclusion masks over sensitivity fields.
//!
//! A mask is `true` where a cell is excluded from error aggregation. Masks
//! keep the dimensionality of the field they were built from, so the same
//! functions serve a single 2-D field and a stack of sensitivity variables.

use ndarray::{Array, ArrayBase, Data, Dimension, Zip};

use crate::error::ConfigError;
use crate::grid::field::{is_missing, MISSING_VALUE};

/// Mask everything except the cell(s) holding the field's maximum.
///
/// Ties keep every cell at the maximum unmasked. Missing cells never count
/// as the maximum; a field without a single valid cell is masked entirely.
pub fn mask_by_extremum<S, D>(field: &ArrayBase<S, D>) -> Array<bool, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let max = field
        .iter()
        .copied()
        .filter(|v| !is_missing(*v))
        .fold(None, |acc: Option<f64>, v| match acc {
            Some(m) if m >= v => Some(m),
            _ => Some(v),
        });

    match max {
        Some(max) => field.mapv(|v| v != max),
        None => field.mapv(|_| true),
    }
}

/// Mask cells where `value < fraction * value`.
///
/// The comparison is taken literally: for strictly positive fields and a
/// fraction in (0, 1] nothing is masked, negative cells are always masked.
pub fn mask_by_percentile<S, D>(field: &ArrayBase<S, D>, fraction: f64) -> Result<Array<bool, D>, ConfigError>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    validate_fraction(fraction)?;
    Ok(field.mapv(|v| v < fraction * v))
}

pub fn validate_fraction(fraction: f64) -> Result<f64, ConfigError> {
    if fraction > 0.0 && fraction <= 1.0 {
        Ok(fraction)
    } else {
        Err(ConfigError::InvalidFraction(fraction))
    }
}

/// Cells at or above the missing sentinel, regardless of subset method.
pub fn mask_missing<S, D>(field: &ArrayBase<S, D>) -> Array<bool, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    field.mapv(is_missing)
}

/// Logical OR of two masks over the same grid.
pub fn combine<D: Dimension>(method_mask: &Array<bool, D>, missing: &Array<bool, D>) -> Array<bool, D> {
    Zip::from(method_mask)
        .and(missing)
        .map_collect(|a, b| *a || *b)
}

/// Overwrite masked cells with the missing sentinel.
pub fn apply_mask<D: Dimension>(field: &mut Array<f64, D>, mask: &Array<bool, D>) {
    Zip::from(field).and(mask).for_each(|v, m| {
        if *m {
            *v = MISSING_VALUE;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_extremum_keeps_only_maximum() {
        let field = array![[1.0, 2.0], [3.0, 9.0]];
        let mask = mask_by_extremum(&field);
        assert_eq!(mask, array![[true, true], [true, false]]);
    }

    #[test]
    fn test_extremum_ties_stay_unmasked() {
        let field = array![[4.0, 1.0], [4.0, 0.5]];
        let mask = mask_by_extremum(&field);
        assert_eq!(mask, array![[false, true], [false, true]]);
    }

    #[test]
    fn test_extremum_ignores_missing_cells() {
        let field = array![[1.0, MISSING_VALUE], [f64::NAN, 2.0]];
        let mask = mask_by_extremum(&field);
        assert_eq!(mask, array![[true, true], [true, false]]);

        let empty = array![[MISSING_VALUE, f64::NAN]];
        assert!(mask_by_extremum(&empty).iter().all(|m| *m));
    }

    #[test]
    fn test_extremum_spans_all_variables() {
        let mut field = Array3::<f64>::zeros((2, 2, 2));
        field[[1, 0, 1]] = 5.0;
        let mask = mask_by_extremum(&field);
        assert_eq!(mask.iter().filter(|m| !**m).count(), 1);
        assert!(!mask[[1, 0, 1]]);
    }

    #[test]
    fn test_percentile_literal_comparison() {
        // Known-questionable formula: positive cells never satisfy v < f * v.
        let field = array![[1.0, 2.0], [3.0, 9.0]];
        let mask = mask_by_percentile(&field, 0.7).unwrap();
        assert!(mask.iter().all(|m| !*m));

        let mixed = array![[-1.0, 0.0], [2.0, -3.0]];
        let mask = mask_by_percentile(&mixed, 0.7).unwrap();
        assert_eq!(mask, array![[true, false], [false, true]]);
    }

    #[test]
    fn test_percentile_fraction_range() {
        let field = array![[1.0]];
        assert!(mask_by_percentile(&field, 1.0).is_ok());
        assert_eq!(mask_by_percentile(&field, 0.0), Err(ConfigError::InvalidFraction(0.0)));
        assert!(mask_by_percentile(&field, 1.5).is_err());
        assert!(mask_by_percentile(&field, f64::NAN).is_err());
    }

    #[test]
    fn test_total_mask_is_or_of_parts() {
        let field = array![[1.0, MISSING_VALUE], [3.0, 9.0]];
        let method = mask_by_extremum(&field);
        let missing = mask_missing(&field);
        let total = combine(&method, &missing);
        for ((t, m), s) in total.iter().zip(method.iter()).zip(missing.iter()) {
            assert_eq!(*t, *m || *s);
        }
        assert_eq!(total, array![[true, true], [true, false]]);
    }

    #[test]
    fn test_apply_mask_is_idempotent() {
        let mut field = array![[1.0, 2.0], [3.0, 9.0]];
        let mask = mask_by_extremum(&field);
        apply_mask(&mut field, &mask);
        let once = field.clone();
        apply_mask(&mut field, &mask);
        assert_eq!(field, once);
        assert_eq!(mask_missing(&field), mask);
    }
}
