//! Ensemble subset selection.
//!
//! Members are ranked by their aggregate normalized error against the
//! analysis over the part of the grid the sensitivity field marks as
//! relevant. The lowest-error members form the subset.

use itertools::Itertools;
use ndarray::{s, Array3, Array4, Axis, Zip};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{ConfigError, SelectionError};
use crate::grid::field::MISSING_VALUE;
use crate::grid::mask::{combine, mask_by_extremum, mask_by_percentile, mask_missing, validate_fraction};
use crate::run::method::SubsetMethod;
use crate::run::response::SensitivityVariable;

/// Fields read from the sensitivity, analysis and member-value artifacts.
#[derive(Clone, Debug)]
pub struct SelectionInput {
    /// (sensitivity variable, y, x), every variable the sensitivity code wrote
    pub sensitivity: Array3<f64>,
    /// (variable, y, x), one slice per selected variable
    pub analysis: Array3<f64>,
    /// (variable, member, y, x)
    pub member_values: Array4<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubsetSelection {
    /// 1-based member numbers, lowest aggregate error first.
    pub members: Vec<usize>,
    /// Display names of the variables compared.
    pub variables: Vec<String>,
    /// Aggregate error of every member, indexed by member number - 1.
    pub errors: Vec<f64>,
}

impl SubsetSelection {
    pub fn error_of(&self, member: usize) -> Option<f64> {
        member.checked_sub(1).and_then(|i| self.errors.get(i)).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SubsetSelector {
    ensemble_size: usize,
    subset_size: usize,
    method: SubsetMethod,
}

impl SubsetSelector {
    pub fn new(ensemble_size: usize, subset_size: usize, method: SubsetMethod) -> Result<Self, ConfigError> {
        if ensemble_size == 0 {
            return Err(ConfigError::InvalidEnsembleSize(ensemble_size));
        }
        if subset_size == 0 || subset_size >= ensemble_size {
            return Err(ConfigError::InvalidSubsetSize {
                subset: subset_size,
                ensemble: ensemble_size,
            });
        }
        if let SubsetMethod::Percent { fraction } = method {
            validate_fraction(fraction)?;
        }
        Ok(SubsetSelector {
            ensemble_size,
            subset_size,
            method,
        })
    }

    pub fn ensemble_size(&self) -> usize {
        self.ensemble_size
    }

    pub fn subset_size(&self) -> usize {
        self.subset_size
    }

    pub fn method(&self) -> SubsetMethod {
        self.method
    }

    pub fn select(&self, variables: &[SensitivityVariable], input: &SelectionInput) -> Result<SubsetSelection, SelectionError> {
        if variables.is_empty() {
            return Err(SelectionError::EmptyField("variable selection"));
        }
        if input.sensitivity.is_empty() {
            return Err(SelectionError::EmptyField("sensitivity field"));
        }
        if input.analysis.is_empty() {
            return Err(SelectionError::EmptyField("analysis field"));
        }
        if input.member_values.is_empty() {
            return Err(SelectionError::EmptyField("member values"));
        }

        // Sensitivity slices for the selected variables
        let available = input.sensitivity.len_of(Axis(0));
        let indices: Vec<usize> = variables.iter().map(|v| v.sens_index).collect();
        if let Some(&index) = indices.iter().find(|&&i| i >= available) {
            return Err(SelectionError::VariableIndexOutOfRange { index, available });
        }
        let sens = input.sensitivity.select(Axis(0), &indices);
        self.check_shapes(&sens, input)?;

        let mask = self.exclusion_mask(&sens)?;
        let total_mask = combine(&mask, &mask_missing(&sens));
        debug!(
            masked = total_mask.iter().filter(|m| **m).count(),
            cells = total_mask.len(),
            method = %self.method,
            "built exclusion mask"
        );

        let error = normalized_errors(&input.analysis, &input.member_values, &total_mask);
        log_error_range(&error, &total_mask);

        let weights = match self.method {
            SubsetMethod::Weight => Some(&sens),
            _ => None,
        };
        let errors = aggregate_errors(&error, &total_mask, weights);
        let members = rank_members(&errors, self.subset_size);

        info!(
            members = ?members,
            method = %self.method,
            "selected {} of {} members",
            members.len(),
            self.ensemble_size
        );

        Ok(SubsetSelection {
            members,
            variables: variables.iter().map(|v| v.display_name()).collect(),
            errors,
        })
    }

    fn check_shapes(&self, sens: &Array3<f64>, input: &SelectionInput) -> Result<(), SelectionError> {
        let (nvar, ny, nx) = sens.dim();
        if input.analysis.dim() != (nvar, ny, nx) {
            return Err(SelectionError::ShapeMismatch {
                what: "analysis field".to_string(),
                expected: vec![nvar, ny, nx],
                found: input.analysis.shape().to_vec(),
            });
        }
        let (mvar, members, my, mx) = input.member_values.dim();
        if (mvar, my, mx) != (nvar, ny, nx) {
            return Err(SelectionError::ShapeMismatch {
                what: "member values".to_string(),
                expected: vec![nvar, self.ensemble_size, ny, nx],
                found: input.member_values.shape().to_vec(),
            });
        }
        if members != self.ensemble_size {
            return Err(SelectionError::MemberCountMismatch {
                expected: self.ensemble_size,
                found: members,
            });
        }
        Ok(())
    }

    /// Method-specific exclusion mask over the selected sensitivity slices.
    pub fn exclusion_mask(&self, sens: &Array3<f64>) -> Result<Array3<bool>, ConfigError> {
        match self.method {
            SubsetMethod::Point => Ok(mask_by_extremum(sens)),
            // weighting replaces masking
            SubsetMethod::Weight => Ok(Array3::from_elem(sens.raw_dim(), false)),
            SubsetMethod::Percent { fraction } => mask_by_percentile(sens, fraction),
        }
    }
}

/// `(member - analysis) / analysis` per cell, with masked cells overwritten
/// by the missing sentinel after the division.
pub fn normalized_errors(analysis: &Array3<f64>, member_values: &Array4<f64>, total_mask: &Array3<bool>) -> Array4<f64> {
    let mut error = Array4::<f64>::zeros(member_values.raw_dim());
    for (k, mut var_error) in error.axis_iter_mut(Axis(0)).enumerate() {
        let anl = analysis.index_axis(Axis(0), k);
        let mask = total_mask.index_axis(Axis(0), k);
        for (i, mut member_error) in var_error.axis_iter_mut(Axis(0)).enumerate() {
            let mem = member_values.slice(s![k, i, .., ..]);
            Zip::from(&mut member_error)
                .and(&mem)
                .and(&anl)
                .and(&mask)
                .for_each(|e, &m, &a, &masked| {
                    let q = (m - a) / a;
                    *e = if masked { MISSING_VALUE } else { q };
                });
        }
    }
    error
}

/// Sum of absolute errors per member over all variables and unmasked
/// cells. Cells whose error is not finite (zero analysis) are skipped.
pub fn aggregate_errors(error: &Array4<f64>, total_mask: &Array3<bool>, weights: Option<&Array3<f64>>) -> Vec<f64> {
    let (nvar, members, _, _) = error.dim();
    (0..members)
        .into_par_iter()
        .map(|i| {
            let mut total = 0.0;
            for k in 0..nvar {
                let member_error = error.slice(s![k, i, .., ..]);
                for ((y, x), &e) in member_error.indexed_iter() {
                    if total_mask[[k, y, x]] || !e.is_finite() {
                        continue;
                    }
                    let w = weights.map_or(1.0, |w| w[[k, y, x]]);
                    total += (e * w).abs();
                }
            }
            total
        })
        .collect()
}

/// 1-based numbers of the `subset_size` members with the lowest error.
/// Ties keep ascending member order.
pub fn rank_members(errors: &[f64], subset_size: usize) -> Vec<usize> {
    errors
        .iter()
        .enumerate()
        .sorted_by_key(|(i, e)| (OrderedFloat(**e), *i))
        .take(subset_size)
        .map(|(i, _)| i + 1)
        .collect()
}

fn log_error_range(error: &Array4<f64>, total_mask: &Array3<bool>) {
    let mut degenerate = 0usize;
    let mut range: Option<(f64, f64)> = None;
    for ((k, _, y, x), &e) in error.indexed_iter() {
        if total_mask[[k, y, x]] {
            continue;
        }
        if !e.is_finite() {
            degenerate += 1;
            continue;
        }
        range = Some(match range {
            Some((lo, hi)) => (lo.min(e), hi.max(e)),
            None => (e, e),
        });
    }
    if let Some((lo, hi)) = range {
        debug!(min = lo, max = hi, "normalized error range");
    }
    if degenerate > 0 {
        debug!(cells = degenerate, "skipped non-finite normalized errors");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::response::GPH_500;
    use ndarray::Array;

    /// 4 members on a 2x2 grid against an analysis of 100 everywhere, member
    /// offsets chosen so the aggregate errors are 0.3, 0.1, 0.5 and 0.2.
    fn input() -> SelectionInput {
        let mut sensitivity = Array3::<f64>::zeros((2, 2, 2));
        sensitivity
            .index_axis_mut(Axis(0), 1)
            .assign(&ndarray::array![[1.0, 2.0], [3.0, 9.0]]);
        let analysis = Array3::from_elem((1, 2, 2), 100.0);
        let offsets = [7.5, 2.5, 12.5, 5.0];
        let mut member_values = Array4::<f64>::zeros((1, 4, 2, 2));
        for (i, o) in offsets.iter().enumerate() {
            member_values.slice_mut(s![0, i, .., ..]).fill(100.0 + o);
        }
        SelectionInput {
            sensitivity,
            analysis,
            member_values,
        }
    }

    #[test]
    fn test_rank_members_by_error() {
        assert_eq!(rank_members(&[0.3, 0.1, 0.5, 0.2], 2), vec![2, 4]);
    }

    #[test]
    fn test_rank_members_stable_ties() {
        assert_eq!(rank_members(&[0.2, 0.1, 0.2, 0.1], 3), vec![2, 4, 1]);
        assert_eq!(rank_members(&[f64::NAN, 0.5, 0.4], 2), vec![3, 2]);
    }

    #[test]
    fn test_percent_selection() {
        let selector = SubsetSelector::new(4, 2, SubsetMethod::default()).unwrap();
        let selection = selector.select(&[GPH_500], &input()).unwrap();
        assert_eq!(selection.members, vec![2, 4]);
        assert_eq!(selection.variables, vec!["500 hPa GPH".to_string()]);
        assert!((selection.error_of(1).unwrap() - 0.3).abs() < 1e-9);
        assert!((selection.error_of(3).unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(selection.error_of(0), None);
    }

    #[test]
    fn test_point_selection_uses_single_cell() {
        let mut input = input();
        // member 3 is perfect at the maximum sensitivity cell only
        input.member_values[[0, 2, 1, 1]] = 100.0;
        let selector = SubsetSelector::new(4, 1, SubsetMethod::Point).unwrap();
        let selection = selector.select(&[GPH_500], &input).unwrap();
        assert_eq!(selection.members, vec![3]);
        assert!((selection.error_of(2).unwrap() - 0.025).abs() < 1e-9);
    }

    #[test]
    fn test_weight_selection_scales_by_sensitivity() {
        let selector = SubsetSelector::new(4, 2, SubsetMethod::Weight).unwrap();
        let selection = selector.select(&[GPH_500], &input()).unwrap();
        assert_eq!(selection.members, vec![2, 4]);
        // member 2: 0.025 * (1 + 2 + 3 + 9)
        assert!((selection.error_of(2).unwrap() - 0.375).abs() < 1e-9);
    }

    #[test]
    fn test_missing_cells_are_excluded() {
        let mut input = input();
        input.sensitivity[[1, 0, 0]] = MISSING_VALUE;
        input.member_values[[0, 1, 0, 0]] = 1000.0;
        let selector = SubsetSelector::new(4, 2, SubsetMethod::default()).unwrap();
        let selection = selector.select(&[GPH_500], &input).unwrap();
        assert_eq!(selection.members, vec![2, 4]);
        assert!((selection.error_of(2).unwrap() - 0.075).abs() < 1e-9);
    }

    #[test]
    fn test_zero_analysis_does_not_leak() {
        let mut input = input();
        input.analysis[[0, 0, 1]] = 0.0;
        // masked cell: division by zero never reaches the aggregate
        input.sensitivity[[1, 0, 1]] = MISSING_VALUE;
        let selector = SubsetSelector::new(4, 2, SubsetMethod::default()).unwrap();
        let selection = selector.select(&[GPH_500], &input).unwrap();
        assert!(selection.errors.iter().all(|e| e.is_finite()));
        assert_eq!(selection.members, vec![2, 4]);
    }

    #[test]
    fn test_masked_errors_hold_sentinel() {
        let input = input();
        let mask = Array::from_shape_vec((1, 2, 2), vec![true, false, false, false]).unwrap();
        let error = normalized_errors(&input.analysis, &input.member_values, &mask);
        assert_eq!(error[[0, 0, 0, 0]], MISSING_VALUE);
        assert!((error[[0, 1, 1, 1]] - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_result_is_deterministic() {
        let selector = SubsetSelector::new(4, 3, SubsetMethod::default()).unwrap();
        let first = selector.select(&[GPH_500], &input()).unwrap();
        let second = selector.select(&[GPH_500], &input()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.members.iter().unique().count(), 3);
        assert!(first.members.iter().all(|m| (1..=4).contains(m)));
    }

    #[test]
    fn test_validation_failures() {
        assert_eq!(
            SubsetSelector::new(4, 4, SubsetMethod::Point),
            Err(ConfigError::InvalidSubsetSize { subset: 4, ensemble: 4 })
        );
        assert!(SubsetSelector::new(4, 0, SubsetMethod::Point).is_err());
        assert!(SubsetSelector::new(4, 2, SubsetMethod::Percent { fraction: 2.0 }).is_err());

        let selector = SubsetSelector::new(4, 2, SubsetMethod::Point).unwrap();

        let mut bad = input();
        bad.analysis = Array3::from_elem((1, 2, 3), 100.0);
        assert!(matches!(
            selector.select(&[GPH_500], &bad),
            Err(SelectionError::ShapeMismatch { .. })
        ));

        let mut bad = input();
        bad.member_values = Array4::from_elem((1, 5, 2, 2), 100.0);
        assert_eq!(
            selector.select(&[GPH_500], &bad),
            Err(SelectionError::MemberCountMismatch { expected: 4, found: 5 })
        );

        let mut bad = input();
        bad.sensitivity = Array3::zeros((0, 2, 2));
        assert_eq!(
            selector.select(&[GPH_500], &bad),
            Err(SelectionError::EmptyField("sensitivity field"))
        );

        let mut bad = input();
        bad.sensitivity = Array3::zeros((1, 2, 2));
        assert_eq!(
            selector.select(&[GPH_500], &bad),
            Err(SelectionError::VariableIndexOutOfRange { index: 1, available: 1 })
        );
    }
}
