use ndarray::{Array, Array2, ArrayD, Axis, Dimension};

use crate::error::SelectionError;

/// Fill value written by the sensitivity and extraction codes for
/// underground or undefined points.
pub const MISSING_VALUE: f64 = 9e9;

/// True for cells holding the missing sentinel (or anything at or above it)
/// and for NaN.
#[inline]
pub fn is_missing(value: f64) -> bool {
    !(value < MISSING_VALUE)
}

/// Reshape a dynamically sized field into a fixed dimensionality, reporting
/// the offending shape instead of panicking.
pub fn into_dim<D: Dimension>(what: &str, field: ArrayD<f64>) -> Result<Array<f64, D>, SelectionError> {
    let found = field.shape().to_vec();
    field
        .into_dimensionality::<D>()
        .map_err(|_| SelectionError::RankMismatch {
            what: what.to_string(),
            expected: D::NDIM.unwrap_or(0),
            found,
        })
}

/// Drop a leading time axis of length one, as the model output files carry
/// one (`[time, ...]`).
pub fn first_time(field: ArrayD<f64>) -> ArrayD<f64> {
    if field.ndim() > 2 && field.shape()[0] == 1 {
        field.index_axis_move(Axis(0), 0)
    } else {
        field
    }
}

/// Latitude/longitude arrays of the model grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Coordinates {
    pub lats: Array2<f64>,
    pub lons: Array2<f64>,
}

impl Coordinates {
    pub fn new(lats: Array2<f64>, lons: Array2<f64>) -> Result<Self, SelectionError> {
        if lats.dim() != lons.dim() {
            return Err(SelectionError::ShapeMismatch {
                what: "longitudes".to_string(),
                expected: lats.shape().to_vec(),
                found: lons.shape().to_vec(),
            });
        }
        Ok(Self { lats, lons })
    }

    /// (ny, nx)
    pub fn dim(&self) -> (usize, usize) {
        self.lats.dim()
    }

    /// Check that a field's trailing two axes match this grid.
    pub fn check_grid(&self, what: &str, shape: &[usize]) -> Result<(), SelectionError> {
        let (ny, nx) = self.dim();
        match shape {
            [.., y, x] if *y == ny && *x == nx => Ok(()),
            _ => Err(SelectionError::ShapeMismatch {
                what: what.to_string(),
                expected: vec![ny, nx],
                found: shape.to_vec(),
            }),
        }
    }
}
