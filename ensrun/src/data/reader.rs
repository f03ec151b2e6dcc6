//! Gridded-field access.
//!
//! The session reads artifacts through [`GriddedFieldReader`]. The bundled
//! [`JsonFieldReader`] stores each artifact as a JSON document of named,
//! shaped variables; `null` entries stand for the missing sentinel.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use enscore::grid::field::{first_time, is_missing, Coordinates, MISSING_VALUE};
use ndarray::{ArrayD, Ix2, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::ReadError;

/// Sensitivity variable in the sensitivity artifact, `[time, var, y, x]`.
pub const SENSITIVITY_VARIABLE: &str = "P_HYD";
pub const LATITUDE_VARIABLE: &str = "XLAT";
pub const LONGITUDE_VARIABLE: &str = "XLONG";

pub trait GriddedFieldReader {
    fn read_variable(&self, path: &Path, name: &str) -> Result<ArrayD<f64>, ReadError>;

    /// Several variables from one file, in the order of `names`.
    fn read_variables(&self, path: &Path, names: &[&str]) -> Result<Vec<ArrayD<f64>>, ReadError> {
        names.iter().map(|name| self.read_variable(path, name)).collect()
    }
}

/// Build the model grid from latitude and longitude fields, either of
/// which may carry a leading time axis.
pub fn coordinates(lats: ArrayD<f64>, lons: ArrayD<f64>) -> Result<Coordinates, ReadError> {
    let lats = first_time(lats);
    let lons = first_time(lons);
    let bad = |name: &str, shape: &[usize]| ReadError::Malformed {
        what: "coordinates",
        message: format!("{} has shape {:?}", name, shape),
    };
    let lats_shape = lats.shape().to_vec();
    let lons_shape = lons.shape().to_vec();
    let lats = lats
        .into_dimensionality::<Ix2>()
        .map_err(|_| bad(LATITUDE_VARIABLE, &lats_shape))?;
    let lons = lons
        .into_dimensionality::<Ix2>()
        .map_err(|_| bad(LONGITUDE_VARIABLE, &lons_shape))?;
    Coordinates::new(lats, lons).map_err(|e| ReadError::Malformed {
        what: "coordinates",
        message: e.to_string(),
    })
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredVariable {
    pub shape: Vec<usize>,
    pub data: Vec<Option<f64>>,
}

impl StoredVariable {
    pub fn from_array(values: &ArrayD<f64>) -> Self {
        StoredVariable {
            shape: values.shape().to_vec(),
            data: values
                .iter()
                .map(|v| if is_missing(*v) { None } else { Some(*v) })
                .collect(),
        }
    }

    pub fn to_array(&self, name: &str) -> Result<ArrayD<f64>, ReadError> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(ReadError::BadShape {
                name: name.to_string(),
                shape: self.shape.clone(),
                len: self.data.len(),
                expected,
            });
        }
        let values = self.data.iter().map(|v| v.unwrap_or(MISSING_VALUE)).collect();
        ArrayD::from_shape_vec(IxDyn(&self.shape), values).map_err(|_| ReadError::BadShape {
            name: name.to_string(),
            shape: self.shape.clone(),
            len: self.data.len(),
            expected,
        })
    }
}

/// One artifact file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDocument {
    pub variables: BTreeMap<String, StoredVariable>,
}

impl FieldDocument {
    pub fn with_variable(mut self, name: &str, values: &ArrayD<f64>) -> Self {
        self.variables.insert(name.to_string(), StoredVariable::from_array(values));
        self
    }

    pub fn load(path: &Path) -> Result<Self, ReadError> {
        let file = File::open(path).map_err(|source| ReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| ReadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ReadError> {
        let file = File::create(path).map_err(|source| ReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|source| ReadError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(|source| ReadError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonFieldReader;

impl JsonFieldReader {
    fn extract(document: &FieldDocument, path: &Path, name: &str) -> Result<ArrayD<f64>, ReadError> {
        let stored = document
            .variables
            .get(name)
            .ok_or_else(|| ReadError::MissingVariable {
                path: path.to_path_buf(),
                name: name.to_string(),
            })?;
        stored.to_array(name)
    }
}

impl GriddedFieldReader for JsonFieldReader {
    fn read_variable(&self, path: &Path, name: &str) -> Result<ArrayD<f64>, ReadError> {
        JsonFieldReader::extract(&FieldDocument::load(path)?, path, name)
    }

    // parse the document once per file
    fn read_variables(&self, path: &Path, names: &[&str]) -> Result<Vec<ArrayD<f64>>, ReadError> {
        let document = FieldDocument::load(path)?;
        names
            .iter()
            .map(|name| JsonFieldReader::extract(&document, path, name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_missing_values_survive_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrfout.sens");
        let values = Array::from_shape_vec(IxDyn(&[1, 2, 2]), vec![1.0, MISSING_VALUE, f64::NAN, 4.0]).unwrap();
        FieldDocument::default()
            .with_variable(SENSITIVITY_VARIABLE, &values)
            .save(&path)
            .unwrap();

        let read = JsonFieldReader.read_variable(&path, SENSITIVITY_VARIABLE).unwrap();
        assert_eq!(read.shape(), &[1, 2, 2]);
        assert_eq!(read[[0, 0, 0]], 1.0);
        assert_eq!(read[[0, 0, 1]], MISSING_VALUE);
        assert_eq!(read[[0, 1, 0]], MISSING_VALUE);
    }

    #[test]
    fn test_missing_variable_and_bad_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SENSvals.nc");
        let mut document = FieldDocument::default();
        document.variables.insert(
            "GPH_500".to_string(),
            StoredVariable {
                shape: vec![2, 2],
                data: vec![Some(1.0)],
            },
        );
        document.save(&path).unwrap();

        assert!(matches!(
            JsonFieldReader.read_variable(&path, "T_500"),
            Err(ReadError::MissingVariable { .. })
        ));
        assert!(matches!(
            JsonFieldReader.read_variable(&path, "GPH_500"),
            Err(ReadError::BadShape { expected: 4, len: 1, .. })
        ));
        assert!(matches!(
            JsonFieldReader.read_variable(&dir.path().join("absent"), "GPH_500"),
            Err(ReadError::Io { .. })
        ));
    }

    #[test]
    fn test_read_variables_keeps_requested_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrfout.sens");
        FieldDocument::default()
            .with_variable("GPH_500", &Array::from_elem(IxDyn(&[2, 2]), 5600.0))
            .with_variable("T_500", &Array::from_elem(IxDyn(&[2, 2]), 260.0))
            .with_variable("SLP", &Array::from_elem(IxDyn(&[3]), 1010.0))
            .save(&path)
            .unwrap();

        let read = JsonFieldReader.read_variables(&path, &["T_500", "SLP", "GPH_500"]).unwrap();
        assert_eq!(read.len(), 3);
        assert_eq!(read[0][[0, 0]], 260.0);
        assert_eq!(read[1].shape(), &[3]);
        assert_eq!(read[2][[1, 1]], 5600.0);
        assert!(JsonFieldReader.read_variables(&path, &[]).unwrap().is_empty());

        match JsonFieldReader.read_variables(&path, &["T_500", "Q_850"]) {
            Err(ReadError::MissingVariable { name, .. }) => assert_eq!(name, "Q_850"),
            other => panic!("expected missing variable, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_coordinates_drop_time_axis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrfout.sens");
        let lats = Array::from_shape_vec(IxDyn(&[1, 2, 3]), vec![30.0, 30.0, 30.0, 31.0, 31.0, 31.0]).unwrap();
        let lons = Array::from_shape_vec(IxDyn(&[1, 2, 3]), vec![-101.0, -100.0, -99.0, -101.0, -100.0, -99.0]).unwrap();
        FieldDocument::default()
            .with_variable(LATITUDE_VARIABLE, &lats)
            .with_variable(LONGITUDE_VARIABLE, &lons)
            .save(&path)
            .unwrap();

        let mut read = JsonFieldReader
            .read_variables(&path, &[LATITUDE_VARIABLE, LONGITUDE_VARIABLE])
            .unwrap()
            .into_iter();
        let coords = coordinates(read.next().unwrap(), read.next().unwrap()).unwrap();
        assert_eq!(coords.dim(), (2, 3));
        assert_eq!(coords.lons[[1, 2]], -99.0);
    }
}
