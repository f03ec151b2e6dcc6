use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use enscore::error::ConfigError;
use enscore::run::descriptor::{RunDescriptor, RunDescriptorBuilder, DEFAULT_ENSEMBLE_SIZE, DEFAULT_FORECAST_HOURS};
use enscore::run::method::{SubsetMethod, DEFAULT_PERCENT_FRACTION};
use enscore::run::paths::{PathLayout, DEFAULT_RUNS_ROOT};
use enscore::run::time::RunInit;
use serde::{Deserialize, Serialize};

use crate::derive::command::Executables;
use crate::error::{ReadError, SessionError};

pub const DEFAULT_SUBSET_SIZE: usize = 21;
pub const REGISTRY_FILE: &str = "rundates.txt";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub runs_root: PathBuf,
    /// Defaults to the reference file inside the runs root.
    pub inner_reference: Option<PathBuf>,
    pub ensemble_size: usize,
    pub forecast_hours: u32,
    pub subset_size: usize,
    pub subset_method: String,
    pub percent_fraction: f64,
    /// Defaults to `rundates.txt` inside the runs root.
    pub registry: Option<PathBuf>,
    pub executables: Executables,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        EnsembleConfig {
            runs_root: PathBuf::from(DEFAULT_RUNS_ROOT),
            inner_reference: None,
            ensemble_size: DEFAULT_ENSEMBLE_SIZE,
            forecast_hours: DEFAULT_FORECAST_HOURS,
            subset_size: DEFAULT_SUBSET_SIZE,
            subset_method: "percent".to_string(),
            percent_fraction: DEFAULT_PERCENT_FRACTION,
            registry: None,
            executables: Executables::default(),
        }
    }
}

impl EnsembleConfig {
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let wrap = |source: ReadError| SessionError::ConfigFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        };
        let file = File::open(path).map_err(|source| {
            wrap(ReadError::Io {
                path: path.to_path_buf(),
                source,
            })
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            wrap(ReadError::Parse {
                path: path.to_path_buf(),
                source,
            })
        })
    }

    /// Config file if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SessionError> {
        match path {
            Some(path) => EnsembleConfig::load(path),
            None => Ok(EnsembleConfig::default()),
        }
    }

    pub fn layout(&self) -> PathLayout {
        let layout = PathLayout::new(&self.runs_root);
        match &self.inner_reference {
            Some(path) => layout.with_inner_reference(path),
            None => layout,
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry
            .clone()
            .unwrap_or_else(|| self.runs_root.join(REGISTRY_FILE))
    }

    /// Configured subset method.
    pub fn method(&self) -> Result<SubsetMethod, ConfigError> {
        self.resolve_method(None)
    }

    /// `requested` if given, the configured method otherwise. Unknown names
    /// fall back to percentile masking, which uses the configured fraction.
    pub fn resolve_method(&self, requested: Option<&str>) -> Result<SubsetMethod, ConfigError> {
        match SubsetMethod::parse(requested.unwrap_or(&self.subset_method)).or_fallback() {
            SubsetMethod::Percent { .. } => SubsetMethod::percent(self.percent_fraction),
            other => Ok(other),
        }
    }

    /// Descriptor builder preloaded with this configuration.
    pub fn descriptor(&self, submitted: DateTime<Utc>, run: Option<RunInit>) -> RunDescriptorBuilder {
        RunDescriptor::builder(self.layout(), submitted)
            .run(run)
            .ensemble_size(self.ensemble_size)
            .forecast_hours(self.forecast_hours)
    }
}
