use std::fmt::Display;
use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::run::paths::{PathLayout, RunPaths};
use crate::run::response::ResponseFunction;
use crate::run::time::{default_run_init, RunInit};

pub const DEFAULT_ENSEMBLE_SIZE: usize = 42;
pub const DEFAULT_FORECAST_HOURS: u32 = 48;
pub const DEFAULT_SENSITIVITY_HOUR: u32 = 6;
pub const DEFAULT_RESPONSE_HOUR: u32 = 24;

/// Response function box, in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseBox {
    pub lower_lat: f64,
    pub upper_lat: f64,
    pub lower_lon: f64,
    pub upper_lon: f64,
}

impl Default for ResponseBox {
    // Centered on Lubbock, TX
    fn default() -> Self {
        ResponseBox {
            lower_lat: 31.578,
            upper_lat: 35.578,
            lower_lon: -105.855,
            upper_lon: -98.855,
        }
    }
}

impl ResponseBox {
    pub fn new(lower_lat: f64, upper_lat: f64, lower_lon: f64, upper_lon: f64) -> Result<Self, ConfigError> {
        let rbox = ResponseBox {
            lower_lat,
            upper_lat,
            lower_lon,
            upper_lon,
        };
        rbox.validate()?;
        Ok(rbox)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // NaN bounds fail the comparison as well
        if !(self.lower_lat < self.upper_lat) {
            return Err(ConfigError::InvalidBoundingBox {
                axis: "latitude",
                lower: self.lower_lat,
                upper: self.upper_lat,
            });
        }
        if !(self.lower_lon < self.upper_lon) {
            return Err(ConfigError::InvalidBoundingBox {
                axis: "longitude",
                lower: self.lower_lon,
                upper: self.upper_lon,
            });
        }
        Ok(())
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lower_lat && lat <= self.upper_lat && lon >= self.lower_lon && lon <= self.upper_lon
    }
}

impl Display for ResponseBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Lats: {} to {}, Lons: {} to {}",
            self.lower_lat, self.upper_lat, self.lower_lon, self.upper_lon
        )
    }
}

/// Everything that identifies one sensitivity/subset request against one
/// ensemble run. Immutable once built; revisions produce a new descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct RunDescriptor {
    run: RunInit,
    ensemble_size: usize,
    forecast_hours: u32,
    response: ResponseFunction,
    response_box: ResponseBox,
    sensitivity_hour: u32,
    response_hour: u32,
    paths: RunPaths,
}

impl RunDescriptor {
    /// Start a descriptor. `submitted` is the request time, used when no run
    /// is picked explicitly.
    pub fn builder(layout: PathLayout, submitted: DateTime<Utc>) -> RunDescriptorBuilder {
        RunDescriptorBuilder {
            layout,
            submitted,
            run: None,
            ensemble_size: DEFAULT_ENSEMBLE_SIZE,
            forecast_hours: DEFAULT_FORECAST_HOURS,
            response: ResponseFunction::default(),
            response_box: ResponseBox::default(),
            sensitivity_hour: DEFAULT_SENSITIVITY_HOUR,
            response_hour: DEFAULT_RESPONSE_HOUR,
        }
    }

    pub fn run(&self) -> RunInit {
        self.run
    }

    pub fn ensemble_size(&self) -> usize {
        self.ensemble_size
    }

    /// 1-based member numbers.
    pub fn members(&self) -> RangeInclusive<usize> {
        1..=self.ensemble_size
    }

    pub fn forecast_hours(&self) -> u32 {
        self.forecast_hours
    }

    pub fn response(&self) -> ResponseFunction {
        self.response
    }

    pub fn response_index(&self) -> u8 {
        self.response.index()
    }

    pub fn response_box(&self) -> ResponseBox {
        self.response_box
    }

    pub fn sensitivity_hour(&self) -> u32 {
        self.sensitivity_hour
    }

    pub fn response_hour(&self) -> u32 {
        self.response_hour
    }

    /// Valid time of the sensitivity diagnosis.
    pub fn sensitivity_time(&self) -> RunInit {
        self.run.lead(self.sensitivity_hour)
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn analysis_path(&self) -> std::path::PathBuf {
        self.paths.analysis(self.sensitivity_time())
    }

    /// Same run with a different response function and box.
    pub fn with_response(&self, response: ResponseFunction, response_box: ResponseBox) -> Result<Self, ConfigError> {
        response_box.validate()?;
        Ok(RunDescriptor {
            response,
            response_box,
            ..self.clone()
        })
    }
}

impl Display for RunDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Run initialized at: {}\n Response Box: {}\n Response Function: {} ({}) at f{}",
            self.run.datetime().format("%Y-%m-%d %H:%M:%S"),
            self.response_box,
            self.response.description(),
            self.response,
            self.response_hour
        )
    }
}

pub struct RunDescriptorBuilder {
    layout: PathLayout,
    submitted: DateTime<Utc>,
    run: Option<RunInit>,
    ensemble_size: usize,
    forecast_hours: u32,
    response: ResponseFunction,
    response_box: ResponseBox,
    sensitivity_hour: u32,
    response_hour: u32,
}

impl RunDescriptorBuilder {
    pub fn run(mut self, run: Option<RunInit>) -> Self {
        self.run = run;
        self
    }

    pub fn ensemble_size(mut self, ensemble_size: usize) -> Self {
        self.ensemble_size = ensemble_size;
        self
    }

    pub fn forecast_hours(mut self, forecast_hours: u32) -> Self {
        self.forecast_hours = forecast_hours;
        self
    }

    pub fn response(mut self, response: ResponseFunction) -> Self {
        self.response = response;
        self
    }

    pub fn response_box(mut self, response_box: ResponseBox) -> Self {
        self.response_box = response_box;
        self
    }

    pub fn lead_times(mut self, sensitivity_hour: u32, response_hour: u32) -> Self {
        self.sensitivity_hour = sensitivity_hour;
        self.response_hour = response_hour;
        self
    }

    pub fn build(self) -> Result<RunDescriptor, ConfigError> {
        if self.ensemble_size == 0 {
            return Err(ConfigError::InvalidEnsembleSize(self.ensemble_size));
        }
        self.response_box.validate()?;
        if self.sensitivity_hour > self.response_hour || self.response_hour > self.forecast_hours {
            return Err(ConfigError::InvalidLeadTimes {
                sensitivity: self.sensitivity_hour,
                response: self.response_hour,
                forecast: self.forecast_hours,
            });
        }

        let run = self
            .run
            .unwrap_or_else(|| default_run_init(self.submitted));

        Ok(RunDescriptor {
            run,
            ensemble_size: self.ensemble_size,
            forecast_hours: self.forecast_hours,
            response: self.response,
            response_box: self.response_box,
            sensitivity_hour: self.sensitivity_hour,
            response_hour: self.response_hour,
            paths: self.layout.derive(run),
        })
    }
}
