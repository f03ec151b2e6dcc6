use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A model variable used to compare members against the analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SensitivityVariable {
    /// Index along the variable axis of the sensitivity artifact.
    pub sens_index: usize,
    /// Variable name in the interpolated analysis file.
    pub analysis_key: &'static str,
    /// Variable name in the member-value file.
    pub member_key: &'static str,
}

impl SensitivityVariable {
    pub fn display_name(&self) -> String {
        self.analysis_key.replace('_', " ")
    }
}

pub const GPH_500: SensitivityVariable = SensitivityVariable {
    sens_index: 1,
    analysis_key: "500_hPa_GPH",
    member_key: "GPH_500",
};

/// Response functions known to the sensitivity code, by their form labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResponseFunction {
    AvgRefl,
    MaxRefl,
    AvgUh1h,
    MaxUh1h,
    AccumPcp,
    AvgWindSpd,
}

impl ResponseFunction {
    pub const ALL: [ResponseFunction; 6] = [
        ResponseFunction::AvgRefl,
        ResponseFunction::MaxRefl,
        ResponseFunction::AvgUh1h,
        ResponseFunction::MaxUh1h,
        ResponseFunction::AccumPcp,
        ResponseFunction::AvgWindSpd,
    ];

    /// Integer code expected by the sensitivity code.
    pub fn index(&self) -> u8 {
        match self {
            ResponseFunction::AvgRefl => 1,
            ResponseFunction::MaxRefl => 2,
            ResponseFunction::AvgUh1h => 3,
            ResponseFunction::MaxUh1h => 4,
            ResponseFunction::AccumPcp => 5,
            ResponseFunction::AvgWindSpd => 6,
        }
    }

    pub fn from_index(code: u8) -> Result<Self, ConfigError> {
        ResponseFunction::ALL
            .iter()
            .copied()
            .find(|r| r.index() == code)
            .ok_or(ConfigError::UnknownResponseCode(code))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResponseFunction::AvgRefl => "Avg Refl",
            ResponseFunction::MaxRefl => "Max Refl",
            ResponseFunction::AvgUh1h => "Avg 1h UH",
            ResponseFunction::MaxUh1h => "Max 1h UH",
            ResponseFunction::AccumPcp => "Accum PCP",
            ResponseFunction::AvgWindSpd => "Avg Wind Spd",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ResponseFunction::AvgRefl => "Average Reflectivity",
            ResponseFunction::MaxRefl => "Maximum Reflectivity",
            ResponseFunction::AvgUh1h => "Average 1h Updraft Helicity",
            ResponseFunction::MaxUh1h => "Maximum 1h Updraft Helicity",
            ResponseFunction::AccumPcp => "Accumulated Precipitation",
            ResponseFunction::AvgWindSpd => "Average Wind Speed",
        }
    }

    /// Sensitivity variables compared against the analysis for this
    /// response. Currently 500 hPa height for every response function.
    pub fn sensitivity_variables(&self) -> &'static [SensitivityVariable] {
        &[GPH_500]
    }
}

impl Default for ResponseFunction {
    fn default() -> Self {
        ResponseFunction::MaxUh1h
    }
}

impl Display for ResponseFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ResponseFunction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        if let Ok(code) = name.parse::<u8>() {
            return ResponseFunction::from_index(code);
        }
        ResponseFunction::ALL
            .iter()
            .copied()
            .find(|r| r.name() == name)
            .ok_or_else(|| ConfigError::UnknownResponseFunction(s.to_string()))
    }
}

impl TryFrom<String> for ResponseFunction {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResponseFunction> for String {
    fn from(value: ResponseFunction) -> Self {
        value.name().to_string()
    }
}

/// Code for a response function given by its form label. Unknown labels are
/// an error, never a default.
pub fn response_function_index(name: &str) -> Result<u8, ConfigError> {
    Ok(name.parse::<ResponseFunction>()?.index())
}
