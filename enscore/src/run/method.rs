use std::fmt::Display;

use tracing::warn;

use crate::error::ConfigError;
use crate::grid::mask::validate_fraction;

pub const DEFAULT_PERCENT_FRACTION: f64 = 0.7;

/// How the sensitivity field restricts error aggregation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SubsetMethod {
    /// Only the single highest-sensitivity grid point.
    Point,
    /// Every grid point, with errors weighted by sensitivity.
    Weight,
    /// Cells kept by the percentile mask at the given fraction.
    Percent { fraction: f64 },
}

impl Default for SubsetMethod {
    fn default() -> Self {
        SubsetMethod::Percent {
            fraction: DEFAULT_PERCENT_FRACTION,
        }
    }
}

impl SubsetMethod {
    pub fn percent(fraction: f64) -> Result<Self, ConfigError> {
        Ok(SubsetMethod::Percent {
            fraction: validate_fraction(fraction)?,
        })
    }

    pub fn code(&self) -> u8 {
        match self {
            SubsetMethod::Point => 1,
            SubsetMethod::Weight => 2,
            SubsetMethod::Percent { .. } => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SubsetMethod::Point => "point",
            SubsetMethod::Weight => "weight",
            SubsetMethod::Percent { .. } => "percent",
        }
    }

    /// Validate a method given by name (`point`, `weight`, `percent`) or by
    /// numeric code (`1`-`3`). Percent uses the default fraction.
    pub fn parse(requested: &str) -> MethodChoice {
        let method = match requested.trim().to_ascii_lowercase().as_str() {
            "point" | "1" => SubsetMethod::Point,
            "weight" | "2" => SubsetMethod::Weight,
            "percent" | "3" => SubsetMethod::default(),
            _ => return MethodChoice::InvalidMethod(requested.to_string()),
        };
        MethodChoice::Valid(method)
    }

    pub fn from_code(code: u8) -> MethodChoice {
        SubsetMethod::parse(&code.to_string())
    }
}

impl Display for SubsetMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubsetMethod::Percent { fraction } => write!(f, "percent ({})", fraction),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Outcome of validating a requested subset method.
#[derive(Clone, Debug, PartialEq)]
pub enum MethodChoice {
    Valid(SubsetMethod),
    InvalidMethod(String),
}

impl MethodChoice {
    pub fn is_valid(&self) -> bool {
        matches!(self, MethodChoice::Valid(_))
    }

    /// Strict resolution, for callers that refuse the fallback.
    pub fn into_result(self) -> Result<SubsetMethod, ConfigError> {
        match self {
            MethodChoice::Valid(method) => Ok(method),
            MethodChoice::InvalidMethod(requested) => Err(ConfigError::InvalidMethod(requested)),
        }
    }

    /// Resolve with the fallback policy: an unknown method becomes percentile
    /// masking at the default fraction, and the substitution is logged.
    pub fn or_fallback(self) -> SubsetMethod {
        match self {
            MethodChoice::Valid(method) => method,
            MethodChoice::InvalidMethod(requested) => {
                let fallback = SubsetMethod::default();
                warn!(
                    requested = %requested,
                    fallback = %fallback,
                    "unknown subset method, falling back"
                );
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names_and_codes() {
        assert_eq!(SubsetMethod::parse("point"), MethodChoice::Valid(SubsetMethod::Point));
        assert_eq!(SubsetMethod::parse(" Weight "), MethodChoice::Valid(SubsetMethod::Weight));
        assert_eq!(SubsetMethod::parse("percent"), MethodChoice::Valid(SubsetMethod::Percent { fraction: 0.7 }));
        assert_eq!(SubsetMethod::from_code(1), MethodChoice::Valid(SubsetMethod::Point));
        assert_eq!(SubsetMethod::from_code(3).into_result().unwrap().code(), 3);
    }

    #[test]
    fn test_unknown_method_falls_back_to_percent() {
        let choice = SubsetMethod::parse("median");
        assert!(!choice.is_valid());
        assert_eq!(choice, MethodChoice::InvalidMethod("median".to_string()));
        assert_eq!(choice.clone().or_fallback(), SubsetMethod::Percent { fraction: 0.7 });
        assert_eq!(choice.into_result(), Err(ConfigError::InvalidMethod("median".to_string())));
        assert!(!SubsetMethod::from_code(7).is_valid());
    }

    #[test]
    fn test_percent_fraction_validation() {
        assert_eq!(SubsetMethod::percent(0.5), Ok(SubsetMethod::Percent { fraction: 0.5 }));
        assert!(SubsetMethod::percent(0.0).is_err());
        assert!(SubsetMethod::percent(1.2).is_err());
    }
}
