//! Error taxonomy shared by the core library.
//!
//! Configuration errors are raised where a value is constructed. Selection
//! errors cover the inputs handed to the subset algorithm.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown response function `{0}`")]
    UnknownResponseFunction(String),

    #[error("unknown response function code {0}")]
    UnknownResponseCode(u8),

    #[error("invalid subset method `{0}`, expected one of point, weight, percent")]
    InvalidMethod(String),

    #[error("invalid response box: {axis} lower bound {lower} is not below upper bound {upper}")]
    InvalidBoundingBox {
        axis: &'static str,
        lower: f64,
        upper: f64,
    },

    #[error("invalid lead times: sensitivity f{sensitivity} and response f{response} within a {forecast}h forecast")]
    InvalidLeadTimes {
        sensitivity: u32,
        response: u32,
        forecast: u32,
    },

    #[error("invalid ensemble size {0}")]
    InvalidEnsembleSize(usize),

    #[error("invalid subset size {subset} for an ensemble of {ensemble} members")]
    InvalidSubsetSize { subset: usize, ensemble: usize },

    #[error("percentile fraction {0} is outside (0, 1]")]
    InvalidFraction(f64),

    #[error("invalid member set: {0}")]
    InvalidMemberSet(String),

    #[error("invalid run time `{0}`, expected YYYYMMDDHH")]
    InvalidRunTime(String),

    #[error("run {0} is locked: derived artifacts already exist")]
    DescriptorLocked(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0} is empty")]
    EmptyField(&'static str),

    #[error("grid shape mismatch: {what} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("{what} has shape {found:?}, expected {expected} axes")]
    RankMismatch {
        what: String,
        expected: usize,
        found: Vec<usize>,
    },

    #[error("member values hold {found} members, ensemble has {expected}")]
    MemberCountMismatch { expected: usize, found: usize },

    #[error("sensitivity variable index {index} out of range for {available} variables")]
    VariableIndexOutOfRange { index: usize, available: usize },
}
