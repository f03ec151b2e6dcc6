//! Seam to the external numerical codes.
//!
//! Each method blocks until the collaborator reports completion or failure.
//! Backends only report; whether the expected artifact really exists is
//! checked by the caller afterwards.

use std::fmt::Display;
use std::path::PathBuf;

use enscore::run::descriptor::RunDescriptor;
use enscore::run::paths::RunPaths;
use enscore::run::time::RunInit;

use crate::data::infile::SensInputDescriptor;
use crate::error::DerivationError;
use crate::session::probability::ProbabilityRequest;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Analysis,
    InputDescriptor,
    MeanFields,
    Sensitivity,
    MemberValues,
    Probabilities,
}

impl Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Analysis => write!(f, "analysis"),
            ArtifactKind::InputDescriptor => write!(f, "input descriptor"),
            ArtifactKind::MeanFields => write!(f, "mean fields"),
            ArtifactKind::Sensitivity => write!(f, "sensitivity"),
            ArtifactKind::MemberValues => write!(f, "member values"),
            ArtifactKind::Probabilities => write!(f, "probabilities"),
        }
    }
}

/// Interpolate the analysis valid at `valid` onto the model grid.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisRequest {
    pub valid: RunInit,
    pub base_dir: PathBuf,
    pub outer_reference: PathBuf,
    pub output: PathBuf,
}

impl AnalysisRequest {
    pub fn new(descriptor: &RunDescriptor, output: PathBuf) -> Self {
        let paths = descriptor.paths();
        AnalysisRequest {
            valid: descriptor.sensitivity_time(),
            base_dir: paths.base_dir.clone(),
            outer_reference: paths.outer_reference.clone(),
            output,
        }
    }
}

/// Input shared by sensitivity derivation and member-value extraction.
#[derive(Clone, Debug, PartialEq)]
pub struct SensitivityRequest {
    pub base_dir: PathBuf,
    pub infile: PathBuf,
    pub outer_reference: PathBuf,
    pub input: SensInputDescriptor,
    pub output: PathBuf,
}

impl SensitivityRequest {
    pub fn sensitivity(descriptor: &RunDescriptor) -> Self {
        let paths = descriptor.paths();
        SensitivityRequest::with_output(descriptor, paths.sens_outfile.clone())
    }

    pub fn member_values(descriptor: &RunDescriptor) -> Self {
        let paths = descriptor.paths();
        SensitivityRequest::with_output(descriptor, paths.member_values.clone())
    }

    fn with_output(descriptor: &RunDescriptor, output: PathBuf) -> Self {
        let paths = descriptor.paths();
        SensitivityRequest {
            base_dir: paths.base_dir.clone(),
            infile: paths.sens_infile.clone(),
            outer_reference: paths.outer_reference.clone(),
            input: SensInputDescriptor::from_descriptor(descriptor, true),
            output,
        }
    }
}

pub trait DerivationBackend {
    fn interpolate_analysis(&self, request: &AnalysisRequest) -> Result<(), DerivationError>;

    fn compute_mean_fields(&self, paths: &RunPaths) -> Result<(), DerivationError>;

    fn derive_sensitivity(&self, request: &SensitivityRequest) -> Result<(), DerivationError>;

    fn extract_member_values(&self, request: &SensitivityRequest) -> Result<(), DerivationError>;

    fn compute_probabilities(&self, request: &ProbabilityRequest) -> Result<(), DerivationError>;
}

impl<B: DerivationBackend + ?Sized> DerivationBackend for &B {
    fn interpolate_analysis(&self, request: &AnalysisRequest) -> Result<(), DerivationError> {
        (**self).interpolate_analysis(request)
    }

    fn compute_mean_fields(&self, paths: &RunPaths) -> Result<(), DerivationError> {
        (**self).compute_mean_fields(paths)
    }

    fn derive_sensitivity(&self, request: &SensitivityRequest) -> Result<(), DerivationError> {
        (**self).derive_sensitivity(request)
    }

    fn extract_member_values(&self, request: &SensitivityRequest) -> Result<(), DerivationError> {
        (**self).extract_member_values(request)
    }

    fn compute_probabilities(&self, request: &ProbabilityRequest) -> Result<(), DerivationError> {
        (**self).compute_probabilities(request)
    }
}
