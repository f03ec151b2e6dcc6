//! The subsetting session.
//!
//! A session owns one run descriptor plus the subset configuration and
//! drives the run directory from raw ensemble output to a selected subset.
//! Progress is never cached: every call re-observes the run directory, so
//! artifacts produced by other tools are picked up and a failed step can
//! simply be retried.

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use enscore::algorithm::subset::{SelectionInput, SubsetSelection, SubsetSelector};
use enscore::error::{ConfigError, SelectionError};
use enscore::grid::field::{first_time, into_dim};
use enscore::run::descriptor::{ResponseBox, RunDescriptor};
use enscore::run::method::SubsetMethod;
use enscore::run::paths::EnsembleKind;
use enscore::run::response::{ResponseFunction, SensitivityVariable};
use ndarray::{stack, Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};
use tracing::{debug, info, warn};

use crate::data::infile::SensInputDescriptor;
use crate::data::reader::{coordinates, GriddedFieldReader, JsonFieldReader, LATITUDE_VARIABLE, LONGITUDE_VARIABLE, SENSITIVITY_VARIABLE};
use crate::derive::backend::{AnalysisRequest, ArtifactKind, DerivationBackend, SensitivityRequest};
use crate::error::{DerivationError, ReadError, Result, SessionError};
use crate::session::probability::ProbabilityRequest;
use crate::session::state::{plan, ArtifactPresence, Effect, SessionState};

/// Upper bound on effects run by one `compute_subset` call.
const MAX_EFFECTS: usize = 8;

pub struct SubsettingSession<B, R = JsonFieldReader> {
    descriptor: RunDescriptor,
    subset_size: usize,
    method: SubsetMethod,
    backend: B,
    reader: R,
    analysis_override: Option<PathBuf>,
    subset: Vec<usize>,
    variables: Vec<String>,
    probabilities: Option<EnsembleKind>,
}

impl<B: DerivationBackend, R: GriddedFieldReader> SubsettingSession<B, R> {
    pub fn new(descriptor: RunDescriptor, subset_size: usize, method: SubsetMethod, backend: B, reader: R) -> std::result::Result<Self, ConfigError> {
        SubsetSelector::new(descriptor.ensemble_size(), subset_size, method)?;
        Ok(SubsettingSession {
            descriptor,
            subset_size,
            method,
            backend,
            reader,
            analysis_override: None,
            subset: Vec::new(),
            variables: Vec::new(),
            probabilities: None,
        })
    }

    pub fn descriptor(&self) -> &RunDescriptor {
        &self.descriptor
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn subset_size(&self) -> usize {
        self.subset_size
    }

    pub fn method(&self) -> SubsetMethod {
        self.method
    }

    pub fn set_subset_size(&mut self, subset_size: usize) -> std::result::Result<(), ConfigError> {
        SubsetSelector::new(self.descriptor.ensemble_size(), subset_size, self.method)?;
        self.subset_size = subset_size;
        self.subset.clear();
        Ok(())
    }

    pub fn set_method(&mut self, method: SubsetMethod) -> std::result::Result<(), ConfigError> {
        SubsetSelector::new(self.descriptor.ensemble_size(), self.subset_size, method)?;
        self.method = method;
        self.subset.clear();
        Ok(())
    }

    /// Interpolated analysis used for verification.
    pub fn analysis_path(&self) -> PathBuf {
        self.analysis_override
            .clone()
            .unwrap_or_else(|| self.descriptor.analysis_path())
    }

    /// Verify against a different analysis file.
    pub fn set_analysis_path(&mut self, path: impl Into<PathBuf>) {
        self.analysis_override = Some(path.into());
        self.subset.clear();
    }

    /// 1-based members of the last computed subset, empty until computed.
    pub fn subset_members(&self) -> &[usize] {
        &self.subset
    }

    /// Display names of the variables behind the last subset.
    pub fn subset_variables(&self) -> &[String] {
        &self.variables
    }

    pub fn full_ensemble(&self) -> Vec<usize> {
        self.descriptor.members().collect()
    }

    /// Member set of the most recent probability computation.
    pub fn last_probabilities(&self) -> Option<EnsembleKind> {
        self.probabilities
    }

    /// Probability artifact of the most recent probability computation.
    pub fn probability_artifact(&self) -> Option<PathBuf> {
        self.probabilities
            .map(|kind| self.descriptor.paths().probability_artifact(kind))
    }

    pub fn observe(&self) -> ArtifactPresence {
        ArtifactPresence::observe(self.descriptor.paths(), &self.analysis_path())
    }

    pub fn state(&self) -> SessionState {
        plan(self.observe(), !self.subset.is_empty()).state
    }

    /// Change the response function and box. Refused once anything has been
    /// derived for the current descriptor.
    pub fn revise_response(&mut self, response: ResponseFunction, response_box: ResponseBox) -> Result<()> {
        let presence = self.observe();
        if presence.any_derived() || !self.subset.is_empty() {
            return Err(ConfigError::DescriptorLocked(self.descriptor.run().stamp()).into());
        }
        self.descriptor = self.descriptor.with_response(response, response_box)?;
        if presence.input_descriptor {
            // stale input file from the previous response
            self.write_input_descriptor()?;
        }
        Ok(())
    }

    /// Write (or overwrite) the sensitivity input file for this descriptor.
    pub fn write_input_descriptor(&self) -> Result<()> {
        let path = &self.descriptor.paths().sens_infile;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        SensInputDescriptor::from_descriptor(&self.descriptor, true)
            .write(path)
            .map_err(DerivationError::io(ArtifactKind::InputDescriptor, path.clone()))?;
        debug!(path = %path.display(), "wrote sensitivity input file");
        Ok(())
    }

    /// Interpolate the analysis at sensitivity time unless it exists.
    /// Returns whether the collaborator was invoked.
    pub fn ensure_analysis(&self) -> Result<bool> {
        let output = self.analysis_path();
        let request = AnalysisRequest::new(&self.descriptor, output.clone());
        self.ensure(ArtifactKind::Analysis, &output, || self.backend.interpolate_analysis(&request))
    }

    pub fn ensure_sensitivity(&self) -> Result<bool> {
        let request = SensitivityRequest::sensitivity(&self.descriptor);
        if request.output.is_file() {
            return self.ensure(ArtifactKind::Sensitivity, &request.output, || Ok(()));
        }
        self.ensure_input_descriptor()?;
        self.ensure(ArtifactKind::Sensitivity, &request.output, || self.backend.derive_sensitivity(&request))
    }

    pub fn ensure_member_values(&self) -> Result<bool> {
        let request = SensitivityRequest::member_values(&self.descriptor);
        if request.output.is_file() {
            return self.ensure(ArtifactKind::MemberValues, &request.output, || Ok(()));
        }
        self.ensure_input_descriptor()?;
        self.ensure(ArtifactKind::MemberValues, &request.output, || self.backend.extract_member_values(&request))
    }

    /// Keep an input file that matches this descriptor; rewrite a missing,
    /// unreadable or stale one.
    fn ensure_input_descriptor(&self) -> Result<()> {
        let path = &self.descriptor.paths().sens_infile;
        if !path.is_file() {
            return self.write_input_descriptor();
        }
        let expected = SensInputDescriptor::from_descriptor(&self.descriptor, true);
        match SensInputDescriptor::read(path) {
            Ok(current) if current == expected => return Ok(()),
            Ok(current) => info!(
                path = %path.display(),
                response = current.response_index,
                expected = expected.response_index,
                "sensitivity input file describes another request, rewriting"
            ),
            Err(e) => warn!(path = %path.display(), error = %e, "unreadable sensitivity input file, rewriting"),
        }
        self.write_input_descriptor()
    }

    fn ensure<F>(&self, kind: ArtifactKind, path: &Path, trigger: F) -> Result<bool>
    where
        F: FnOnce() -> std::result::Result<(), DerivationError>,
    {
        if path.is_file() {
            debug!(artifact = %kind, path = %path.display(), "artifact present");
            return Ok(false);
        }

        info!(artifact = %kind, path = %path.display(), "artifact missing, deriving");
        if let Err(e) = trigger() {
            discard_partial(kind, path);
            return Err(e.into());
        }
        if !path.is_file() {
            return Err(DerivationError::ArtifactMissing {
                kind,
                path: path.to_path_buf(),
            }
            .into());
        }
        info!(artifact = %kind, "derived");
        Ok(true)
    }

    fn apply(&self, effect: Effect) -> Result<()> {
        match effect {
            Effect::InterpolateAnalysis => self.ensure_analysis().map(|_| ()),
            Effect::WriteInputDescriptor => self.write_input_descriptor(),
            Effect::DeriveSensitivity => self.ensure_sensitivity().map(|_| ()),
            Effect::ExtractMemberValues => self.ensure_member_values().map(|_| ()),
            Effect::SelectSubset => Ok(()),
        }
    }

    /// Bring every upstream artifact into existence, then select the subset.
    /// Repeating the call with unchanged artifacts gives the same ranking.
    pub fn compute_subset(&mut self) -> Result<SubsetSelection> {
        let mut previous: Option<Effect> = None;
        for _ in 0..MAX_EFFECTS {
            let next = plan(self.observe(), false).effect;
            if next == Effect::SelectSubset {
                return self.select();
            }
            if previous == Some(next) {
                return Err(SessionError::Stalled(next));
            }
            self.apply(next)?;
            previous = Some(next);
        }
        Err(SessionError::Stalled(previous.unwrap_or(Effect::SelectSubset)))
    }

    fn select(&mut self) -> Result<SubsetSelection> {
        let variables = self.descriptor.response().sensitivity_variables();
        let selector = SubsetSelector::new(self.descriptor.ensemble_size(), self.subset_size, self.method)?;
        let input = self.load_input(variables)?;
        let selection = selector.select(variables, &input)?;

        self.subset = selection.members.clone();
        self.variables = selection.variables.clone();
        info!(
            run = %self.descriptor.run(),
            members = ?self.subset,
            variables = ?self.variables,
            "subset computed"
        );
        Ok(selection)
    }

    /// Read the sensitivity, analysis and member-value artifacts and check
    /// they share the model grid. Each artifact is read once.
    pub fn load_input(&self, variables: &[SensitivityVariable]) -> Result<SelectionInput> {
        let paths = self.descriptor.paths();
        let analysis_path = self.analysis_path();

        let mut sens = self
            .reader
            .read_variables(&paths.sens_outfile, &[SENSITIVITY_VARIABLE, LATITUDE_VARIABLE, LONGITUDE_VARIABLE])?
            .into_iter();
        let (Some(field), Some(lats), Some(lons)) = (sens.next(), sens.next(), sens.next()) else {
            return Err(ReadError::Malformed {
                what: "sensitivity artifact",
                message: "reader returned fewer variables than requested".to_string(),
            }
            .into());
        };
        let coords = coordinates(lats, lons)?;
        // [time, var, y, x]
        let sensitivity: Array3<f64> = into_dim("sensitivity field", first_time(field))?;
        coords.check_grid("sensitivity field", sensitivity.shape())?;

        let response_box = self.descriptor.response_box();
        let inside = Zip::from(&coords.lats)
            .and(&coords.lons)
            .fold(0usize, |n, &lat, &lon| n + usize::from(response_box.contains(lat, lon)));
        if inside == 0 {
            warn!(response_box = %response_box, "no grid cell inside the response box");
        } else {
            debug!(cells = inside, "grid cells inside the response box");
        }

        let analysis_keys: Vec<&str> = variables.iter().map(|v| v.analysis_key).collect();
        let member_keys: Vec<&str> = variables.iter().map(|v| v.member_key).collect();
        let analysis_read = self.reader.read_variables(&analysis_path, &analysis_keys)?;
        let member_read = self.reader.read_variables(&paths.member_values, &member_keys)?;

        let mut analysis: Vec<Array2<f64>> = Vec::with_capacity(variables.len());
        let mut members: Vec<Array3<f64>> = Vec::with_capacity(variables.len());
        for ((v, a), m) in variables.iter().zip(analysis_read).zip(member_read) {
            let a: Array2<f64> = into_dim(v.analysis_key, a)?;
            coords.check_grid(v.analysis_key, a.shape())?;
            analysis.push(a);

            let m: Array3<f64> = into_dim(v.member_key, m)?;
            coords.check_grid(v.member_key, m.shape())?;
            if m.len_of(Axis(0)) != self.descriptor.ensemble_size() {
                return Err(SelectionError::MemberCountMismatch {
                    expected: self.descriptor.ensemble_size(),
                    found: m.len_of(Axis(0)),
                }
                .into());
            }
            members.push(m);
        }

        let analysis_views: Vec<ArrayView2<f64>> = analysis.iter().map(|a| a.view()).collect();
        let member_views: Vec<ArrayView3<f64>> = members.iter().map(|m| m.view()).collect();
        let analysis = stack(Axis(0), &analysis_views).map_err(|_| stack_error("analysis field", &analysis))?;
        let member_values = stack(Axis(0), &member_views).map_err(|_| stack_error("member values", &members))?;

        Ok(SelectionInput {
            sensitivity,
            analysis,
            member_values,
        })
    }

    /// Run probability derivation over `members` and record whether that
    /// was the full ensemble or a subset. Returns the probability artifact.
    pub fn compute_probabilities(&mut self, members: &[usize]) -> Result<PathBuf> {
        let request = ProbabilityRequest::new(&self.descriptor, members)?;
        request.stage()?;
        if let Err(e) = self.backend.compute_probabilities(&request) {
            discard_partial(ArtifactKind::Probabilities, &request.output);
            return Err(e.into());
        }
        if !request.output.is_file() {
            return Err(DerivationError::ArtifactMissing {
                kind: ArtifactKind::Probabilities,
                path: request.output,
            }
            .into());
        }
        self.probabilities = Some(request.kind);
        info!(
            kind = ?request.kind,
            members = request.members.len(),
            output = %request.output.display(),
            "probabilities computed"
        );
        Ok(request.output)
    }

    pub fn compute_full_probabilities(&mut self) -> Result<PathBuf> {
        let members = self.full_ensemble();
        self.compute_probabilities(&members)
    }

    pub fn compute_subset_probabilities(&mut self) -> Result<PathBuf> {
        if self.subset.is_empty() {
            return Err(ConfigError::InvalidMemberSet("subset has not been computed".to_string()).into());
        }
        let members = self.subset.clone();
        self.compute_probabilities(&members)
    }
}

impl<B, R> Display for SubsettingSession<B, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Subset session with full ensemble of {} members, subset size of {}, using the {} subsetting method. Based on:\n {}",
            self.descriptor.ensemble_size(),
            self.subset_size,
            self.method,
            self.descriptor
        )
    }
}

fn stack_error<A, D: ndarray::Dimension>(what: &str, parts: &[ndarray::Array<A, D>]) -> SessionError {
    let expected = parts.first().map(|p| p.shape().to_vec()).unwrap_or_default();
    let found = parts
        .iter()
        .map(|p| p.shape().to_vec())
        .find(|s| *s != expected)
        .unwrap_or_default();
    SelectionError::ShapeMismatch {
        what: what.to_string(),
        expected,
        found,
    }
    .into()
}

/// A failed collaborator may leave a truncated file behind; it must not be
/// mistaken for a finished artifact on the next call.
pub(crate) fn discard_partial(kind: ArtifactKind, path: &Path) {
    if path.exists() {
        match fs::remove_file(path) {
            Ok(()) => warn!(artifact = %kind, path = %path.display(), "removed partial artifact"),
            Err(e) => warn!(artifact = %kind, path = %path.display(), error = %e, "could not remove partial artifact"),
        }
    }
}
