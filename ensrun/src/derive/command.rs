use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use enscore::run::paths::{Domain, MemberFileConvention, RunPaths};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::derive::backend::{AnalysisRequest, ArtifactKind, DerivationBackend, SensitivityRequest};
use crate::error::DerivationError;
use crate::session::probability::ProbabilityRequest;

/// Locations of the external programs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Executables {
    pub interpolate_analysis: PathBuf,
    pub mean_fields: PathBuf,
    pub sensitivity: PathBuf,
    pub member_values: PathBuf,
    pub rename_probabilities: PathBuf,
    pub probabilities: PathBuf,
}

impl Default for Executables {
    fn default() -> Self {
        Executables {
            interpolate_analysis: PathBuf::from("interp_analysis"),
            mean_fields: PathBuf::from("/lustre/work/aucolema/enkfDART/src/meancalcSENS"),
            sensitivity: PathBuf::from("/lustre/work/aucolema/enkfDART/src/esensSPC"),
            member_values: PathBuf::from("/lustre/work/aucolema/enkfDART/src/sensvector"),
            rename_probabilities: PathBuf::from("/lustre/work/aucolema/scripts/rename_probs.sh"),
            probabilities: PathBuf::from("/lustre/work/aucolema/enkfDART/src/probcalcSUBSETnew"),
        }
    }
}

/// One program run: working directory, optional stdin file, stdout captured
/// to a log file next to the outputs.
struct Invocation<'a> {
    kind: ArtifactKind,
    program: &'a Path,
    dir: &'a Path,
    args: Vec<String>,
    stdin: Option<&'a Path>,
    log: &'a str,
}

impl Invocation<'_> {
    fn run(self) -> Result<(), DerivationError> {
        let log_path = self.dir.join(self.log);
        let stdout = File::create(&log_path).map_err(DerivationError::io(self.kind, &log_path))?;
        let stdin = match self.stdin {
            Some(path) => Stdio::from(File::open(path).map_err(DerivationError::io(self.kind, path))?),
            None => Stdio::null(),
        };

        debug!(artifact = %self.kind, program = %self.program.display(), args = ?self.args, "launching");
        let status = Command::new(self.program)
            .args(&self.args)
            .current_dir(self.dir)
            .stdin(stdin)
            .stdout(stdout)
            .status()
            .map_err(|source| DerivationError::Launch {
                kind: self.kind,
                program: self.program.to_path_buf(),
                source,
            })?;

        if !status.success() {
            return Err(DerivationError::Failed {
                kind: self.kind,
                message: format!(
                    "`{}` exited with {} (see {})",
                    self.program.display(),
                    status,
                    log_path.display()
                ),
            });
        }
        Ok(())
    }
}

/// Runs the numerical codes as child processes and waits for them.
#[derive(Clone, Debug, Default)]
pub struct CommandBackend {
    executables: Executables,
}

impl CommandBackend {
    pub fn new(executables: Executables) -> Self {
        CommandBackend { executables }
    }

    pub fn executables(&self) -> &Executables {
        &self.executables
    }
}

fn copy(kind: ArtifactKind, from: &Path, to: &Path) -> Result<(), DerivationError> {
    fs::copy(from, to).map_err(DerivationError::io(kind, from))?;
    Ok(())
}

impl DerivationBackend for CommandBackend {
    fn interpolate_analysis(&self, request: &AnalysisRequest) -> Result<(), DerivationError> {
        let valid = request.valid;
        info!(valid = %valid, "interpolating analysis onto model grid");
        Invocation {
            kind: ArtifactKind::Analysis,
            program: &self.executables.interpolate_analysis,
            dir: &request.base_dir,
            args: vec![
                valid.year().to_string(),
                valid.month().to_string(),
                valid.day().to_string(),
                valid.hour().to_string(),
                request.outer_reference.display().to_string(),
                request.output.display().to_string(),
            ],
            stdin: None,
            log: "interp_analysis.out",
        }
        .run()
    }

    fn compute_mean_fields(&self, paths: &RunPaths) -> Result<(), DerivationError> {
        // the mean code overwrites files seeded from the first member
        let first = paths.member_dir(1);
        copy(
            ArtifactKind::MeanFields,
            &MemberFileConvention::output(&first, Domain::Outer, 1, 0),
            &paths.sens_mean,
        )?;
        copy(
            ArtifactKind::MeanFields,
            &MemberFileConvention::output(&first, Domain::Inner, 1, 0),
            &paths.response_mean,
        )?;
        Invocation {
            kind: ArtifactKind::MeanFields,
            program: &self.executables.mean_fields,
            dir: &paths.base_dir,
            args: Vec::new(),
            stdin: None,
            log: "meancalcSENS.out",
        }
        .run()
    }

    fn derive_sensitivity(&self, request: &SensitivityRequest) -> Result<(), DerivationError> {
        copy(ArtifactKind::Sensitivity, &request.outer_reference, &request.output)?;
        Invocation {
            kind: ArtifactKind::Sensitivity,
            program: &self.executables.sensitivity,
            dir: &request.base_dir,
            args: Vec::new(),
            stdin: Some(&request.infile),
            log: "esens.out",
        }
        .run()
    }

    fn extract_member_values(&self, request: &SensitivityRequest) -> Result<(), DerivationError> {
        Invocation {
            kind: ArtifactKind::MemberValues,
            program: &self.executables.member_values,
            dir: &request.base_dir,
            args: Vec::new(),
            stdin: Some(&request.infile),
            log: "sensvector.out",
        }
        .run()
    }

    fn compute_probabilities(&self, request: &ProbabilityRequest) -> Result<(), DerivationError> {
        Invocation {
            kind: ArtifactKind::Probabilities,
            program: &self.executables.rename_probabilities,
            dir: &request.probs_dir,
            args: Vec::new(),
            stdin: Some(&request.infile),
            log: "rename_probs.out",
        }
        .run()?;
        Invocation {
            kind: ArtifactKind::Probabilities,
            program: &self.executables.probabilities,
            dir: &request.probs_dir,
            args: Vec::new(),
            stdin: Some(&request.infile),
            log: "probs.out",
        }
        .run()?;
        copy(ArtifactKind::Probabilities, &request.grid, &request.output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use enscore::run::descriptor::RunDescriptor;
    use enscore::run::paths::PathLayout;

    fn descriptor(root: &Path) -> RunDescriptor {
        RunDescriptor::builder(PathLayout::new(root), Utc.with_ymd_and_hms(2018, 5, 3, 14, 0, 0).unwrap())
            .ensemble_size(2)
            .build()
            .unwrap()
    }

    fn backend(program: &str) -> CommandBackend {
        let program = PathBuf::from(program);
        CommandBackend::new(Executables {
            interpolate_analysis: program.clone(),
            mean_fields: program.clone(),
            sensitivity: program.clone(),
            member_values: program.clone(),
            rename_probabilities: program.clone(),
            probabilities: program,
        })
    }

    #[test]
    fn test_sensitivity_seeds_output_from_reference() {
        let dir = tempfile::tempdir().unwrap();
        let d = descriptor(dir.path());
        let paths = d.paths();
        fs::create_dir_all(&paths.base_dir).unwrap();
        fs::write(&paths.outer_reference, "reference").unwrap();
        fs::write(&paths.sens_infile, "2\n").unwrap();

        let request = SensitivityRequest::sensitivity(&d);
        backend("true").derive_sensitivity(&request).unwrap();
        assert_eq!(fs::read_to_string(&paths.sens_outfile).unwrap(), "reference");
        assert!(paths.base_dir.join("esens.out").is_file());
    }

    #[test]
    fn test_failed_program_is_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let d = descriptor(dir.path());
        let paths = d.paths();
        fs::create_dir_all(&paths.base_dir).unwrap();
        fs::write(&paths.sens_infile, "2\n").unwrap();

        let err = backend("false")
            .extract_member_values(&SensitivityRequest::member_values(&d))
            .unwrap_err();
        assert!(matches!(err, DerivationError::Failed { kind: ArtifactKind::MemberValues, .. }));
    }

    #[test]
    fn test_missing_program_fails_to_launch() {
        let dir = tempfile::tempdir().unwrap();
        let d = descriptor(dir.path());
        fs::create_dir_all(&d.paths().base_dir).unwrap();

        let request = AnalysisRequest::new(&d, d.analysis_path());
        let err = backend("/nonexistent/interp_analysis")
            .interpolate_analysis(&request)
            .unwrap_err();
        assert!(matches!(err, DerivationError::Launch { kind: ArtifactKind::Analysis, .. }));
    }

    #[test]
    fn test_mean_fields_need_first_member() {
        let dir = tempfile::tempdir().unwrap();
        let d = descriptor(dir.path());
        fs::create_dir_all(&d.paths().base_dir).unwrap();

        let err = backend("true").compute_mean_fields(d.paths()).unwrap_err();
        assert!(matches!(err, DerivationError::Io { kind: ArtifactKind::MeanFields, .. }));
    }
}
