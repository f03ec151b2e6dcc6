//! File-path conventions for an ensemble run directory.
//!
//! Every artifact location the orchestration reads or writes is derived here
//! from the run initialization time, so a change of naming happens in one
//! place.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::time::RunInit;

pub const DEFAULT_RUNS_ROOT: &str = "/lustre/research/bancell/aucolema/HWT2016runs";
pub const DEFAULT_INNER_REFERENCE: &str = "2016050712/wrfoutREFd2";

pub const SENS_INFILE: &str = "esens.in";
pub const OUTER_REFERENCE: &str = "wrfoutREF";
pub const SENS_OUTFILE: &str = "wrfout.sens";
pub const MEMBER_VALUES_FILE: &str = "SENSvals.nc";
pub const SENS_MEAN_FILE: &str = "SENSmean.out";
pub const RESPONSE_MEAN_FILE: &str = "Rmean.out";
pub const PROBS_DIR: &str = "probs";
pub const PROBS_GRID_FILE: &str = "SUBSETwrfout.prob";

/// Which member set a probability computation ran over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnsembleKind {
    Full,
    Subset,
}

impl EnsembleKind {
    pub fn infile_name(&self) -> &'static str {
        match self {
            EnsembleKind::Full => "fullens_probs.in",
            EnsembleKind::Subset => "subset_probs.in",
        }
    }

    pub fn artifact_name(&self) -> &'static str {
        match self {
            EnsembleKind::Full => "FULLENSwrfout.prob",
            EnsembleKind::Subset => "SUBSETwrfout.prob",
        }
    }
}

/// Where runs live on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathLayout {
    pub runs_root: PathBuf,
    pub inner_reference: PathBuf,
}

impl Default for PathLayout {
    fn default() -> Self {
        PathLayout::new(DEFAULT_RUNS_ROOT)
    }
}

impl PathLayout {
    pub fn new(runs_root: impl Into<PathBuf>) -> Self {
        let runs_root = runs_root.into();
        let inner_reference = runs_root.join(DEFAULT_INNER_REFERENCE);
        PathLayout {
            runs_root,
            inner_reference,
        }
    }

    pub fn with_inner_reference(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner_reference = path.into();
        self
    }

    pub fn derive(&self, run: RunInit) -> RunPaths {
        let base_dir = self.runs_root.join(run.stamp());
        RunPaths {
            sens_infile: base_dir.join(SENS_INFILE),
            outer_reference: base_dir.join(OUTER_REFERENCE),
            inner_reference: self.inner_reference.clone(),
            sens_outfile: base_dir.join(SENS_OUTFILE),
            member_values: base_dir.join(MEMBER_VALUES_FILE),
            sens_mean: base_dir.join(SENS_MEAN_FILE),
            response_mean: base_dir.join(RESPONSE_MEAN_FILE),
            probs_dir: base_dir.join(PROBS_DIR),
            base_dir,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunPaths {
    pub base_dir: PathBuf,
    pub sens_infile: PathBuf,
    pub outer_reference: PathBuf,
    pub inner_reference: PathBuf,
    pub sens_outfile: PathBuf,
    pub member_values: PathBuf,
    pub sens_mean: PathBuf,
    pub response_mean: PathBuf,
    pub probs_dir: PathBuf,
}

impl RunPaths {
    /// Analysis interpolated to the model grid, valid at `valid`.
    pub fn analysis(&self, valid: RunInit) -> PathBuf {
        self.base_dir
            .join(format!("RAP_interp_to_WRF_{}.nc", valid.stamp()))
    }

    pub fn member_dir(&self, member: usize) -> PathBuf {
        self.base_dir.join(MemberFileConvention::member_dir_name(member))
    }

    pub fn probability_infile(&self, kind: EnsembleKind) -> PathBuf {
        self.probs_dir.join(kind.infile_name())
    }

    /// Grid the probability code writes into.
    pub fn probability_grid(&self) -> PathBuf {
        self.probs_dir.join(PROBS_GRID_FILE)
    }

    /// Published probability artifact read by the plotting side.
    pub fn probability_artifact(&self, kind: EnsembleKind) -> PathBuf {
        self.base_dir.join(kind.artifact_name())
    }
}

/// Model output domains written per member.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Domain {
    /// Outer domain, holds the sensitivity variables.
    Outer,
    /// Inner domain, holds the response fields.
    Inner,
}

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::Outer, Domain::Inner];

    pub fn number(&self) -> u8 {
        match self {
            Domain::Outer => 1,
            Domain::Inner => 2,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Domain::Outer => "SENS",
            Domain::Inner => "R",
        }
    }
}

/// Member file naming shared with the external numerical codes.
pub struct MemberFileConvention;

impl MemberFileConvention {
    pub fn member_dir_name(member: usize) -> String {
        format!("mem{}", member)
    }

    /// Raw reduced model output as written by the model.
    pub fn raw_output(member_dir: &Path, domain: Domain, valid: DateTime<Utc>) -> PathBuf {
        member_dir.join(format!(
            "wrfout_d0{}_red_{}",
            domain.number(),
            valid.format("%Y-%m-%d_%H:00:00")
        ))
    }

    pub fn output_name(domain: Domain, member: usize, hour: u32) -> String {
        format!("{}{}_{}.out", domain.prefix(), member, hour)
    }

    /// Renamed output, `SENS<m>_<t>.out` or `R<m>_<t>.out`.
    pub fn output(member_dir: &Path, domain: Domain, member: usize, hour: u32) -> PathBuf {
        member_dir.join(MemberFileConvention::output_name(domain, member, hour))
    }

    /// Member number of a renamed output file name for `domain` at `hour`.
    pub fn parse_output_name(name: &str, domain: Domain, hour: u32) -> Option<usize> {
        let suffix = format!("_{}.out", hour);
        let digits = name.strip_prefix(domain.prefix())?.strip_suffix(suffix.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_name() {
        let name = MemberFileConvention::output_name(Domain::Inner, 17, 24);
        assert_eq!(MemberFileConvention::parse_output_name(&name, Domain::Inner, 24), Some(17));
        assert_eq!(MemberFileConvention::parse_output_name(&name, Domain::Inner, 6), None);
        assert_eq!(MemberFileConvention::parse_output_name("SENS3_24.out", Domain::Inner, 24), None);
        assert_eq!(MemberFileConvention::parse_output_name("SENS3_24.out", Domain::Outer, 24), Some(3));
        assert_eq!(MemberFileConvention::parse_output_name("R_24.out", Domain::Inner, 24), None);
        assert_eq!(MemberFileConvention::parse_output_name("Rmean.out", Domain::Inner, 24), None);
    }

    #[test]
    fn test_derived_paths() {
        let layout = PathLayout::new("/runs");
        let run: RunInit = "2018050312".parse().unwrap();
        let paths = layout.derive(run);
        assert_eq!(paths.base_dir, PathBuf::from("/runs/2018050312"));
        assert_eq!(paths.sens_infile, PathBuf::from("/runs/2018050312/esens.in"));
        assert_eq!(paths.outer_reference, PathBuf::from("/runs/2018050312/wrfoutREF"));
        assert_eq!(paths.sens_outfile, PathBuf::from("/runs/2018050312/wrfout.sens"));
        assert_eq!(paths.member_values, PathBuf::from("/runs/2018050312/SENSvals.nc"));
        assert_eq!(paths.inner_reference, PathBuf::from("/runs/2016050712/wrfoutREFd2"));
        assert_eq!(
            paths.analysis(run.lead(6)),
            PathBuf::from("/runs/2018050312/RAP_interp_to_WRF_2018050318.nc")
        );
    }

    #[test]
    fn test_probability_paths() {
        let paths = PathLayout::new("/runs")
            .with_inner_reference("/ref/d2")
            .derive("2018050300".parse().unwrap());
        assert_eq!(paths.inner_reference, PathBuf::from("/ref/d2"));
        assert_eq!(paths.probability_infile(EnsembleKind::Subset), PathBuf::from("/runs/2018050300/probs/subset_probs.in"));
        assert_eq!(paths.probability_grid(), PathBuf::from("/runs/2018050300/probs/SUBSETwrfout.prob"));
        assert_eq!(paths.probability_artifact(EnsembleKind::Full), PathBuf::from("/runs/2018050300/FULLENSwrfout.prob"));
    }

    #[test]
    fn test_member_convention() {
        let run: RunInit = "2018050312".parse().unwrap();
        let dir = PathBuf::from("/runs/2018050312/mem7");
        assert_eq!(
            MemberFileConvention::raw_output(&dir, Domain::Inner, run.lead(13).datetime()),
            PathBuf::from("/runs/2018050312/mem7/wrfout_d02_red_2018-05-04_01:00:00")
        );
        assert_eq!(MemberFileConvention::output(&dir, Domain::Outer, 7, 0), dir.join("SENS7_0.out"));
        assert_eq!(MemberFileConvention::output_name(Domain::Inner, 12, 24), "R12_24.out");
    }
}
