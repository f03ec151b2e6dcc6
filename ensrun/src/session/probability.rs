use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use enscore::error::ConfigError;
use enscore::run::descriptor::RunDescriptor;
use enscore::run::paths::{Domain, EnsembleKind, MemberFileConvention};
use itertools::Itertools;
use tracing::debug;

use crate::derive::backend::ArtifactKind;
use crate::error::DerivationError;

/// Probability computation over an explicit member set.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbabilityRequest {
    pub kind: EnsembleKind,
    pub members: Vec<usize>,
    pub response_hour: u32,
    pub base_dir: PathBuf,
    pub probs_dir: PathBuf,
    pub infile: PathBuf,
    pub inner_reference: PathBuf,
    /// Grid the probability code writes into.
    pub grid: PathBuf,
    /// Published artifact for the plotting side.
    pub output: PathBuf,
}

impl ProbabilityRequest {
    /// Members are 1-based and must be distinct; the request is a full
    /// ensemble request exactly when every member is listed.
    pub fn new(descriptor: &RunDescriptor, members: &[usize]) -> Result<Self, ConfigError> {
        let n = descriptor.ensemble_size();
        if members.is_empty() {
            return Err(ConfigError::InvalidMemberSet("no members given".to_string()));
        }
        if let Some(m) = members.iter().find(|&&m| !descriptor.members().contains(&m)) {
            return Err(ConfigError::InvalidMemberSet(format!("member {} outside 1..={}", m, n)));
        }
        if !members.iter().all_unique() {
            return Err(ConfigError::InvalidMemberSet(format!("duplicate members in {:?}", members)));
        }

        let kind = if members.len() == n {
            EnsembleKind::Full
        } else {
            EnsembleKind::Subset
        };
        let paths = descriptor.paths();
        Ok(ProbabilityRequest {
            kind,
            members: members.to_vec(),
            response_hour: descriptor.response_hour(),
            base_dir: paths.base_dir.clone(),
            probs_dir: paths.probs_dir.clone(),
            infile: paths.probability_infile(kind),
            inner_reference: paths.inner_reference.clone(),
            grid: paths.probability_grid(),
            output: paths.probability_artifact(kind),
        })
    }

    /// Member count, then response hour.
    pub fn render_infile(&self) -> String {
        format!("{}\n{}\n", self.members.len(), self.response_hour)
    }

    /// Response file of `member` inside the probability directory.
    pub fn staged_member(&self, member: usize) -> PathBuf {
        self.probs_dir
            .join(MemberFileConvention::output_name(Domain::Inner, member, self.response_hour))
    }

    /// Prepare the probability directory: response files of other members
    /// and any earlier published artifact removed, member response files
    /// copied in, input file written, output grid seeded from the inner
    /// reference.
    pub fn stage(&self) -> Result<(), DerivationError> {
        let io = |path: &PathBuf| DerivationError::io(ArtifactKind::Probabilities, path.clone());

        fs::create_dir_all(&self.probs_dir).map_err(io(&self.probs_dir))?;
        let removed = self.remove_stale_members()?;
        remove_if_present(&self.output).map_err(io(&self.output))?;

        for &member in &self.members {
            let source = MemberFileConvention::output(
                &self.base_dir.join(MemberFileConvention::member_dir_name(member)),
                Domain::Inner,
                member,
                self.response_hour,
            );
            fs::copy(&source, self.staged_member(member)).map_err(io(&source))?;
        }
        fs::write(&self.infile, self.render_infile()).map_err(io(&self.infile))?;
        fs::copy(&self.inner_reference, &self.grid).map_err(io(&self.inner_reference))?;
        debug!(
            kind = ?self.kind,
            members = self.members.len(),
            removed,
            dir = %self.probs_dir.display(),
            "staged probability inputs"
        );
        Ok(())
    }

    /// Delete staged response files of members outside this request. The
    /// probability code counts every staged file.
    fn remove_stale_members(&self) -> Result<usize, DerivationError> {
        let kind = ArtifactKind::Probabilities;
        let mut removed = 0;
        for entry in fs::read_dir(&self.probs_dir).map_err(DerivationError::io(kind, &self.probs_dir))? {
            let entry = entry.map_err(DerivationError::io(kind, &self.probs_dir))?;
            let name = entry.file_name();
            let stale = name
                .to_str()
                .and_then(|name| MemberFileConvention::parse_output_name(name, Domain::Inner, self.response_hour))
                .is_some_and(|member| !self.members.contains(&member));
            if stale {
                let path = entry.path();
                fs::remove_file(&path).map_err(DerivationError::io(kind, &path))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use enscore::run::paths::PathLayout;

    fn descriptor(root: &std::path::Path) -> RunDescriptor {
        RunDescriptor::builder(
            PathLayout::new(root).with_inner_reference(root.join("wrfoutREFd2")),
            Utc.with_ymd_and_hms(2018, 5, 3, 14, 0, 0).unwrap(),
        )
        .ensemble_size(3)
        .build()
        .unwrap()
    }

    #[test]
    fn test_kind_follows_member_set() {
        let d = descriptor(std::path::Path::new("/runs"));
        let full = ProbabilityRequest::new(&d, &[3, 1, 2]).unwrap();
        assert_eq!(full.kind, EnsembleKind::Full);
        assert_eq!(full.infile, PathBuf::from("/runs/2018050312/probs/fullens_probs.in"));
        assert_eq!(full.output, PathBuf::from("/runs/2018050312/FULLENSwrfout.prob"));

        let subset = ProbabilityRequest::new(&d, &[2]).unwrap();
        assert_eq!(subset.kind, EnsembleKind::Subset);
        assert_eq!(subset.render_infile(), "1\n24\n");
    }

    #[test]
    fn test_rejects_bad_member_sets() {
        let d = descriptor(std::path::Path::new("/runs"));
        assert!(ProbabilityRequest::new(&d, &[]).is_err());
        assert!(ProbabilityRequest::new(&d, &[0]).is_err());
        assert!(ProbabilityRequest::new(&d, &[4]).is_err());
        assert!(ProbabilityRequest::new(&d, &[1, 1]).is_err());
    }

    #[test]
    fn test_stage_copies_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let d = descriptor(dir.path());
        fs::write(dir.path().join("wrfoutREFd2"), "ref").unwrap();
        for m in 1..=3 {
            let member_dir = d.paths().member_dir(m);
            fs::create_dir_all(&member_dir).unwrap();
            fs::write(member_dir.join(format!("R{}_24.out", m)), format!("member {}", m)).unwrap();
        }

        let request = ProbabilityRequest::new(&d, &[1, 3]).unwrap();
        request.stage().unwrap();
        assert_eq!(fs::read_to_string(request.staged_member(3)).unwrap(), "member 3");
        assert!(!request.staged_member(2).exists());
        assert_eq!(fs::read_to_string(&request.infile).unwrap(), "2\n24\n");
        assert_eq!(fs::read_to_string(&request.grid).unwrap(), "ref");
    }

    #[test]
    fn test_stage_removes_members_of_earlier_requests() {
        let dir = tempfile::tempdir().unwrap();
        let d = descriptor(dir.path());
        fs::write(dir.path().join("wrfoutREFd2"), "ref").unwrap();
        for m in 1..=3 {
            let member_dir = d.paths().member_dir(m);
            fs::create_dir_all(&member_dir).unwrap();
            fs::write(member_dir.join(format!("R{}_24.out", m)), format!("member {}", m)).unwrap();
        }

        let full = ProbabilityRequest::new(&d, &[1, 2, 3]).unwrap();
        full.stage().unwrap();
        fs::write(&full.output, "full probabilities").unwrap();
        // other lead times are not part of this request
        fs::write(d.paths().probs_dir.join("R1_12.out"), "older").unwrap();

        let subset = ProbabilityRequest::new(&d, &[2]).unwrap();
        subset.stage().unwrap();
        let mut staged: Vec<String> = fs::read_dir(&subset.probs_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.starts_with('R'))
            .collect();
        staged.sort();
        assert_eq!(staged, vec!["R1_12.out", "R2_24.out"]);
        assert!(full.output.is_file());

        // restaging the same set clears its previous artifact
        full.stage().unwrap();
        assert!(!full.output.exists());
        assert!(full.staged_member(1).is_file());
    }

    #[test]
    fn test_stage_reports_missing_member_file() {
        let dir = tempfile::tempdir().unwrap();
        let d = descriptor(dir.path());
        let request = ProbabilityRequest::new(&d, &[1]).unwrap();
        let err = request.stage().unwrap_err();
        assert_eq!(err.kind(), ArtifactKind::Probabilities);
    }
}
