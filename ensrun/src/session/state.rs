//! Session progress as a function of the artifacts on disk.
//!
//! Nothing here touches the filesystem except [`ArtifactPresence::observe`].
//! Planning is pure: given one observation it names the state reached and
//! the next external effect to run. The observation can go stale between
//! planning and acting (another process may produce or delete an artifact
//! in between), so callers re-observe after every effect.

use std::path::Path;

use enscore::run::paths::RunPaths;

use crate::derive::backend::ArtifactKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    Initialized,
    AnalysisReady,
    SensitivityReady,
    MemberValuesReady,
    SubsetComputed,
}

/// One look at the run directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArtifactPresence {
    pub analysis: bool,
    pub input_descriptor: bool,
    pub sensitivity: bool,
    pub member_values: bool,
}

impl ArtifactPresence {
    pub fn observe(paths: &RunPaths, analysis: &Path) -> Self {
        ArtifactPresence {
            analysis: analysis.is_file(),
            input_descriptor: paths.sens_infile.is_file(),
            sensitivity: paths.sens_outfile.is_file(),
            member_values: paths.member_values.is_file(),
        }
    }

    pub fn any_derived(&self) -> bool {
        self.analysis || self.sensitivity || self.member_values
    }
}

/// External work the session has to trigger next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Effect {
    InterpolateAnalysis,
    WriteInputDescriptor,
    DeriveSensitivity,
    ExtractMemberValues,
    SelectSubset,
}

impl Effect {
    /// Artifact the effect is expected to leave behind.
    pub fn produces(&self) -> Option<ArtifactKind> {
        match self {
            Effect::InterpolateAnalysis => Some(ArtifactKind::Analysis),
            Effect::WriteInputDescriptor => Some(ArtifactKind::InputDescriptor),
            Effect::DeriveSensitivity => Some(ArtifactKind::Sensitivity),
            Effect::ExtractMemberValues => Some(ArtifactKind::MemberValues),
            Effect::SelectSubset => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Plan {
    pub state: SessionState,
    pub effect: Effect,
}

/// State reached and next effect for an observation. `subset_computed`
/// says whether the session already holds a selection.
pub fn plan(presence: ArtifactPresence, subset_computed: bool) -> Plan {
    let (state, effect) = if !presence.analysis {
        (SessionState::Initialized, Effect::InterpolateAnalysis)
    } else if !presence.sensitivity {
        let effect = if presence.input_descriptor {
            Effect::DeriveSensitivity
        } else {
            Effect::WriteInputDescriptor
        };
        (SessionState::AnalysisReady, effect)
    } else if !presence.member_values {
        let effect = if presence.input_descriptor {
            Effect::ExtractMemberValues
        } else {
            Effect::WriteInputDescriptor
        };
        (SessionState::SensitivityReady, effect)
    } else if subset_computed {
        (SessionState::SubsetComputed, Effect::SelectSubset)
    } else {
        (SessionState::MemberValuesReady, Effect::SelectSubset)
    };
    Plan { state, effect }
}
