//! Run preparation: everything that has to happen once per run before
//! subsets can be selected.

use std::path::Path;

use enscore::run::descriptor::RunDescriptor;
use tracing::{info, warn};

use crate::data::infile::SensInputDescriptor;
use crate::data::members::{rename_member_outputs, RenameSummary};
use crate::derive::backend::{ArtifactKind, DerivationBackend, SensitivityRequest};
use crate::error::{DerivationError, Result};
use crate::session::subsetting::discard_partial;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrepareSummary {
    pub renamed: RenameSummary,
    pub mean_fields: bool,
    pub sensitivity: bool,
    pub member_values: bool,
}

/// Run one derivation step. A failed step leaves none of its outputs
/// behind; a step reported as done must have produced all of them.
fn derive_step<F>(kind: ArtifactKind, outputs: &[&Path], step: F) -> std::result::Result<(), DerivationError>
where
    F: FnOnce() -> std::result::Result<(), DerivationError>,
{
    if let Err(e) = step() {
        for path in outputs {
            discard_partial(kind, path);
        }
        return Err(e);
    }
    match outputs.iter().find(|path| !path.is_file()) {
        Some(path) => Err(DerivationError::ArtifactMissing {
            kind,
            path: path.to_path_buf(),
        }),
        None => Ok(()),
    }
}

/// Rename member output, write the sensitivity input file, then compute
/// mean fields, sensitivity and member values. Steps whose artifacts
/// already exist are skipped; `force` reruns them.
pub fn prepare_run<B: DerivationBackend>(descriptor: &RunDescriptor, backend: &B, force: bool) -> Result<PrepareSummary> {
    let paths = descriptor.paths();
    info!(run = %descriptor.run(), dir = %paths.base_dir.display(), "preparing run");

    let renamed = rename_member_outputs(descriptor)?;
    if renamed.renamed == 0 {
        warn!(run = %descriptor.run(), "no raw member output renamed");
    }

    SensInputDescriptor::from_descriptor(descriptor, true)
        .write(&paths.sens_infile)
        .map_err(DerivationError::io(ArtifactKind::InputDescriptor, &paths.sens_infile))?;

    let mut summary = PrepareSummary {
        renamed,
        ..PrepareSummary::default()
    };

    if force || !(paths.sens_mean.is_file() && paths.response_mean.is_file()) {
        derive_step(
            ArtifactKind::MeanFields,
            &[paths.sens_mean.as_path(), paths.response_mean.as_path()],
            || backend.compute_mean_fields(paths),
        )?;
        summary.mean_fields = true;
    }

    let request = SensitivityRequest::sensitivity(descriptor);
    if force || !request.output.is_file() {
        derive_step(ArtifactKind::Sensitivity, &[request.output.as_path()], || backend.derive_sensitivity(&request))?;
        summary.sensitivity = true;
    }

    let request = SensitivityRequest::member_values(descriptor);
    if force || !request.output.is_file() {
        derive_step(ArtifactKind::MemberValues, &[request.output.as_path()], || {
            backend.extract_member_values(&request)
        })?;
        summary.member_values = true;
    }

    info!(
        run = %descriptor.run(),
        renamed = summary.renamed.renamed,
        mean_fields = summary.mean_fields,
        sensitivity = summary.sensitivity,
        member_values = summary.member_values,
        "run prepared"
    );
    Ok(summary)
}
