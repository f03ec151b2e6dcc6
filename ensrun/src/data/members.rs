use std::fs;
use std::io;

use enscore::run::descriptor::RunDescriptor;
use enscore::run::paths::{Domain, MemberFileConvention};
use rayon::prelude::*;
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenameSummary {
    pub renamed: usize,
    pub skipped: usize,
}

/// Rename raw member output to the `SENS<m>_<t>.out` / `R<m>_<t>.out`
/// names the numerical codes expect, for every member, forecast hour and
/// domain. A file is only moved when its source exists and its target does
/// not, so the step can be repeated.
pub fn rename_member_outputs(descriptor: &RunDescriptor) -> io::Result<RenameSummary> {
    let paths = descriptor.paths();
    let run = descriptor.run();
    let hours = descriptor.forecast_hours();

    let per_member: Vec<RenameSummary> = descriptor
        .members()
        .into_par_iter()
        .map(|member| -> io::Result<RenameSummary> {
            let member_dir = paths.member_dir(member);
            let mut summary = RenameSummary::default();
            for hour in 0..=hours {
                let valid = run.lead(hour).datetime();
                for domain in Domain::ALL {
                    let raw = MemberFileConvention::raw_output(&member_dir, domain, valid);
                    let renamed = MemberFileConvention::output(&member_dir, domain, member, hour);
                    if raw.is_file() && !renamed.exists() {
                        fs::rename(&raw, &renamed)?;
                        summary.renamed += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }
            }
            Ok(summary)
        })
        .collect::<io::Result<Vec<_>>>()?;

    let total = per_member.iter().fold(RenameSummary::default(), |acc, s| RenameSummary {
        renamed: acc.renamed + s.renamed,
        skipped: acc.skipped + s.skipped,
    });
    info!(renamed = total.renamed, skipped = total.skipped, run = %run, "renamed member output");
    Ok(total)
}
