use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use netbehave::{
    patch::{patch_assembly, PatchOptions},
    verify::verify_patch,
    PatchSummary, VerifyReport,
};

use crate::{app::GlobalOptions, output::print_output};

/// File name looked up when a directory is given instead of an assembly.
const DEFAULT_TARGET_FILE: &str = "Assembly-CSharp.dll";

#[derive(Debug, Serialize)]
struct PatchOutput {
    summary: PatchSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<VerifyReport>,
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    path: &Path,
    base_type: &str,
    prefix: &str,
    cache_dir: &Path,
    search_dirs: &[PathBuf],
    no_verify: bool,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let input = if path.is_dir() {
        path.join(DEFAULT_TARGET_FILE)
    } else {
        path.to_path_buf()
    };

    let options = PatchOptions {
        base_type: base_type.to_string(),
        prefix: prefix.to_string(),
        cache_dir: cache_dir.to_path_buf(),
        search_dirs: search_dirs.to_vec(),
    };

    let summary = patch_assembly(&input, &options)
        .with_context(|| format!("failed to patch {}", input.display()))?;

    let report = if no_verify {
        None
    } else {
        Some(
            verify_patch(&summary, &options)
                .with_context(|| format!("failed to verify {}", summary.output_path.display()))?,
        )
    };

    let data = PatchOutput { summary, report };
    print_output(&data, opts, |data| {
        println!("Base type:      {}", data.summary.base_type);
        println!("Event methods:  {}", data.summary.event_names.join(", "));
        println!("Candidates:     {}", data.summary.candidate_types.len());
        println!("Methods added:  {}", data.summary.methods_added);
        println!("Output:         {}", data.summary.output_path.display());
        if let Some(report) = &data.report {
            println!("Compliance:     {}/{}", report.compliant, report.total);
            for name in &report.noncompliant {
                println!("  not compliant: {name}");
            }
        }
    })
}
