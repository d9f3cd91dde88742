use std::path::{Path, PathBuf};

use anyhow::Context;

use netbehave::{patch::PatchOptions, verify::verify_assembly};

use crate::{app::GlobalOptions, output::print_output};

pub fn run(
    path: &Path,
    base_type: &str,
    prefix: &str,
    search_dirs: &[PathBuf],
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let options = PatchOptions {
        base_type: base_type.to_string(),
        prefix: prefix.to_string(),
        // The verifier only reads; the cache directory is the file's own location.
        cache_dir: path.parent().unwrap_or(Path::new(".")).to_path_buf(),
        search_dirs: search_dirs.to_vec(),
    };

    let report = verify_assembly(path, &options)
        .with_context(|| format!("failed to verify {}", path.display()))?;

    print_output(&report, opts, |report| {
        println!("Base type:      {}", report.base_type);
        println!("Event methods:  {}", report.event_names.join(", "));
        println!("Compliance:     {}/{}", report.compliant, report.total);
        for name in &report.noncompliant {
            println!("  not compliant: {name}");
        }
    })
}
