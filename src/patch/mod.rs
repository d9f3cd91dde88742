//! The patch pass: plan, synthesize, emit.
//!
//! Patching runs in three strictly ordered stages. [`plan`] resolves the base type and
//! computes the (subclass, missing event) pairs without touching anything. [`synth`]
//! mutates the in-memory tables: imported references, interned names and blobs, and
//! the new method definitions with their bodies. [`emit`] performs all row insertion
//! and serialization in one pass and writes the output file. No file is written before
//! emit, so an abort in any earlier stage leaves no output behind.

pub mod emit;
pub mod plan;
pub mod synth;

use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::{image::AssemblyImage, resolver::AssemblyResolver, Result};

/// Default fully-qualified base type.
pub const DEFAULT_BASE_TYPE: &str = "Unity.Netcode.NetworkBehaviour";
/// Default event method name prefix.
pub const DEFAULT_PREFIX: &str = "On";

/// Configuration of a patch run.
#[derive(Debug, Clone)]
pub struct PatchOptions {
    /// Fully-qualified name of the base type whose events are enforced.
    pub base_type: String,
    /// Name prefix selecting event methods on the base type.
    pub prefix: String,
    /// Directory the patched assembly is written into.
    pub cache_dir: PathBuf,
    /// Directories probed when resolving referenced assemblies.
    pub search_dirs: Vec<PathBuf>,
}

impl PatchOptions {
    /// Options with the stock base type and prefix.
    #[must_use]
    pub fn new(cache_dir: PathBuf) -> PatchOptions {
        PatchOptions {
            base_type: DEFAULT_BASE_TYPE.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            cache_dir,
            search_dirs: Vec::new(),
        }
    }

    /// Splits the configured base type into `(namespace, name)`.
    #[must_use]
    pub fn base_type_parts(&self) -> (&str, &str) {
        match self.base_type.rsplit_once('.') {
            Some((namespace, name)) => (namespace, name),
            None => ("", self.base_type.as_str()),
        }
    }
}

/// Result of a completed patch run, threaded into verification.
#[derive(Debug, Clone, Serialize)]
pub struct PatchSummary {
    /// The base type that was resolved.
    pub base_type: String,
    /// Event method names enforced on every subclass.
    pub event_names: Vec<String>,
    /// Full names of the candidate subclasses.
    pub candidate_types: Vec<String>,
    /// Number of methods synthesized across all candidates.
    pub methods_added: usize,
    /// Where the patched assembly was written.
    pub output_path: PathBuf,
    /// Directories referenced assemblies were resolved from, including the input's
    /// own directory. Verification reuses them to re-resolve the base assembly.
    pub search_dirs: Vec<PathBuf>,
}

/// Patch `input` and write the result to the configured cache directory.
///
/// When every candidate already declares every event, the input is copied to the
/// output unchanged; the cache file exists either way.
///
/// # Errors
///
/// Returns [`crate::Error::MissingBaseType`] when the target holds no reference to
/// the configured base type (nothing is written in that case), and propagates every
/// parse, resolution, synthesis, or I/O failure.
pub fn patch_assembly(input: &Path, options: &PatchOptions) -> Result<PatchSummary> {
    info!("patching {}", input.display());

    let mut image = AssemblyImage::open(input)?;
    image.check_list_monotonicity()?;

    let mut search_dirs = options.search_dirs.clone();
    if let Some(parent) = input.parent() {
        search_dirs.push(parent.to_path_buf());
    }
    let mut resolver = AssemblyResolver::new(search_dirs.clone());

    let plan = plan::PatchPlan::build(&image, &mut resolver, options)?;
    info!(
        "{} event methods on {}, {} candidate subclasses, {} methods to add",
        plan.events.len(),
        options.base_type,
        plan.candidates.len(),
        plan.missing_count()
    );

    let file_name = input
        .file_name()
        .ok_or_else(|| crate::Error::Error(format!("no file name in {}", input.display())))?;
    let output_path = options.cache_dir.join(file_name);
    std::fs::create_dir_all(&options.cache_dir)?;

    let methods_added = plan.missing_count();
    if methods_added == 0 {
        // Nothing to synthesize; the cache copy is still expected downstream.
        warn!("all candidates already compliant, copying input unchanged");
        std::fs::copy(input, &output_path)?;
    } else {
        let base_image = resolver.resolve(&plan.base_assembly)?;
        let synthesis = synth::synthesize(&mut image, base_image, &plan)?;
        emit::write_patched(&mut image, synthesis, &output_path)?;
    }

    info!("wrote {}", output_path.display());

    Ok(PatchSummary {
        base_type: options.base_type.clone(),
        event_names: plan.events.iter().map(|e| e.name.clone()).collect(),
        candidate_types: plan.candidates.iter().map(|c| c.full_name.clone()).collect(),
        methods_added,
        output_path,
        search_dirs,
    })
}
