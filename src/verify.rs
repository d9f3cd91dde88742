//! Post-patch verification.
//!
//! Verification never trusts the patch pass: it re-opens the written file through the
//! normal load path, re-derives the candidate subclass set with the same predicate the
//! planner uses, and checks each candidate's declared method names against the event
//! set. It only observes and reports; non-compliance is logged, never fixed and never
//! fatal.

use std::path::Path;

use log::{error, info, warn};
use serde::Serialize;

use crate::{
    image::AssemblyImage,
    patch::{plan::PatchPlan, PatchOptions, PatchSummary},
    resolver::AssemblyResolver,
    Error::{MissingBaseType, MissingPatchState},
    Result,
};

/// Compliance report over a patched assembly.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    /// The base type the check ran against.
    pub base_type: String,
    /// Event method names every candidate must declare.
    pub event_names: Vec<String>,
    /// Number of candidate subclasses found.
    pub total: usize,
    /// Number of candidates declaring every event name.
    pub compliant: usize,
    /// Full names of the candidates still missing events.
    pub noncompliant: Vec<String>,
}

impl VerifyReport {
    /// Whether every candidate is compliant.
    #[must_use]
    pub fn is_fully_compliant(&self) -> bool {
        self.compliant == self.total
    }
}

/// Verify the patched assembly at `path` under the same options the patch ran with.
///
/// # Errors
///
/// Returns [`crate::Error::MissingPatchState`] when the file does not exist or no
/// longer references the base type, and propagates parse or resolution failures.
pub fn verify_assembly(path: &Path, options: &PatchOptions) -> Result<VerifyReport> {
    if !path.is_file() {
        error!("patched assembly {} is missing, skipping verification", path.display());
        return Err(MissingPatchState(path.display().to_string()));
    }

    let image = AssemblyImage::open(path)?;

    let mut resolver = AssemblyResolver::new(options.search_dirs.clone());
    if let Some(parent) = path.parent() {
        resolver.add_search_dir(parent);
    }

    let plan = match PatchPlan::build(&image, &mut resolver, options) {
        Ok(plan) => plan,
        Err(MissingBaseType(name)) => {
            error!("base type {name} not found in patched output, skipping verification");
            return Err(MissingPatchState(name));
        }
        Err(other) => return Err(other),
    };

    let mut noncompliant = Vec::new();
    for candidate in &plan.candidates {
        // Check name presence against the written file directly rather than
        // trusting the planner's missing sets.
        let (start, end) = image.method_range(candidate.typedef_rid)?;
        let mut declared = Vec::with_capacity((end - start) as usize);
        for rid in start..end {
            declared.push(image.method_name(rid)?);
        }

        let missing: Vec<&str> = plan
            .events
            .iter()
            .map(|event| event.name.as_str())
            .filter(|&name| !declared.iter().any(|method| method == name))
            .collect();
        if missing.is_empty() {
            continue;
        }

        warn!(
            "{} is missing {} event methods: {}",
            candidate.full_name,
            missing.len(),
            missing.join(", ")
        );
        noncompliant.push(candidate.full_name.clone());
    }

    let total = plan.candidates.len();
    let compliant = total - noncompliant.len();
    info!("{compliant}/{total} candidate types in compliance");

    Ok(VerifyReport {
        base_type: options.base_type.clone(),
        event_names: plan.events.iter().map(|e| e.name.clone()).collect(),
        total,
        compliant,
        noncompliant,
    })
}

/// Verify the output of a completed patch run.
///
/// References are re-resolved through the directories the patch run itself used, so
/// the base assembly next to the original input stays visible even when the options
/// name no search directories.
///
/// # Errors
///
/// Same as [`verify_assembly`].
pub fn verify_patch(summary: &PatchSummary, options: &PatchOptions) -> Result<VerifyReport> {
    let mut options = options.clone();
    for dir in &summary.search_dirs {
        if !options.search_dirs.contains(dir) {
            options.search_dirs.push(dir.clone());
        }
    }

    verify_assembly(&summary.output_path, &options)
}
