//! Patch planning: base type resolution, event selection, subclass discovery.
//!
//! Planning is read-only. The produced [`PatchPlan`] carries everything later stages
//! need as owned data, so no borrow into the base assembly survives this stage.

use log::{debug, error, warn};

use crate::{
    image::AssemblyImage,
    metadata::{
        method::MethodAttributes,
        signatures::{MethodSig, TypeSig, SIG_GENERIC, SIG_VARARG},
        tables::{CodedIndexType, TableId},
    },
    patch::PatchOptions,
    resolver::AssemblyResolver,
    Error::MissingBaseType,
    Result,
};

/// Upper bound on extends-chain length; real hierarchies stay far below it, and the
/// bound turns a cyclic chain in a hostile image into a clean negative.
const MAX_CHAIN_DEPTH: usize = 256;

/// One parameter of an event method, copied out of the base assembly.
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub flags: u32,
    pub sequence: u32,
    pub name: String,
}

/// One virtual event method declared on the base type.
#[derive(Debug, Clone)]
pub struct EventMethod {
    pub name: String,
    /// Signature in the base assembly's token context; imported during synthesis.
    pub signature: MethodSig,
    pub params: Vec<ParamDef>,
}

/// A subclass of the base type found in the target assembly.
#[derive(Debug, Clone)]
pub struct CandidateType {
    pub typedef_rid: u32,
    pub full_name: String,
    /// Indexes into [`PatchPlan::events`] of the methods this type lacks.
    pub missing: Vec<usize>,
}

/// The complete, immutable plan of one patch run.
#[derive(Debug, Clone)]
pub struct PatchPlan {
    /// `TypeRef` rid of the base type in the target assembly.
    pub base_typeref_rid: u32,
    /// Simple name of the assembly defining the base type.
    pub base_assembly: String,
    pub events: Vec<EventMethod>,
    pub candidates: Vec<CandidateType>,
}

impl PatchPlan {
    /// Total number of (subclass, missing event) pairs.
    #[must_use]
    pub fn missing_count(&self) -> usize {
        self.candidates.iter().map(|c| c.missing.len()).sum()
    }

    /// Build the plan for `image` under `options`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingBaseType`] when the target assembly holds no
    /// `TypeRef` to the configured base type, [`crate::Error::UnresolvedAssembly`]
    /// when its defining assembly cannot be loaded, and propagates signature or
    /// metadata errors.
    pub fn build(
        image: &AssemblyImage,
        resolver: &mut AssemblyResolver,
        options: &PatchOptions,
    ) -> Result<PatchPlan> {
        let (base_ns, base_name) = options.base_type_parts();

        let Some(base_typeref_rid) = image.find_typeref(base_ns, base_name)? else {
            error!(
                "target assembly has no reference to {}, aborting",
                options.base_type
            );
            return Err(MissingBaseType(options.base_type.clone()));
        };

        let base_assembly = defining_assembly(image, base_typeref_rid)?;
        debug!(
            "base type {} defined in assembly '{}'",
            options.base_type, base_assembly
        );

        let events = {
            let base_image = resolver.resolve(&base_assembly)?;
            collect_events(base_image, base_ns, base_name, &options.prefix)?
        };
        for event in &events {
            debug!(
                "event method {}({} params)",
                event.name,
                event.params.len()
            );
        }

        let candidates = collect_candidates(image, resolver, base_ns, base_name, &events)?;

        Ok(PatchPlan {
            base_typeref_rid,
            base_assembly,
            events,
            candidates,
        })
    }
}

/// Simple name of the assembly a `TypeRef`'s resolution scope points at.
fn defining_assembly(image: &AssemblyImage, typeref_rid: u32) -> Result<String> {
    let scope = image.tables.row(TableId::TypeRef, typeref_rid)?[0];
    let (_, table, rid) = image
        .tables
        .info()
        .decode_coded(CodedIndexType::ResolutionScope, scope)?;

    match table {
        TableId::AssemblyRef => image.assemblyref_name(rid),
        // Module-scoped or nested base types do not occur for Unity Netcode.
        _ => Err(crate::Error::NotSupported),
    }
}

/// Collect the virtual, non-generic, void, prefix-named methods the base type declares.
fn collect_events(
    base_image: &AssemblyImage,
    base_ns: &str,
    base_name: &str,
    prefix: &str,
) -> Result<Vec<EventMethod>> {
    let Some(base_rid) = base_image.find_typedef(base_ns, base_name)? else {
        return Err(crate::Error::Error(format!(
            "base type {base_ns}.{base_name} not defined in its own assembly"
        )));
    };

    let (start, end) = base_image.method_range(base_rid)?;
    let mut events = Vec::new();

    for rid in start..end {
        let name = base_image.method_name(rid)?;
        if !name.starts_with(prefix) {
            continue;
        }

        let flags = MethodAttributes::from_bits_truncate(base_image.method_flags(rid)?);
        if !flags.contains(MethodAttributes::VIRTUAL) || flags.contains(MethodAttributes::STATIC) {
            continue;
        }

        let signature = MethodSig::parse(base_image.method_signature(rid)?)?;
        if signature.calling_convention & SIG_GENERIC != 0 || signature.generic_param_count > 0 {
            debug!("skipping generic event method {}", name);
            continue;
        }
        if signature.calling_convention == SIG_VARARG {
            debug!("skipping vararg event method {}", name);
            continue;
        }
        if signature.return_type != TypeSig::Void {
            debug!("skipping non-void event method {}", name);
            continue;
        }

        let (param_start, param_end) = base_image.param_range(rid)?;
        let mut params = Vec::new();
        let strings = base_image.strings()?;
        for param_rid in param_start..param_end {
            let row = base_image.tables.row(TableId::Param, param_rid)?;
            params.push(ParamDef {
                flags: row[0],
                sequence: row[1],
                name: strings.get(row[2])?.to_string(),
            });
        }

        events.push(EventMethod {
            name,
            signature,
            params,
        });
    }

    Ok(events)
}

/// Walk every `TypeDef`'s extends chain and collect the subclasses of the base type,
/// each with the set of event methods it does not declare.
fn collect_candidates(
    image: &AssemblyImage,
    resolver: &mut AssemblyResolver,
    base_ns: &str,
    base_name: &str,
    events: &[EventMethod],
) -> Result<Vec<CandidateType>> {
    let mut candidates = Vec::new();

    for rid in 1..=image.tables.row_count(TableId::TypeDef) {
        if !chain_reaches_base(image, resolver, rid, base_ns, base_name)? {
            continue;
        }

        let (namespace, name) = image.typedef_name(rid)?;
        let full_name = if namespace.is_empty() {
            name.clone()
        } else {
            format!("{namespace}.{name}")
        };

        let (start, end) = image.method_range(rid)?;
        let mut declared = Vec::with_capacity((end - start) as usize);
        for method_rid in start..end {
            declared.push(image.method_name(method_rid)?);
        }

        // Duplicate detection is by name only, matching the verifier's rule.
        let missing = events
            .iter()
            .enumerate()
            .filter(|(_, event)| !declared.iter().any(|d| *d == event.name))
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        debug!("candidate {} missing {} events", full_name, missing.len());
        candidates.push(CandidateType {
            typedef_rid: rid,
            full_name,
            missing,
        });
    }

    Ok(candidates)
}

/// Position of the extends-chain walk, which may cross assemblies.
enum ChainStep {
    /// A `TypeDef` rid in the target assembly.
    Local(u32),
    /// A `TypeDef` rid in a resolved assembly.
    Remote(String, u32),
}

fn chain_reaches_base(
    image: &AssemblyImage,
    resolver: &mut AssemblyResolver,
    start_rid: u32,
    base_ns: &str,
    base_name: &str,
) -> Result<bool> {
    let mut step = ChainStep::Local(start_rid);

    for _ in 0..MAX_CHAIN_DEPTH {
        let current: &AssemblyImage = match &step {
            ChainStep::Local(_) => image,
            ChainStep::Remote(assembly, _) => resolver.resolve(assembly)?,
        };
        let rid = match &step {
            ChainStep::Local(rid) | ChainStep::Remote(_, rid) => *rid,
        };

        let extends = current.typedef_extends(rid)?;
        if extends >> CodedIndexType::TypeDefOrRef.tag_bits() == 0 {
            return Ok(false);
        }
        let (_, table, base_rid) = current
            .tables
            .info()
            .decode_coded(CodedIndexType::TypeDefOrRef, extends)?;

        match table {
            TableId::TypeDef => {
                let (namespace, name) = current.typedef_name(base_rid)?;
                if namespace == base_ns && name == base_name {
                    return Ok(true);
                }
                step = match step {
                    ChainStep::Local(_) => ChainStep::Local(base_rid),
                    ChainStep::Remote(assembly, _) => ChainStep::Remote(assembly, base_rid),
                };
            }
            TableId::TypeRef => {
                let (namespace, name) = current.typeref_name(base_rid)?;
                if namespace == base_ns && name == base_name {
                    return Ok(true);
                }

                let assembly = match defining_assembly(current, base_rid) {
                    Ok(assembly) => assembly,
                    Err(crate::Error::NotSupported) => return Ok(false),
                    Err(other) => return Err(other),
                };
                let next_rid = {
                    let next_image = match resolver.resolve(&assembly) {
                        Ok(next_image) => next_image,
                        Err(crate::Error::UnresolvedAssembly(missing)) => {
                            warn!(
                                "cannot resolve {missing} while walking the base chain of {namespace}.{name}, treating as non-candidate"
                            );
                            return Ok(false);
                        }
                        Err(other) => return Err(other),
                    };
                    next_image.find_typedef(&namespace, &name)?
                };
                let Some(next_rid) = next_rid else {
                    // Type forwarding or a trimmed reference assembly.
                    warn!(
                        "cannot follow base chain into {assembly} for {namespace}.{name}"
                    );
                    return Ok(false);
                };
                step = ChainStep::Remote(assembly, next_rid);
            }
            // Generic instantiation bases are opaque to the name-based walk.
            _ => return Ok(false),
        }
    }

    warn!("extends chain exceeded {MAX_CHAIN_DEPTH} levels, treating as non-candidate");
    Ok(false)
}

#[cfg(test)]
mod tests {
    // Plan construction needs complete two-assembly fixtures and is covered by the
    // integration tests in tests/patch_roundtrip.rs.
}
