//! Method synthesis: reference import and pass-through body construction.
//!
//! Every missing event becomes a new `MethodDef` whose body calls the base
//! implementation through a `MemberRef`. The event's signature lives in the base
//! assembly's token context, so each embedded type token is imported into the target:
//! `TypeRef` and `AssemblyRef` rows are found or appended, and the re-encoded blob is
//! interned into the target's heap. Appends only touch tables whose rows are
//! referenced by index from nowhere that would shift (`TypeRef`, `MemberRef`,
//! `AssemblyRef` gain rows at the end), so no remapping happens in this stage.

use std::collections::HashMap;

use log::debug;

use crate::{
    image::AssemblyImage,
    metadata::{
        heaps::{BlobBuilder, StringsBuilder},
        il::build_passthrough_body,
        method::MethodAttributes,
        tables::{CodedIndexType, Row, TableId, TablesStream},
        token::Token,
    },
    patch::plan::PatchPlan,
    Error::{UnresolvedAssembly, UnsupportedSignature},
    Result,
};

/// `AssemblyRef` flag: the blob column holds a full public key, not a token.
const ASSEMBLY_FLAG_PUBLIC_KEY: u32 = 0x0001;

/// One synthesized method, ready for row insertion by the emit stage.
#[derive(Debug, Clone)]
pub struct NewMethod {
    pub owner_typedef_rid: u32,
    pub impl_flags: u32,
    pub flags: u32,
    pub name_index: u32,
    pub sig_index: u32,
    /// Complete encoded body (header plus code); RVA assigned at emit time.
    pub body: Vec<u8>,
    /// `Param` rows: flags, sequence, name index.
    pub params: Vec<Row>,
}

/// Output of the synthesis stage: the new methods plus the grown heaps.
pub struct Synthesis {
    pub new_methods: Vec<NewMethod>,
    pub strings: StringsBuilder,
    pub blobs: BlobBuilder,
}

/// Synthesize every (subclass, missing event) pair of `plan` into `target`.
///
/// # Errors
///
/// Returns [`crate::Error::UnsupportedSignature`] for signature shapes that cannot be
/// imported, [`crate::Error::UnresolvedAssembly`] for scope assemblies absent from
/// both images, and propagates heap or metadata errors.
pub fn synthesize(
    target: &mut AssemblyImage,
    base: &AssemblyImage,
    plan: &PatchPlan,
) -> Result<Synthesis> {
    let mut strings = StringsBuilder::from_existing(target.strings_data());
    let mut blobs = BlobBuilder::from_existing(target.blob_data());

    // Owned lookup caches over the existing rows, so appends below need no re-scan.
    let mut typerefs = HashMap::new();
    {
        let reader = target.strings()?;
        for (index, row) in target.tables.rows(TableId::TypeRef).iter().enumerate() {
            let key = (
                row[0],
                reader.get(row[2])?.to_string(),
                reader.get(row[1])?.to_string(),
            );
            #[allow(clippy::cast_possible_truncation)]
            typerefs.insert(key, index as u32 + 1);
        }
    }

    let mut assemblyrefs = HashMap::new();
    for rid in 1..=target.tables.row_count(TableId::AssemblyRef) {
        assemblyrefs.insert(target.assemblyref_name(rid)?, rid);
    }

    let mut memberrefs = HashMap::new();
    {
        let reader = target.strings()?;
        let blob_reader = target.blobs()?;
        for (index, row) in target.tables.rows(TableId::MemberRef).iter().enumerate() {
            let key = (
                row[0],
                reader.get(row[1])?.to_string(),
                blob_reader.get(row[2])?.to_vec(),
            );
            #[allow(clippy::cast_possible_truncation)]
            memberrefs.insert(key, index as u32 + 1);
        }
    }

    let mut importer = Importer {
        tables: &mut target.tables,
        strings: &mut strings,
        blobs: &mut blobs,
        base,
        base_assembly: &plan.base_assembly,
        typerefs,
        assemblyrefs,
        memberrefs,
    };

    let method_flags =
        MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG | MethodAttributes::VIRTUAL;

    let mut new_methods = Vec::with_capacity(plan.missing_count());
    for candidate in &plan.candidates {
        for &event_index in &candidate.missing {
            let event = &plan.events[event_index];

            let imported = event
                .signature
                .map_tokens(&mut |token| importer.import_type(token))?;
            let sig_bytes = imported.encode();

            let class_coded = importer.tables.info().encode_coded(
                CodedIndexType::MemberRefParent,
                TableId::TypeRef,
                plan.base_typeref_rid,
            )?;
            let member_rid = importer.memberref_for(class_coded, &event.name, &sig_bytes)?;
            let call_target = Token::from_parts(TableId::MemberRef, member_rid);

            #[allow(clippy::cast_possible_truncation)]
            let body = build_passthrough_body(call_target, event.params.len() as u32)?;

            let mut params = Vec::with_capacity(event.params.len());
            for param in &event.params {
                params.push(vec![
                    param.flags,
                    param.sequence,
                    importer.strings.intern(&param.name)?,
                ]);
            }

            debug!(
                "synthesized {}.{} forwarding to MemberRef {}",
                candidate.full_name, event.name, member_rid
            );
            new_methods.push(NewMethod {
                owner_typedef_rid: candidate.typedef_rid,
                impl_flags: 0,
                flags: u32::from(method_flags.bits()),
                name_index: importer.strings.intern(&event.name)?,
                sig_index: importer.blobs.intern(&sig_bytes)?,
                body,
                params,
            });
        }
    }

    Ok(Synthesis {
        new_methods,
        strings,
        blobs,
    })
}

/// Find-or-add importer of base-assembly references into the target tables.
struct Importer<'a> {
    tables: &'a mut TablesStream,
    strings: &'a mut StringsBuilder,
    blobs: &'a mut BlobBuilder,
    base: &'a AssemblyImage,
    base_assembly: &'a str,
    typerefs: HashMap<(u32, String, String), u32>,
    assemblyrefs: HashMap<String, u32>,
    memberrefs: HashMap<(u32, String, Vec<u8>), u32>,
}

impl Importer<'_> {
    /// Translate a `TypeDefOrRef` token from the base assembly's context into the
    /// target's, appending `TypeRef`/`AssemblyRef` rows as needed.
    fn import_type(&mut self, token: Token) -> Result<Token> {
        match token.table() {
            t if t == TableId::TypeDef as u8 => {
                let rid = token.row();
                if self.is_nested_in_base(rid) {
                    return Err(UnsupportedSignature(
                        "nested type in event signature".to_string(),
                    ));
                }

                let (namespace, name) = self.base.typedef_name(rid)?;
                let base_name = self.base_assembly;
                let scope_rid = self.assemblyref_for(base_name)?;
                let scope = self.tables.info().encode_coded(
                    CodedIndexType::ResolutionScope,
                    TableId::AssemblyRef,
                    scope_rid,
                )?;
                let typeref = self.typeref_for(scope, &namespace, &name)?;
                Ok(Token::from_parts(TableId::TypeRef, typeref))
            }
            t if t == TableId::TypeRef as u8 => {
                let (namespace, name) = self.base.typeref_name(token.row())?;
                let base_scope = self.base.tables.row(TableId::TypeRef, token.row())?[0];
                let (_, scope_table, scope_rid) = self
                    .base
                    .tables
                    .info()
                    .decode_coded(CodedIndexType::ResolutionScope, base_scope)?;

                let scope = match scope_table {
                    TableId::AssemblyRef => {
                        let scope_assembly = self.base.assemblyref_name(scope_rid)?;
                        let target_rid = self.assemblyref_for(&scope_assembly)?;
                        self.tables.info().encode_coded(
                            CodedIndexType::ResolutionScope,
                            TableId::AssemblyRef,
                            target_rid,
                        )?
                    }
                    TableId::Module => {
                        // Scoped to the base assembly's own module.
                        let base_name = self.base_assembly;
                        let target_rid = self.assemblyref_for(base_name)?;
                        self.tables.info().encode_coded(
                            CodedIndexType::ResolutionScope,
                            TableId::AssemblyRef,
                            target_rid,
                        )?
                    }
                    TableId::TypeRef => {
                        // Nested type: import the enclosing type first.
                        let enclosing =
                            self.import_type(Token::from_parts(TableId::TypeRef, scope_rid))?;
                        self.tables.info().encode_coded(
                            CodedIndexType::ResolutionScope,
                            TableId::TypeRef,
                            enclosing.row(),
                        )?
                    }
                    _ => {
                        return Err(UnsupportedSignature(format!(
                            "type reference scoped to {scope_table:?}"
                        )))
                    }
                };

                let typeref = self.typeref_for(scope, &namespace, &name)?;
                Ok(Token::from_parts(TableId::TypeRef, typeref))
            }
            _ => Err(UnsupportedSignature(
                "generic instantiation in event signature".to_string(),
            )),
        }
    }

    fn is_nested_in_base(&self, typedef_rid: u32) -> bool {
        self.base
            .tables
            .rows(TableId::NestedClass)
            .iter()
            .any(|row| row[0] == typedef_rid)
    }

    fn typeref_for(&mut self, scope: u32, namespace: &str, name: &str) -> Result<u32> {
        let key = (scope, namespace.to_string(), name.to_string());
        if let Some(rid) = self.typerefs.get(&key) {
            return Ok(*rid);
        }

        let row = vec![scope, self.strings.intern(name)?, self.strings.intern(namespace)?];
        self.tables.rows_mut(TableId::TypeRef).push(row);
        let rid = self.tables.row_count(TableId::TypeRef);
        debug!("added TypeRef {} for {}.{}", rid, namespace, name);
        self.typerefs.insert(key, rid);
        Ok(rid)
    }

    /// Target `AssemblyRef` rid for `name`, copying the row from the base image's
    /// reference tables (or its own `Assembly` row) when the target lacks one.
    fn assemblyref_for(&mut self, name: &str) -> Result<u32> {
        if let Some(rid) = self.assemblyrefs.get(name) {
            return Ok(*rid);
        }

        let row = if let Some(source) = self.find_base_assemblyref(name)? {
            source
        } else if name == self.base_assembly {
            self.assemblyref_from_base_manifest()?
        } else {
            return Err(UnresolvedAssembly(name.to_string()));
        };

        self.tables.rows_mut(TableId::AssemblyRef).push(row);
        let rid = self.tables.row_count(TableId::AssemblyRef);
        debug!("added AssemblyRef {} for '{}'", rid, name);
        self.assemblyrefs.insert(name.to_string(), rid);
        Ok(rid)
    }

    /// Copy of the base image's `AssemblyRef` row named `name`, re-interned into the
    /// target heaps.
    fn find_base_assemblyref(&mut self, name: &str) -> Result<Option<Row>> {
        for rid in 1..=self.base.tables.row_count(TableId::AssemblyRef) {
            if self.base.assemblyref_name(rid)? != name {
                continue;
            }

            let row = self.base.tables.row(TableId::AssemblyRef, rid)?.clone();
            let blob_reader = self.base.blobs()?;
            let string_reader = self.base.strings()?;

            let key_blob = blob_reader.get(row[5])?.to_vec();
            let hash_blob = blob_reader.get(row[8])?.to_vec();
            let culture = string_reader.get(row[7])?.to_string();

            return Ok(Some(vec![
                row[0],
                row[1],
                row[2],
                row[3],
                row[4],
                self.blobs.intern(&key_blob)?,
                self.strings.intern(name)?,
                self.strings.intern(&culture)?,
                self.blobs.intern(&hash_blob)?,
            ]));
        }

        Ok(None)
    }

    /// `AssemblyRef` row describing the base assembly itself, derived from its
    /// `Assembly` manifest row. The full public key is carried with the matching flag.
    fn assemblyref_from_base_manifest(&mut self) -> Result<Row> {
        let manifest = self.base.tables.row(TableId::Assembly, 1)?.clone();
        let key_blob = self.base.blobs()?.get(manifest[6])?.to_vec();
        let culture = self.base.strings()?.get(manifest[8])?.to_string();

        let mut flags = manifest[5];
        if !key_blob.is_empty() {
            flags |= ASSEMBLY_FLAG_PUBLIC_KEY;
        }

        Ok(vec![
            manifest[1],
            manifest[2],
            manifest[3],
            manifest[4],
            flags,
            self.blobs.intern(&key_blob)?,
            self.strings.intern(self.base_assembly)?,
            self.strings.intern(&culture)?,
            self.blobs.intern(&[])?,
        ])
    }

    fn memberref_for(&mut self, class: u32, name: &str, signature: &[u8]) -> Result<u32> {
        let key = (class, name.to_string(), signature.to_vec());
        if let Some(rid) = self.memberrefs.get(&key) {
            return Ok(*rid);
        }

        let row = vec![
            class,
            self.strings.intern(name)?,
            self.blobs.intern(signature)?,
        ];
        self.tables.rows_mut(TableId::MemberRef).push(row);
        let rid = self.tables.row_count(TableId::MemberRef);
        self.memberrefs.insert(key, rid);
        Ok(rid)
    }
}

#[cfg(test)]
mod tests {
    // Reference import against real two-assembly fixtures is exercised by the
    // integration tests; see tests/patch_roundtrip.rs.
}
