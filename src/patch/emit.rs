//! Assembly rewriting: row insertion, rid remapping, section layout, header patching.
//!
//! The writer never relocates existing method bodies. The original file bytes are the
//! base of the output; embedded `MethodDef` tokens inside existing IL are patched in
//! place, and everything new (synthesized bodies plus the rebuilt metadata block) goes
//! into one appended PE section. `MethodDef` and `Param` rows are inserted directly
//! after their owner's existing run, which keeps the old-to-new rid mapping monotone;
//! after remapping, the handful of tables whose binary-search key involves a coded
//! index over the renumbered tables are re-sorted.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use log::{debug, info};

use crate::{
    file::io::write_le_at,
    image::AssemblyImage,
    metadata::{
        il::{patch_methoddef_tokens, MethodBody, BODY_FORMAT_FAT},
        root::build_metadata,
        tables::{Row, TableId},
        token::Token,
    },
    patch::synth::Synthesis,
    pe::{align_up, PeInfo, SECTION_HEADER_SIZE},
    Error::NotSupported,
    Result,
};

/// Name of the appended section.
const SECTION_NAME: [u8; 8] = *b".nbpatch";
/// `IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ`.
const SECTION_CHARACTERISTICS: u32 = 0x4000_0040;
/// Heap size threshold above which 4-byte indexes are required.
const WIDE_HEAP_THRESHOLD: usize = 0x10000;
/// `MethodImplAttributes` code type mask; zero means IL.
const IMPL_CODE_TYPE_MASK: u32 = 0x3;

/// One position in the rebuilt `MethodDef` (or `Param`) ordering.
enum Slot {
    /// Existing row, identified by its old rid.
    Old(u32),
    /// Synthesized row, identified by its index in the synthesis output.
    New(usize),
}

/// Rewrite `image` with the synthesized methods and write the result to `output`.
///
/// # Errors
///
/// Returns [`crate::Error::NotSupported`] when the image's ownership ranges do not
/// cover every `MethodDef`/`Param` row, and propagates serialization and I/O errors.
pub fn write_patched(
    image: &mut AssemblyImage,
    synthesis: Synthesis,
    output: &Path,
) -> Result<()> {
    let Synthesis {
        new_methods,
        strings,
        blobs,
    } = synthesis;

    // Synthesized methods grouped by owner, preserving synthesis order.
    let mut added: HashMap<u32, Vec<usize>> = HashMap::new();
    for (index, method) in new_methods.iter().enumerate() {
        added.entry(method.owner_typedef_rid).or_default().push(index);
    }

    let typedef_count = image.tables.row_count(TableId::TypeDef);
    let old_method_count = image.tables.row_count(TableId::MethodDef);
    let old_param_count = image.tables.row_count(TableId::Param);

    // RVA and impl flags of every original method, needed for IL patching after the
    // table contents have been rebuilt.
    let old_bodies: Vec<(u32, u32)> = image
        .tables
        .rows(TableId::MethodDef)
        .iter()
        .map(|row| (row[0], row[1]))
        .collect();

    // Pass 1: the new MethodDef ordering and the per-typedef method_list starts.
    let mut method_order = Vec::with_capacity(old_method_count as usize + new_methods.len());
    let mut method_map = HashMap::new();
    let mut method_list = vec![0u32; typedef_count as usize];
    let mut next_method = 1u32;
    for rid in 1..=typedef_count {
        let (start, end) = image.method_range(rid)?;
        method_list[rid as usize - 1] = next_method;

        for old in start..end {
            method_map.insert(old, next_method);
            method_order.push(Slot::Old(old));
            next_method += 1;
        }
        if let Some(indexes) = added.get(&rid) {
            for &index in indexes {
                method_order.push(Slot::New(index));
                next_method += 1;
            }
        }
    }
    if method_map.len() != old_method_count as usize {
        // Methods outside every typedef's range cannot be renumbered safely.
        return Err(NotSupported);
    }

    // Pass 2: the new Param ordering, driven by the new method order.
    let mut param_order = Vec::new();
    let mut param_map = HashMap::new();
    let mut param_list = vec![0u32; method_order.len()];
    let mut next_param = 1u32;
    for (position, slot) in method_order.iter().enumerate() {
        param_list[position] = next_param;
        match slot {
            Slot::Old(old_rid) => {
                let (start, end) = image.param_range(*old_rid)?;
                for old in start..end {
                    param_map.insert(old, next_param);
                    param_order.push(Slot::Old(old));
                    next_param += 1;
                }
            }
            Slot::New(index) => {
                for param_index in 0..new_methods[*index].params.len() {
                    param_order.push(Slot::New(*index * 256 + param_index));
                    next_param += 1;
                }
            }
        }
    }
    if param_map.len() != old_param_count as usize {
        return Err(NotSupported);
    }

    // Materialize the new tables. New method rows carry an RVA placeholder that the
    // section layout below fills in.
    let mut method_rows: Vec<Row> = Vec::with_capacity(method_order.len());
    let mut rva_fixups = Vec::with_capacity(new_methods.len());
    for (position, slot) in method_order.iter().enumerate() {
        match slot {
            Slot::Old(old_rid) => {
                let mut row = image.tables.row(TableId::MethodDef, *old_rid)?.clone();
                row[5] = param_list[position];
                method_rows.push(row);
            }
            Slot::New(index) => {
                let method = &new_methods[*index];
                rva_fixups.push((position, *index));
                method_rows.push(vec![
                    0,
                    method.impl_flags,
                    method.flags,
                    method.name_index,
                    method.sig_index,
                    param_list[position],
                ]);
            }
        }
    }

    let mut param_rows: Vec<Row> = Vec::with_capacity(param_order.len());
    for slot in &param_order {
        match slot {
            Slot::Old(old_rid) => {
                param_rows.push(image.tables.row(TableId::Param, *old_rid)?.clone());
            }
            Slot::New(packed) => {
                let method = &new_methods[packed / 256];
                param_rows.push(method.params[packed % 256].clone());
            }
        }
    }

    image.tables.set_rows(TableId::MethodDef, method_rows);
    image.tables.set_rows(TableId::Param, param_rows);
    for (position, start) in method_list.iter().enumerate() {
        image.tables.rows_mut(TableId::TypeDef)[position][5] = *start;
    }

    image.tables.remap_references(TableId::MethodDef, &method_map)?;
    image.tables.remap_references(TableId::Param, &param_map)?;
    resort_keyed_tables(image)?;

    // The output starts as a byte copy of the input; existing bodies stay put.
    let mut out = image.file().data().to_vec();
    patch_existing_bodies(&mut out, image.file().pe(), &old_bodies, &method_map)?;

    let cor20 = image.cor20().clone();
    if Token::new(cor20.entry_point_token).table() == TableId::MethodDef as u8 {
        let rid = Token::new(cor20.entry_point_token).row();
        if let Some(new_rid) = method_map.get(&rid) {
            let token = Token::from_parts(TableId::MethodDef, *new_rid);
            write_le_at::<u32>(&mut out, &mut cor20.entry_point_offset(), token.value())?;
        }
    }

    // Section layout: bodies first, then the rebuilt metadata, both 4-aligned.
    let pe = image.file().pe().clone();
    let section_rva = pe.next_free_rva();

    let mut section = Vec::new();
    for (position, index) in rva_fixups {
        let body = &new_methods[index].body;
        if body[0] & 0x3 == BODY_FORMAT_FAT {
            while section.len() % 4 != 0 {
                section.push(0);
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        let rva = section_rva + section.len() as u32;
        image.tables.rows_mut(TableId::MethodDef)[position][0] = rva;
        section.extend_from_slice(body);
    }
    while section.len() % 4 != 0 {
        section.push(0);
    }
    let metadata_start = section.len();

    let wide_str = strings.is_wide();
    let wide_blob = blobs.is_wide();
    let guid_data = image.guid_data().to_vec();
    let us_data = image.us_data().to_vec();
    let wide_guid = guid_data.len() >= WIDE_HEAP_THRESHOLD;

    let tables_bytes = image.tables.serialize(wide_str, wide_guid, wide_blob)?;

    let mut streams = vec![
        ("#~".to_string(), tables_bytes),
        ("#Strings".to_string(), strings.into_bytes()),
    ];
    if image.root().stream("#US").is_some() {
        streams.push(("#US".to_string(), us_data));
    }
    if image.root().stream("#GUID").is_some() {
        streams.push(("#GUID".to_string(), guid_data));
    }
    streams.push(("#Blob".to_string(), blobs.into_bytes()));

    let metadata = build_metadata(&image.root().version, image.root().flags, &streams);
    #[allow(clippy::cast_possible_truncation)]
    let metadata_size = metadata.len() as u32;
    section.extend_from_slice(&metadata);

    // Append the section raw data at the next file-aligned offset.
    let raw_pointer = pe.next_free_file_offset(out.len());
    #[allow(clippy::cast_possible_truncation)]
    let virtual_size = section.len() as u32;
    let raw_size = align_up(virtual_size, pe.file_alignment);
    out.resize(raw_pointer as usize, 0);
    out.extend_from_slice(&section);
    out.resize(raw_pointer as usize + raw_size as usize, 0);

    write_section_header(
        &mut out,
        &pe,
        virtual_size,
        section_rva,
        raw_size,
        raw_pointer,
    )?;

    // COFF and optional header fixups.
    write_le_at::<u16>(
        &mut out,
        &mut pe.number_of_sections_offset(),
        pe.number_of_sections + 1,
    )?;
    write_le_at::<u32>(
        &mut out,
        &mut pe.size_of_image_offset(),
        align_up(section_rva + virtual_size, pe.section_alignment),
    )?;
    // A stale checksum would fail strong validation; zero means unchecked.
    write_le_at::<u32>(&mut out, &mut pe.checksum_offset(), 0)?;

    // Point the COR20 MetaData directory at the rebuilt block.
    #[allow(clippy::cast_possible_truncation)]
    let metadata_rva = section_rva + metadata_start as u32;
    let mut directory = cor20.metadata_directory_offset();
    write_le_at::<u32>(&mut out, &mut directory, metadata_rva)?;
    write_le_at::<u32>(&mut out, &mut directory, metadata_size)?;

    std::fs::write(output, &out)?;
    info!(
        "emitted {} new methods, metadata {} bytes at rva {:#x}",
        new_methods.len(),
        metadata_size,
        metadata_rva
    );

    Ok(())
}

/// Rewrite `MethodDef` tokens inside every original IL body, in place.
fn patch_existing_bodies(
    out: &mut [u8],
    pe: &PeInfo,
    old_bodies: &[(u32, u32)],
    method_map: &HashMap<u32, u32>,
) -> Result<()> {
    let mut visited = HashSet::new();
    let mut patched = 0usize;

    for (rva, impl_flags) in old_bodies {
        if *rva == 0 || impl_flags & IMPL_CODE_TYPE_MASK != 0 {
            continue;
        }

        let offset = pe.rva_to_offset(*rva)?;
        // Compiler-deduplicated bodies share an RVA; walk each stream once.
        if !visited.insert(offset) {
            continue;
        }

        let body = MethodBody::parse(out, offset)?;
        let code_start = offset + body.header_size as usize;
        let code = &mut out[code_start..code_start + body.code_size as usize];
        patched += patch_methoddef_tokens(code, method_map)?;
    }

    debug!("rewrote {} IL tokens across {} bodies", patched, visited.len());
    Ok(())
}

fn write_section_header(
    out: &mut [u8],
    pe: &PeInfo,
    virtual_size: u32,
    virtual_address: u32,
    raw_size: u32,
    raw_pointer: u32,
) -> Result<()> {
    let header =
        pe.section_table_offset + pe.number_of_sections as usize * SECTION_HEADER_SIZE;
    if header + SECTION_HEADER_SIZE > pe.size_of_headers as usize {
        return Err(malformed_error!(
            "no room in the header area for another section entry"
        ));
    }

    out[header..header + 8].copy_from_slice(&SECTION_NAME);
    let mut offset = header + 8;
    write_le_at::<u32>(out, &mut offset, virtual_size)?;
    write_le_at::<u32>(out, &mut offset, virtual_address)?;
    write_le_at::<u32>(out, &mut offset, raw_size)?;
    write_le_at::<u32>(out, &mut offset, raw_pointer)?;
    // Relocation and line number fields stay zero.
    write_le_at::<u32>(out, &mut offset, 0)?;
    write_le_at::<u32>(out, &mut offset, 0)?;
    write_le_at::<u32>(out, &mut offset, 0)?;
    write_le_at::<u32>(out, &mut offset, SECTION_CHARACTERISTICS)?;

    Ok(())
}

/// Re-sort the tables whose binary-search key ranges over a renumbered table, then
/// chase the rid moves into the tables that reference them.
fn resort_keyed_tables(image: &mut AssemblyImage) -> Result<()> {
    let tables = &mut image.tables;

    // Keys over Param (Constant, FieldMarshal) and MethodDef (ImplMap).
    tables.sort_table_by_key(TableId::Constant, |row| u64::from(row[2]));
    tables.sort_table_by_key(TableId::FieldMarshal, |row| u64::from(row[0]));
    tables.sort_table_by_key(TableId::ImplMap, |row| u64::from(row[1]));

    // DeclSecurity and GenericParam rows are themselves referenced through coded
    // indexes, so their moves cascade.
    if let Some(moved) = tables.sort_table_by_key(TableId::DeclSecurity, |row| u64::from(row[1]))
    {
        tables.remap_references(TableId::DeclSecurity, &moved)?;
    }
    if let Some(moved) = tables.sort_table_by_key(TableId::GenericParam, |row| {
        (u64::from(row[2]) << 32) | u64::from(row[0])
    }) {
        tables.remap_references(TableId::GenericParam, &moved)?;
    }

    tables.sort_table_by_key(TableId::GenericParamConstraint, |row| u64::from(row[0]));
    // CustomAttribute last: its parent group spans nearly everything above.
    tables.sort_table_by_key(TableId::CustomAttribute, |row| u64::from(row[0]));

    Ok(())
}

#[cfg(test)]
mod tests {
    // The writer is exercised end to end (emit, reload, verify) by the integration
    // tests in tests/patch_roundtrip.rs.
}
