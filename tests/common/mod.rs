//! Fixture assemblies for integration tests.
//!
//! [`AssemblyFixture`] assembles a minimal but structurally valid .NET DLL from
//! scratch: DOS stub, PE32 headers, one `.text` section holding the COR20 header,
//! the method bodies, and the metadata block. The layout is fixed (headers in the
//! first 0x200 bytes, section at RVA 0x2000) since nothing in the tests needs more
//! than one section.

use std::collections::HashMap;

use netbehave::metadata::{
    heaps::{BlobBuilder, StringsBuilder},
    root::build_metadata,
    tables::{TableId, TablesStream},
};

/// RVA of the single `.text` section.
const SECTION_RVA: u32 = 0x2000;
/// File offset of the single `.text` section.
const SECTION_RAW: u32 = 0x200;
const FILE_ALIGN: u32 = 0x200;
const SECTION_ALIGN: u32 = 0x2000;
const COR20_SIZE: u32 = 72;

/// `TypeDefOrRef` coded index for a `TypeDef` row.
pub fn typedef_coded(rid: u32) -> u32 {
    rid << 2
}

/// `TypeDefOrRef` coded index for a `TypeRef` row.
pub fn typeref_coded(rid: u32) -> u32 {
    (rid << 2) | 1
}

/// `ResolutionScope` coded index for an `AssemblyRef` row.
pub fn assemblyref_scope(rid: u32) -> u32 {
    (rid << 2) | 2
}

/// Tiny body containing only `ret`.
pub fn ret_body() -> Vec<u8> {
    vec![(1 << 2) | 0x2, 0x2A]
}

/// Tiny body that `call`s a `MethodDef` by rid, then returns.
pub fn call_body(method_rid: u32) -> Vec<u8> {
    let token = 0x0600_0000 | method_rid;
    let mut body = vec![(6 << 2) | 0x2, 0x28];
    body.extend_from_slice(&token.to_le_bytes());
    body.push(0x2A);
    body
}

/// `instance void ()` method signature.
pub fn sig_void() -> Vec<u8> {
    vec![0x20, 0x00, 0x01]
}

/// `instance void (int32)` method signature.
pub fn sig_void_int() -> Vec<u8> {
    vec![0x20, 0x01, 0x01, 0x08]
}

/// Builds one fixture assembly.
pub struct AssemblyFixture {
    tables: TablesStream,
    strings: StringsBuilder,
    blobs: BlobBuilder,
    bodies: HashMap<u32, Vec<u8>>,
}

impl AssemblyFixture {
    /// A fresh assembly named `name`, with its `Module`, `Assembly`, and `<Module>`
    /// rows already in place.
    pub fn new(name: &str) -> AssemblyFixture {
        let mut tables = TablesStream::empty();
        let mut strings = StringsBuilder::from_existing(&[0]);
        let blobs = BlobBuilder::from_existing(&[0]);

        let module_name = strings.intern(&format!("{name}.dll")).unwrap();
        tables.set_rows(TableId::Module, vec![vec![0, module_name, 1, 0, 0]]);

        let assembly_name = strings.intern(name).unwrap();
        // SHA1 hash algorithm, version 1.0.0.0, no public key, neutral culture.
        tables.set_rows(
            TableId::Assembly,
            vec![vec![0x8004, 1, 0, 0, 0, 0, 0, assembly_name, 0]],
        );

        let module_type = strings.intern("<Module>").unwrap();
        tables.set_rows(TableId::TypeDef, vec![vec![0, module_type, 0, 0, 1, 1]]);

        AssemblyFixture {
            tables,
            strings,
            blobs,
            bodies: HashMap::new(),
        }
    }

    /// Append an `AssemblyRef` named `name`, version 1.0.0.0.
    pub fn add_assemblyref(&mut self, name: &str) -> u32 {
        let name_index = self.strings.intern(name).unwrap();
        self.tables
            .rows_mut(TableId::AssemblyRef)
            .push(vec![1, 0, 0, 0, 0, 0, name_index, 0, 0]);
        self.tables.row_count(TableId::AssemblyRef)
    }

    /// Append a `TypeRef` with the given `ResolutionScope` coded index.
    pub fn add_typeref(&mut self, scope: u32, namespace: &str, name: &str) -> u32 {
        let name_index = self.strings.intern(name).unwrap();
        let namespace_index = self.strings.intern(namespace).unwrap();
        self.tables
            .rows_mut(TableId::TypeRef)
            .push(vec![scope, name_index, namespace_index]);
        self.tables.row_count(TableId::TypeRef)
    }

    /// Append a `TypeDef`. Methods added afterwards (until the next `add_typedef`)
    /// belong to this type.
    pub fn add_typedef(&mut self, namespace: &str, name: &str, extends: u32) -> u32 {
        let name_index = self.strings.intern(name).unwrap();
        let namespace_index = self.strings.intern(namespace).unwrap();
        let field_list = self.tables.row_count(TableId::Field) + 1;
        let method_list = self.tables.row_count(TableId::MethodDef) + 1;
        self.tables.rows_mut(TableId::TypeDef).push(vec![
            0x0010_0001, // public, beforefieldinit
            name_index,
            namespace_index,
            extends,
            field_list,
            method_list,
        ]);
        self.tables.row_count(TableId::TypeDef)
    }

    /// Append a `MethodDef` to the most recently added type.
    pub fn add_method(&mut self, name: &str, signature: &[u8], flags: u32, body: Vec<u8>) -> u32 {
        let name_index = self.strings.intern(name).unwrap();
        let sig_index = self.blobs.intern(signature).unwrap();
        let param_list = self.tables.row_count(TableId::Param) + 1;
        self.tables.rows_mut(TableId::MethodDef).push(vec![
            0, // rva, assigned at build time
            0,
            flags,
            name_index,
            sig_index,
            param_list,
        ]);

        let rid = self.tables.row_count(TableId::MethodDef);
        self.bodies.insert(rid, body);
        rid
    }

    /// Append a `Param` row to the most recently added method.
    pub fn add_param(&mut self, sequence: u32, name: &str) {
        let name_index = self.strings.intern(name).unwrap();
        self.tables
            .rows_mut(TableId::Param)
            .push(vec![0, sequence, name_index]);
    }

    /// Serialize the assembly to complete PE file bytes.
    pub fn build(mut self) -> Vec<u8> {
        // Lay out bodies right after the COR20 header and backpatch the RVAs.
        let mut section: Vec<u8> = vec![0; COR20_SIZE as usize];
        for rid in 1..=self.tables.row_count(TableId::MethodDef) {
            if let Some(body) = self.bodies.get(&rid) {
                let rva = SECTION_RVA + section.len() as u32;
                self.tables.rows_mut(TableId::MethodDef)[rid as usize - 1][0] = rva;
                section.extend_from_slice(body);
            }
        }
        while section.len() % 4 != 0 {
            section.push(0);
        }

        let metadata_rva = SECTION_RVA + section.len() as u32;
        let streams = vec![
            (
                "#~".to_string(),
                self.tables.serialize(false, false, false).unwrap(),
            ),
            ("#Strings".to_string(), self.strings.into_bytes()),
            ("#GUID".to_string(), vec![7u8; 16]),
            ("#Blob".to_string(), self.blobs.into_bytes()),
        ];
        let metadata = build_metadata("v4.0.30319", 0, &streams);
        let metadata_size = metadata.len() as u32;
        section.extend_from_slice(&metadata);

        // COR20 header at the start of the section.
        let mut cor20 = Vec::with_capacity(COR20_SIZE as usize);
        push_u32(&mut cor20, COR20_SIZE);
        push_u16(&mut cor20, 2); // runtime 2.5
        push_u16(&mut cor20, 5);
        push_u32(&mut cor20, metadata_rva);
        push_u32(&mut cor20, metadata_size);
        push_u32(&mut cor20, 0x0000_0001); // ILONLY
        cor20.resize(COR20_SIZE as usize, 0);
        section[..COR20_SIZE as usize].copy_from_slice(&cor20);

        build_pe(&section)
    }
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Wrap `section` (the `.text` contents) in a PE32 envelope.
fn build_pe(section: &[u8]) -> Vec<u8> {
    let virtual_size = section.len() as u32;
    let raw_size = align_up(virtual_size, FILE_ALIGN);
    let size_of_image = SECTION_RVA + align_up(virtual_size, SECTION_ALIGN);

    let mut out = Vec::with_capacity((SECTION_RAW + raw_size) as usize);

    // DOS header: magic plus e_lfanew pointing at 0x80.
    out.extend_from_slice(b"MZ");
    out.resize(0x3C, 0);
    push_u32(&mut out, 0x80);
    out.resize(0x80, 0);

    // COFF header.
    out.extend_from_slice(b"PE\0\0");
    push_u16(&mut out, 0x014C); // i386
    push_u16(&mut out, 1); // sections
    push_u32(&mut out, 0); // timestamp
    push_u32(&mut out, 0); // symbol table
    push_u32(&mut out, 0); // symbol count
    push_u16(&mut out, 0x00E0); // optional header size (PE32)
    push_u16(&mut out, 0x2102); // executable, 32-bit, dll

    // Optional header, PE32.
    push_u16(&mut out, 0x010B);
    out.push(8); // linker version
    out.push(0);
    push_u32(&mut out, raw_size); // size of code
    push_u32(&mut out, 0);
    push_u32(&mut out, 0);
    push_u32(&mut out, 0); // entry point
    push_u32(&mut out, SECTION_RVA); // base of code
    push_u32(&mut out, 0); // base of data
    push_u32(&mut out, 0x0040_0000); // image base
    push_u32(&mut out, SECTION_ALIGN);
    push_u32(&mut out, FILE_ALIGN);
    push_u16(&mut out, 4); // os version
    push_u16(&mut out, 0);
    push_u16(&mut out, 0); // image version
    push_u16(&mut out, 0);
    push_u16(&mut out, 4); // subsystem version
    push_u16(&mut out, 0);
    push_u32(&mut out, 0); // win32 version
    push_u32(&mut out, size_of_image);
    push_u32(&mut out, SECTION_RAW); // size of headers
    push_u32(&mut out, 0); // checksum
    push_u16(&mut out, 3); // subsystem: console
    push_u16(&mut out, 0); // dll characteristics
    push_u32(&mut out, 0x0010_0000); // stack reserve
    push_u32(&mut out, 0x1000);
    push_u32(&mut out, 0x0010_0000); // heap reserve
    push_u32(&mut out, 0x1000);
    push_u32(&mut out, 0); // loader flags
    push_u32(&mut out, 16); // directory count
    for index in 0..16 {
        if index == 14 {
            // CLR runtime header directory.
            push_u32(&mut out, SECTION_RVA);
            push_u32(&mut out, COR20_SIZE);
        } else {
            push_u32(&mut out, 0);
            push_u32(&mut out, 0);
        }
    }

    // Section table: one .text entry.
    out.extend_from_slice(b".text\0\0\0");
    push_u32(&mut out, virtual_size);
    push_u32(&mut out, SECTION_RVA);
    push_u32(&mut out, raw_size);
    push_u32(&mut out, SECTION_RAW);
    push_u32(&mut out, 0);
    push_u32(&mut out, 0);
    push_u32(&mut out, 0);
    push_u32(&mut out, 0x6000_0020); // code, execute, read

    out.resize(SECTION_RAW as usize, 0);
    out.extend_from_slice(section);
    out.resize((SECTION_RAW + raw_size) as usize, 0);

    out
}
