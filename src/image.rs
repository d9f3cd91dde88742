//! Loaded assembly view.
//!
//! [`AssemblyImage`] combines the PE envelope, the COR20 header, the metadata root, the
//! decoded table stream, and owned copies of the heaps into one queryable unit. Heap
//! bytes are copied out of the file so readers never borrow into the backing mmap.

use std::path::Path;

use crate::{
    file::File,
    metadata::{
        heaps::{BlobReader, StringsReader},
        root::MetadataRoot,
        tables::{schema, schema::ColumnKind, TableId, TablesStream},
    },
    pe::Cor20,
    Error::NotSupported,
    Result,
};

/// Tables whose presence indicates an uncompressed (`#-`) or edit-and-continue image.
/// Their indirection breaks the assumption that list columns own contiguous runs.
const INDIRECTION_TABLES: &[TableId] = &[
    TableId::FieldPtr,
    TableId::MethodPtr,
    TableId::ParamPtr,
    TableId::EventPtr,
    TableId::PropertyPtr,
    TableId::EncLog,
    TableId::EncMap,
];

/// A fully parsed .NET assembly.
pub struct AssemblyImage {
    file: File,
    cor20: Cor20,
    root: MetadataRoot,
    pub tables: TablesStream,
    /// File offset of the metadata root.
    metadata_offset: usize,
    strings_data: Vec<u8>,
    blob_data: Vec<u8>,
    us_data: Vec<u8>,
    guid_data: Vec<u8>,
}

impl AssemblyImage {
    /// Load and parse an assembly from disk.
    ///
    /// # Errors
    /// Propagates any parse failure from the PE, COR20, metadata root, or table stream
    /// layers, and returns [`crate::Error::NotSupported`] for `#-` images or images
    /// carrying indirection or edit-and-continue tables.
    pub fn open(path: &Path) -> Result<AssemblyImage> {
        Self::load(File::from_file(path)?)
    }

    /// Parse an assembly from an in-memory buffer.
    ///
    /// # Errors
    /// Same failure modes as [`AssemblyImage::open`].
    pub fn from_bytes(data: Vec<u8>) -> Result<AssemblyImage> {
        Self::load(File::from_mem(data)?)
    }

    fn load(file: File) -> Result<AssemblyImage> {
        let cor20 = Cor20::parse(&file)?;

        let metadata_offset = file.rva_to_offset(cor20.metadata_rva)?;
        let metadata = file.data_slice(metadata_offset, cor20.metadata_size as usize)?;
        let root = MetadataRoot::parse(metadata)?;

        if root.stream("#-").is_some() {
            // Uncompressed table stream, only produced by ENC tooling.
            return Err(NotSupported);
        }
        let Some(tables_header) = root.stream("#~") else {
            return Err(malformed_error!("Metadata root has no #~ stream"));
        };

        let stream_slice = |name: &str| -> Result<Vec<u8>> {
            match root.stream(name) {
                Some(header) => Ok(metadata
                    [header.offset as usize..(header.offset + header.size) as usize]
                    .to_vec()),
                // A minimal NUL entry keeps the reader-side validation happy.
                None => Ok(vec![0]),
            }
        };

        let tables = TablesStream::parse(
            &metadata[tables_header.offset as usize
                ..(tables_header.offset + tables_header.size) as usize],
        )?;

        for table in INDIRECTION_TABLES {
            if tables.has_table(*table) {
                return Err(NotSupported);
            }
        }

        let strings_data = stream_slice("#Strings")?;
        let blob_data = stream_slice("#Blob")?;
        let us_data = stream_slice("#US")?;
        let guid_data = stream_slice("#GUID")?;

        Ok(AssemblyImage {
            file,
            cor20,
            root,
            tables,
            metadata_offset,
            strings_data,
            blob_data,
            us_data,
            guid_data,
        })
    }

    /// The underlying file.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// The COR20 (CLR runtime) header.
    #[must_use]
    pub fn cor20(&self) -> &Cor20 {
        &self.cor20
    }

    /// The metadata root.
    #[must_use]
    pub fn root(&self) -> &MetadataRoot {
        &self.root
    }

    /// File offset of the metadata root.
    #[must_use]
    pub fn metadata_offset(&self) -> usize {
        self.metadata_offset
    }

    /// A reader over the `#Strings` heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap is structurally invalid.
    pub fn strings(&self) -> Result<StringsReader<'_>> {
        StringsReader::new(&self.strings_data)
    }

    /// A reader over the `#Blob` heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap is structurally invalid.
    pub fn blobs(&self) -> Result<BlobReader<'_>> {
        BlobReader::new(&self.blob_data)
    }

    /// Raw `#Strings` heap bytes.
    #[must_use]
    pub fn strings_data(&self) -> &[u8] {
        &self.strings_data
    }

    /// Raw `#Blob` heap bytes.
    #[must_use]
    pub fn blob_data(&self) -> &[u8] {
        &self.blob_data
    }

    /// Raw `#US` heap bytes.
    #[must_use]
    pub fn us_data(&self) -> &[u8] {
        &self.us_data
    }

    /// Raw `#GUID` heap bytes.
    #[must_use]
    pub fn guid_data(&self) -> &[u8] {
        &self.guid_data
    }

    /// Simple name of this assembly from its `Assembly` row.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] when the image has no `Assembly` row (a
    /// netmodule) or the name index is invalid.
    pub fn assembly_name(&self) -> Result<String> {
        let row = self.tables.row(TableId::Assembly, 1)?;
        Ok(self.strings()?.get(row[7])?.to_string())
    }

    /// Namespace and name of a `TypeDef` row.
    ///
    /// # Errors
    /// Returns an error for an invalid rid or string index.
    pub fn typedef_name(&self, rid: u32) -> Result<(String, String)> {
        let row = self.tables.row(TableId::TypeDef, rid)?;
        let strings = self.strings()?;
        Ok((strings.get(row[2])?.to_string(), strings.get(row[1])?.to_string()))
    }

    /// Namespace and name of a `TypeRef` row.
    ///
    /// # Errors
    /// Returns an error for an invalid rid or string index.
    pub fn typeref_name(&self, rid: u32) -> Result<(String, String)> {
        let row = self.tables.row(TableId::TypeRef, rid)?;
        let strings = self.strings()?;
        Ok((strings.get(row[2])?.to_string(), strings.get(row[1])?.to_string()))
    }

    /// Find the `TypeRef` rid matching `namespace` and `name`, if any.
    ///
    /// # Errors
    /// Returns an error for an invalid string index.
    pub fn find_typeref(&self, namespace: &str, name: &str) -> Result<Option<u32>> {
        let strings = self.strings()?;
        for (index, row) in self.tables.rows(TableId::TypeRef).iter().enumerate() {
            if strings.get(row[1])? == name && strings.get(row[2])? == namespace {
                #[allow(clippy::cast_possible_truncation)]
                return Ok(Some(index as u32 + 1));
            }
        }
        Ok(None)
    }

    /// Find the `TypeDef` rid matching `namespace` and `name`, if any.
    ///
    /// # Errors
    /// Returns an error for an invalid string index.
    pub fn find_typedef(&self, namespace: &str, name: &str) -> Result<Option<u32>> {
        let strings = self.strings()?;
        for (index, row) in self.tables.rows(TableId::TypeDef).iter().enumerate() {
            if strings.get(row[1])? == name && strings.get(row[2])? == namespace {
                #[allow(clippy::cast_possible_truncation)]
                return Ok(Some(index as u32 + 1));
            }
        }
        Ok(None)
    }

    /// The raw `Extends` coded index of a `TypeDef` row.
    ///
    /// # Errors
    /// Returns an error for an invalid rid.
    pub fn typedef_extends(&self, rid: u32) -> Result<u32> {
        Ok(self.tables.row(TableId::TypeDef, rid)?[3])
    }

    /// The `[start, end)` rid range of methods owned by a `TypeDef` row.
    ///
    /// # Errors
    /// Returns an error for an invalid rid.
    pub fn method_range(&self, typedef_rid: u32) -> Result<(u32, u32)> {
        self.owned_range(TableId::TypeDef, typedef_rid, 5, TableId::MethodDef)
    }

    /// The `[start, end)` rid range of params owned by a `MethodDef` row.
    ///
    /// # Errors
    /// Returns an error for an invalid rid.
    pub fn param_range(&self, methoddef_rid: u32) -> Result<(u32, u32)> {
        self.owned_range(TableId::MethodDef, methoddef_rid, 5, TableId::Param)
    }

    fn owned_range(
        &self,
        owner: TableId,
        rid: u32,
        column: usize,
        owned: TableId,
    ) -> Result<(u32, u32)> {
        let start = self.tables.row(owner, rid)?[column];
        let end = if rid < self.tables.row_count(owner) {
            self.tables.row(owner, rid + 1)?[column]
        } else {
            self.tables.row_count(owned) + 1
        };

        if start > end {
            return Err(malformed_error!(
                "{:?} row {} owns a negative {:?} range",
                owner,
                rid,
                owned
            ));
        }

        Ok((start, end))
    }

    /// Name of a `MethodDef` row.
    ///
    /// # Errors
    /// Returns an error for an invalid rid or string index.
    pub fn method_name(&self, rid: u32) -> Result<String> {
        let row = self.tables.row(TableId::MethodDef, rid)?;
        Ok(self.strings()?.get(row[3])?.to_string())
    }

    /// `Flags` column of a `MethodDef` row.
    ///
    /// # Errors
    /// Returns an error for an invalid rid.
    pub fn method_flags(&self, rid: u32) -> Result<u16> {
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.tables.row(TableId::MethodDef, rid)?[2] as u16)
    }

    /// Signature blob of a `MethodDef` row.
    ///
    /// # Errors
    /// Returns an error for an invalid rid or blob index.
    pub fn method_signature(&self, rid: u32) -> Result<&[u8]> {
        let index = self.tables.row(TableId::MethodDef, rid)?[4];
        self.blobs()?.get(index)
    }

    /// Simple name of an `AssemblyRef` row.
    ///
    /// # Errors
    /// Returns an error for an invalid rid or string index.
    pub fn assemblyref_name(&self, rid: u32) -> Result<String> {
        let row = self.tables.row(TableId::AssemblyRef, rid)?;
        Ok(self.strings()?.get(row[6])?.to_string())
    }

    /// Validate that every list column in the image is monotone, so rows can be
    /// inserted by recomputing per-owner counts.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] when a list column goes backwards.
    pub fn check_list_monotonicity(&self) -> Result<()> {
        use strum::IntoEnumIterator;

        for table in TableId::iter() {
            for (column, kind) in schema::columns(table).iter().enumerate() {
                let ColumnKind::List(_) = kind else {
                    continue;
                };

                let mut previous = 0u32;
                for row in self.tables.rows(table) {
                    if row[column] < previous {
                        return Err(NotSupported);
                    }
                    previous = row[column];
                }
            }
        }

        Ok(())
    }
}
