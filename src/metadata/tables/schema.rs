//! Column layouts of the metadata tables.
//!
//! Every table row is decoded into a flat `Vec<u32>` whose elements line up with the
//! column list returned by [`columns`]. Keeping the schema declarative lets the stream
//! codec, the row remapper, and the writer share a single source of truth for widths
//! and reference semantics.

use crate::metadata::tables::{CodedIndexType, TableId};

/// The kind of a single metadata table column.
///
/// The distinction between [`ColumnKind::Table`] and [`ColumnKind::List`] matters for
/// row remapping: a `Table` column is a reference to one row and must be remapped when
/// that row moves, while a `List` column is the start index of an owned run of rows and
/// is recomputed wholesale by the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Fixed 1-byte scalar.
    U8,
    /// Fixed 2-byte scalar.
    U16,
    /// Fixed 4-byte scalar.
    U32,
    /// Index into the `#Strings` heap.
    Str,
    /// Index into the `#GUID` heap.
    Guid,
    /// Index into the `#Blob` heap.
    Blob,
    /// Index of a single row in another table.
    Table(TableId),
    /// Start index of an owned, contiguous run of rows in another table.
    List(TableId),
    /// Coded index into one of several tables.
    Coded(CodedIndexType),
}

/// Returns the column layout of `table` per ECMA-335 II.22.
#[must_use]
pub fn columns(table: TableId) -> &'static [ColumnKind] {
    use ColumnKind::{Blob, Coded, Guid, List, Str, Table, U16, U32, U8};

    match table {
        TableId::Module => &[U16, Str, Guid, Guid, Guid],
        TableId::TypeRef => &[Coded(CodedIndexType::ResolutionScope), Str, Str],
        TableId::TypeDef => &[
            U32,
            Str,
            Str,
            Coded(CodedIndexType::TypeDefOrRef),
            List(TableId::Field),
            List(TableId::MethodDef),
        ],
        TableId::FieldPtr => &[Table(TableId::Field)],
        TableId::Field => &[U16, Str, Blob],
        TableId::MethodPtr => &[Table(TableId::MethodDef)],
        TableId::MethodDef => &[U32, U16, U16, Str, Blob, List(TableId::Param)],
        TableId::ParamPtr => &[Table(TableId::Param)],
        TableId::Param => &[U16, U16, Str],
        TableId::InterfaceImpl => &[Table(TableId::TypeDef), Coded(CodedIndexType::TypeDefOrRef)],
        TableId::MemberRef => &[Coded(CodedIndexType::MemberRefParent), Str, Blob],
        TableId::Constant => &[U8, U8, Coded(CodedIndexType::HasConstant), Blob],
        TableId::CustomAttribute => &[
            Coded(CodedIndexType::HasCustomAttribute),
            Coded(CodedIndexType::CustomAttributeType),
            Blob,
        ],
        TableId::FieldMarshal => &[Coded(CodedIndexType::HasFieldMarshal), Blob],
        TableId::DeclSecurity => &[U16, Coded(CodedIndexType::HasDeclSecurity), Blob],
        TableId::ClassLayout => &[U16, U32, Table(TableId::TypeDef)],
        TableId::FieldLayout => &[U32, Table(TableId::Field)],
        TableId::StandAloneSig => &[Blob],
        TableId::EventMap => &[Table(TableId::TypeDef), List(TableId::Event)],
        TableId::EventPtr => &[Table(TableId::Event)],
        TableId::Event => &[U16, Str, Coded(CodedIndexType::TypeDefOrRef)],
        TableId::PropertyMap => &[Table(TableId::TypeDef), List(TableId::Property)],
        TableId::PropertyPtr => &[Table(TableId::Property)],
        TableId::Property => &[U16, Str, Blob],
        TableId::MethodSemantics => &[
            U16,
            Table(TableId::MethodDef),
            Coded(CodedIndexType::HasSemantics),
        ],
        TableId::MethodImpl => &[
            Table(TableId::TypeDef),
            Coded(CodedIndexType::MethodDefOrRef),
            Coded(CodedIndexType::MethodDefOrRef),
        ],
        TableId::ModuleRef => &[Str],
        TableId::TypeSpec => &[Blob],
        TableId::ImplMap => &[
            U16,
            Coded(CodedIndexType::MemberForwarded),
            Str,
            Table(TableId::ModuleRef),
        ],
        TableId::FieldRVA => &[U32, Table(TableId::Field)],
        TableId::EncLog => &[U32, U32],
        TableId::EncMap => &[U32],
        TableId::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        TableId::AssemblyProcessor => &[U32],
        TableId::AssemblyOS => &[U32, U32, U32],
        TableId::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        TableId::AssemblyRefProcessor => &[U32, Table(TableId::AssemblyRef)],
        TableId::AssemblyRefOS => &[U32, U32, U32, Table(TableId::AssemblyRef)],
        TableId::File => &[U32, Str, Blob],
        TableId::ExportedType => &[U32, U32, Str, Str, Coded(CodedIndexType::Implementation)],
        TableId::ManifestResource => &[U32, U32, Str, Coded(CodedIndexType::Implementation)],
        TableId::NestedClass => &[Table(TableId::TypeDef), Table(TableId::TypeDef)],
        TableId::GenericParam => &[U16, U16, Coded(CodedIndexType::TypeOrMethodDef), Str],
        TableId::MethodSpec => &[Coded(CodedIndexType::MethodDefOrRef), Blob],
        TableId::GenericParamConstraint => &[
            Table(TableId::GenericParam),
            Coded(CodedIndexType::TypeDefOrRef),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_table_has_columns() {
        for id in TableId::iter() {
            assert!(!columns(id).is_empty(), "no columns for {:?}", id);
        }
    }

    #[test]
    fn well_known_layouts() {
        assert_eq!(columns(TableId::MethodDef).len(), 6);
        assert_eq!(columns(TableId::Param).len(), 3);
        assert_eq!(columns(TableId::TypeDef).len(), 6);
        assert_eq!(columns(TableId::Module).len(), 5);
        assert_eq!(
            columns(TableId::MethodDef)[5],
            ColumnKind::List(TableId::Param)
        );
    }
}
