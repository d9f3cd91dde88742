//! Index width computation for metadata table serialization.
//!
//! Whether a heap index, table index, or coded index occupies 2 or 4 bytes depends on
//! heap sizes and row counts (ECMA-335 II.24.2.6). [`TableInfo`] captures those inputs
//! once and answers all width questions for both the decoder and the encoder.

use crate::{
    metadata::tables::{schema::ColumnKind, CodedIndexType, TableId, TABLE_SLOT_COUNT},
    Result,
};

/// Row counts and heap width flags governing the physical layout of the `#~` stream.
#[derive(Debug, Clone)]
pub struct TableInfo {
    row_counts: [u32; TABLE_SLOT_COUNT],
    wide_str: bool,
    wide_guid: bool,
    wide_blob: bool,
}

impl TableInfo {
    /// Create a `TableInfo` from per-table row counts and the heap width flags of the
    /// `HeapSizes` header byte.
    #[must_use]
    pub fn new(
        row_counts: [u32; TABLE_SLOT_COUNT],
        wide_str: bool,
        wide_guid: bool,
        wide_blob: bool,
    ) -> Self {
        TableInfo {
            row_counts,
            wide_str,
            wide_guid,
            wide_blob,
        }
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.row_counts[table as usize]
    }

    /// Returns `true` if indexes into `table` are stored as 4 bytes.
    #[must_use]
    pub fn is_large(&self, table: TableId) -> bool {
        self.rows(table) > 0xFFFF
    }

    /// Returns `true` if `#Strings` indexes are stored as 4 bytes.
    #[must_use]
    pub fn wide_str(&self) -> bool {
        self.wide_str
    }

    /// Returns `true` if `#GUID` indexes are stored as 4 bytes.
    #[must_use]
    pub fn wide_guid(&self) -> bool {
        self.wide_guid
    }

    /// Returns `true` if `#Blob` indexes are stored as 4 bytes.
    #[must_use]
    pub fn wide_blob(&self) -> bool {
        self.wide_blob
    }

    /// Returns `true` if coded indexes of group `ci` are stored as 4 bytes.
    ///
    /// A group is wide when the row count of any member table no longer fits the
    /// 16 bits remaining after the tag.
    #[must_use]
    pub fn is_coded_large(&self, ci: CodedIndexType) -> bool {
        let bits = ci.tag_bits();
        let max_rows = ci
            .tables()
            .iter()
            .map(|table| self.rows(*table))
            .max()
            .unwrap_or(0);

        u64::from(max_rows) >= (1_u64 << (16 - bits))
    }

    /// Physical size in bytes of a column of kind `kind`.
    #[must_use]
    pub fn column_size(&self, kind: &ColumnKind) -> usize {
        match kind {
            ColumnKind::U8 => 1,
            ColumnKind::U16 => 2,
            ColumnKind::U32 => 4,
            ColumnKind::Str => {
                if self.wide_str {
                    4
                } else {
                    2
                }
            }
            ColumnKind::Guid => {
                if self.wide_guid {
                    4
                } else {
                    2
                }
            }
            ColumnKind::Blob => {
                if self.wide_blob {
                    4
                } else {
                    2
                }
            }
            ColumnKind::Table(table) | ColumnKind::List(table) => {
                if self.is_large(*table) {
                    4
                } else {
                    2
                }
            }
            ColumnKind::Coded(ci) => {
                if self.is_coded_large(*ci) {
                    4
                } else {
                    2
                }
            }
        }
    }

    /// Physical size in bytes of one row of `table`.
    #[must_use]
    pub fn row_size(&self, table: TableId) -> usize {
        crate::metadata::tables::schema::columns(table)
            .iter()
            .map(|kind| self.column_size(kind))
            .sum()
    }

    /// Decodes a coded index value into its tag, the referenced table, and the row.
    ///
    /// A row of 0 represents a null reference; the returned table is still the one the
    /// tag names.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag does not name a member of the group.
    pub fn decode_coded(&self, ci: CodedIndexType, value: u32) -> Result<(u32, TableId, u32)> {
        let bits = ci.tag_bits();
        let tag = value & ((1 << bits) - 1);
        let row = value >> bits;

        let tables = ci.tables();
        let Some(table) = tables.get(tag as usize) else {
            return Err(malformed_error!(
                "Invalid coded index tag {} for group {:?}",
                tag,
                ci
            ));
        };

        Ok((tag, *table, row))
    }

    /// Encodes a coded index from an explicit tag and row.
    ///
    /// Used when rewriting existing values, where the original tag must be preserved
    /// (the `CustomAttributeType` group maps two tags to `MethodDef`).
    #[must_use]
    pub fn encode_coded_with_tag(&self, ci: CodedIndexType, tag: u32, row: u32) -> u32 {
        (row << ci.tag_bits()) | tag
    }

    /// Encodes a coded index for a fresh reference to `row` of `table`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `table` is not a member of the group.
    pub fn encode_coded(&self, ci: CodedIndexType, table: TableId, row: u32) -> Result<u32> {
        let tables = ci.tables();
        let Some(tag) = tables.iter().position(|candidate| *candidate == table) else {
            return Err(malformed_error!(
                "Table {:?} is not a member of coded index group {:?}",
                table,
                ci
            ));
        };

        // CustomAttributeType's usable MethodDef tag is 2, not the first array slot.
        let tag = if ci == CodedIndexType::CustomAttributeType && table == TableId::MethodDef {
            2
        } else {
            tag as u32
        };

        Ok(self.encode_coded_with_tag(ci, tag, row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with(counts: &[(TableId, u32)]) -> TableInfo {
        let mut rows = [0u32; TABLE_SLOT_COUNT];
        for (table, count) in counts {
            rows[*table as usize] = *count;
        }
        TableInfo::new(rows, false, false, false)
    }

    #[test]
    fn narrow_and_wide_table_indexes() {
        let info = info_with(&[(TableId::MethodDef, 0xFFFF)]);
        assert!(!info.is_large(TableId::MethodDef));

        let info = info_with(&[(TableId::MethodDef, 0x10000)]);
        assert!(info.is_large(TableId::MethodDef));
    }

    #[test]
    fn coded_index_width_threshold() {
        // TypeDefOrRef has 2 tag bits, so 14 bits remain for the row.
        let info = info_with(&[(TableId::TypeDef, 0x3FFF)]);
        assert!(!info.is_coded_large(CodedIndexType::TypeDefOrRef));

        let info = info_with(&[(TableId::TypeDef, 0x4000)]);
        assert!(info.is_coded_large(CodedIndexType::TypeDefOrRef));
    }

    #[test]
    fn coded_roundtrip() {
        let info = info_with(&[(TableId::TypeDef, 10), (TableId::TypeRef, 10)]);

        let encoded = info
            .encode_coded(CodedIndexType::TypeDefOrRef, TableId::TypeRef, 3)
            .unwrap();
        assert_eq!(encoded, (3 << 2) | 1);

        let (tag, table, row) = info
            .decode_coded(CodedIndexType::TypeDefOrRef, encoded)
            .unwrap();
        assert_eq!(tag, 1);
        assert_eq!(table, TableId::TypeRef);
        assert_eq!(row, 3);
    }

    #[test]
    fn custom_attribute_type_encodes_tag_two() {
        let info = info_with(&[(TableId::MethodDef, 10)]);

        let encoded = info
            .encode_coded(CodedIndexType::CustomAttributeType, TableId::MethodDef, 5)
            .unwrap();
        assert_eq!(encoded, (5 << 3) | 2);

        let member_ref = info
            .encode_coded(CodedIndexType::CustomAttributeType, TableId::MemberRef, 5)
            .unwrap();
        assert_eq!(member_ref, (5 << 3) | 3);
    }

    #[test]
    fn invalid_tag_rejected() {
        let info = info_with(&[]);
        // ResolutionScope has 2 tag bits and exactly 4 member tables, so every tag
        // decodes; MemberRefParent has 3 bits but 5 members.
        assert!(info
            .decode_coded(CodedIndexType::MemberRefParent, (1 << 3) | 7)
            .is_err());
    }

    #[test]
    fn row_sizes_track_widths() {
        let narrow = info_with(&[(TableId::Param, 10)]);
        // Param: u16 + u16 + narrow string index
        assert_eq!(narrow.row_size(TableId::Param), 6);

        let wide = TableInfo::new([0; TABLE_SLOT_COUNT], true, false, false);
        assert_eq!(wide.row_size(TableId::Param), 8);
    }
}
