//! Physical `#~` stream codec.
//!
//! [`TablesStream`] owns every metadata table as decoded rows (flat `Vec<u32>` per row,
//! one element per schema column) plus the header fields needed to write the stream
//! back out. Decoding resolves the 2-vs-4 byte column widths from the declared row
//! counts and `HeapSizes` byte; encoding recomputes widths from the current state, so
//! rows can be inserted freely between a parse and a serialize.

use std::collections::HashMap;

use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le_at, write_le_at_dyn},
    metadata::tables::{
        schema::{columns, ColumnKind},
        TableId, TableInfo, TABLE_SLOT_COUNT,
    },
    Error::NotSupported,
    Result,
};

/// `HeapSizes` bit: `#Strings` indexes are 4 bytes.
const HEAP_WIDE_STR: u8 = 0x01;
/// `HeapSizes` bit: `#GUID` indexes are 4 bytes.
const HEAP_WIDE_GUID: u8 = 0x02;
/// `HeapSizes` bit: `#Blob` indexes are 4 bytes.
const HEAP_WIDE_BLOB: u8 = 0x04;

/// A single decoded metadata table row.
pub type Row = Vec<u32>;

/// The decoded `#~` (compressed metadata tables) stream.
pub struct TablesStream {
    pub major_version: u8,
    pub minor_version: u8,
    /// `Sorted` bitmask as read from the header.
    pub sorted: u64,
    tables: Vec<Vec<Row>>,
    info: TableInfo,
}

impl TablesStream {
    /// An empty stream with schema version 2.0, for building images from scratch.
    #[must_use]
    pub fn empty() -> TablesStream {
        TablesStream {
            major_version: 2,
            minor_version: 0,
            sorted: 0,
            tables: vec![Vec::new(); TABLE_SLOT_COUNT],
            info: TableInfo::new([0; TABLE_SLOT_COUNT], false, false, false),
        }
    }

    /// Parse a `#~` stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotSupported`] if the `Valid` bitmask names tables beyond
    /// the ECMA-335 set (Portable PDB tables), [`crate::Error::Malformed`] for invalid
    /// row contents, or [`crate::Error::OutOfBounds`] if the stream is truncated.
    pub fn parse(data: &[u8]) -> Result<TablesStream> {
        let mut offset = 0_usize;

        let _reserved = read_le_at::<u32>(data, &mut offset)?;
        let major_version = read_le_at::<u8>(data, &mut offset)?;
        let minor_version = read_le_at::<u8>(data, &mut offset)?;
        let heap_sizes = read_le_at::<u8>(data, &mut offset)?;
        let _reserved2 = read_le_at::<u8>(data, &mut offset)?;
        let valid = read_le_at::<u64>(data, &mut offset)?;
        let sorted = read_le_at::<u64>(data, &mut offset)?;

        if valid >> TABLE_SLOT_COUNT != 0 {
            // Portable PDB table set, not rewritable by this crate.
            return Err(NotSupported);
        }

        let mut row_counts = [0u32; TABLE_SLOT_COUNT];
        for (slot, count) in row_counts.iter_mut().enumerate() {
            if valid & (1 << slot) != 0 {
                *count = read_le_at::<u32>(data, &mut offset)?;
            }
        }

        let info = TableInfo::new(
            row_counts,
            heap_sizes & HEAP_WIDE_STR != 0,
            heap_sizes & HEAP_WIDE_GUID != 0,
            heap_sizes & HEAP_WIDE_BLOB != 0,
        );

        let mut tables = vec![Vec::new(); TABLE_SLOT_COUNT];
        for slot in 0..TABLE_SLOT_COUNT {
            let count = row_counts[slot];
            if count == 0 {
                continue;
            }

            #[allow(clippy::cast_possible_truncation)]
            let Some(table_id) = TableId::from_number(slot as u8) else {
                return Err(NotSupported);
            };

            let layout = columns(table_id);
            let mut rows = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let mut row = Vec::with_capacity(layout.len());
                for kind in layout {
                    let value = match kind {
                        ColumnKind::U8 => u32::from(read_le_at::<u8>(data, &mut offset)?),
                        ColumnKind::U16 => u32::from(read_le_at::<u16>(data, &mut offset)?),
                        ColumnKind::U32 => read_le_at::<u32>(data, &mut offset)?,
                        _ => {
                            let wide = info.column_size(kind) == 4;
                            read_le_at_dyn(data, &mut offset, wide)?
                        }
                    };
                    row.push(value);
                }
                rows.push(row);
            }
            tables[slot] = rows;
        }

        Ok(TablesStream {
            major_version,
            minor_version,
            sorted,
            tables,
            info,
        })
    }

    /// Serialize the stream, recomputing all index widths from the current row counts
    /// and the supplied heap width flags.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a row value no longer fits its column.
    pub fn serialize(&self, wide_str: bool, wide_guid: bool, wide_blob: bool) -> Result<Vec<u8>> {
        let mut row_counts = [0u32; TABLE_SLOT_COUNT];
        for (slot, rows) in self.tables.iter().enumerate() {
            row_counts[slot] = u32::try_from(rows.len())
                .map_err(|_| malformed_error!("Table {} has too many rows", slot))?;
        }

        let info = TableInfo::new(row_counts, wide_str, wide_guid, wide_blob);

        let mut valid = 0u64;
        let mut body_size = 0usize;
        for slot in 0..TABLE_SLOT_COUNT {
            if row_counts[slot] != 0 {
                valid |= 1 << slot;
                #[allow(clippy::cast_possible_truncation)]
                let table_id = TableId::from_number(slot as u8).unwrap_or(TableId::Module);
                body_size += row_counts[slot] as usize * info.row_size(table_id);
            }
        }

        let mut heap_sizes = 0u8;
        if wide_str {
            heap_sizes |= HEAP_WIDE_STR;
        }
        if wide_guid {
            heap_sizes |= HEAP_WIDE_GUID;
        }
        if wide_blob {
            heap_sizes |= HEAP_WIDE_BLOB;
        }

        let header_size = 24 + 4 * valid.count_ones() as usize;
        let total = (header_size + body_size).next_multiple_of(4);
        let mut out = vec![0u8; total];
        let mut offset = 0usize;

        write_le_at::<u32>(&mut out, &mut offset, 0)?;
        write_le_at::<u8>(&mut out, &mut offset, self.major_version)?;
        write_le_at::<u8>(&mut out, &mut offset, self.minor_version)?;
        write_le_at::<u8>(&mut out, &mut offset, heap_sizes)?;
        write_le_at::<u8>(&mut out, &mut offset, 1)?;
        write_le_at::<u64>(&mut out, &mut offset, valid)?;
        write_le_at::<u64>(&mut out, &mut offset, self.sorted & valid)?;

        for slot in 0..TABLE_SLOT_COUNT {
            if row_counts[slot] != 0 {
                write_le_at::<u32>(&mut out, &mut offset, row_counts[slot])?;
            }
        }

        for slot in 0..TABLE_SLOT_COUNT {
            if row_counts[slot] == 0 {
                continue;
            }

            #[allow(clippy::cast_possible_truncation)]
            let Some(table_id) = TableId::from_number(slot as u8) else {
                continue;
            };

            let layout = columns(table_id);
            for row in &self.tables[slot] {
                if row.len() != layout.len() {
                    return Err(malformed_error!(
                        "Row of {:?} has {} values, schema expects {}",
                        table_id,
                        row.len(),
                        layout.len()
                    ));
                }

                for (kind, value) in layout.iter().zip(row) {
                    match kind {
                        ColumnKind::U8 => {
                            let narrow = u8::try_from(*value).map_err(|_| {
                                malformed_error!("Value {} does not fit u8 column", value)
                            })?;
                            write_le_at::<u8>(&mut out, &mut offset, narrow)?;
                        }
                        ColumnKind::U16 => {
                            let narrow = u16::try_from(*value).map_err(|_| {
                                malformed_error!("Value {} does not fit u16 column", value)
                            })?;
                            write_le_at::<u16>(&mut out, &mut offset, narrow)?;
                        }
                        ColumnKind::U32 => {
                            write_le_at::<u32>(&mut out, &mut offset, *value)?;
                        }
                        _ => {
                            let wide = info.column_size(kind) == 4;
                            write_le_at_dyn(&mut out, &mut offset, *value, wide)?;
                        }
                    }
                }
            }
        }

        Ok(out)
    }

    /// Width information as declared by the parsed stream.
    #[must_use]
    pub fn info(&self) -> &TableInfo {
        &self.info
    }

    /// All rows of `table`.
    #[must_use]
    pub fn rows(&self, table: TableId) -> &[Row] {
        &self.tables[table as usize]
    }

    /// Mutable access to the rows of `table`.
    pub fn rows_mut(&mut self, table: TableId) -> &mut Vec<Row> {
        &mut self.tables[table as usize]
    }

    /// Replace the rows of `table` wholesale.
    pub fn set_rows(&mut self, table: TableId, rows: Vec<Row>) {
        self.tables[table as usize] = rows;
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.tables[table as usize].len() as u32
        }
    }

    /// A single row of `table` by 1-based row id.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `rid` is 0 or past the end of the table.
    pub fn row(&self, table: TableId, rid: u32) -> Result<&Row> {
        if rid == 0 {
            return Err(malformed_error!("Row id 0 is a null reference"));
        }

        self.tables[table as usize]
            .get(rid as usize - 1)
            .ok_or_else(|| malformed_error!("Row {} of {:?} does not exist", rid, table))
    }

    /// Returns `true` if `table` is present with at least one row.
    #[must_use]
    pub fn has_table(&self, table: TableId) -> bool {
        !self.tables[table as usize].is_empty()
    }

    /// Rewrites every reference to rows of `target` across all tables according to
    /// `map` (old 1-based rid to new 1-based rid).
    ///
    /// Plain table-index columns and coded-index columns are covered; `List` columns
    /// are owned-range starts and are recomputed by the writer instead.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an existing coded value fails to decode.
    pub fn remap_references(&mut self, target: TableId, map: &HashMap<u32, u32>) -> Result<()> {
        if map.is_empty() {
            return Ok(());
        }

        // TableInfo is only consulted for tag math here, which does not depend on
        // row counts, so the parse-time copy is safe to use after mutation.
        let info = self.info.clone();

        for slot in 0..TABLE_SLOT_COUNT {
            #[allow(clippy::cast_possible_truncation)]
            let Some(table_id) = TableId::from_number(slot as u8) else {
                continue;
            };

            let layout = columns(table_id);
            let relevant = layout.iter().any(|kind| match kind {
                ColumnKind::Table(t) => *t == target,
                ColumnKind::Coded(ci) => ci.tables().contains(&target),
                _ => false,
            });
            if !relevant {
                continue;
            }

            for row in &mut self.tables[slot] {
                for (kind, value) in layout.iter().zip(row.iter_mut()) {
                    match kind {
                        ColumnKind::Table(t) if *t == target => {
                            if let Some(new) = map.get(value) {
                                *value = *new;
                            }
                        }
                        ColumnKind::Coded(ci) if ci.tables().contains(&target) => {
                            if *value == 0 {
                                continue;
                            }
                            let (tag, table, rid) = info.decode_coded(*ci, *value)?;
                            if table == target && rid != 0 {
                                if let Some(new) = map.get(&rid) {
                                    *value = info.encode_coded_with_tag(*ci, tag, *new);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// Stable-sorts `table` by `key` and returns the rid remapping of rows that moved,
    /// or `None` when the table was already in order.
    pub fn sort_table_by_key(
        &mut self,
        table: TableId,
        key: impl Fn(&Row) -> u64,
    ) -> Option<HashMap<u32, u32>> {
        let rows = &mut self.tables[table as usize];
        if rows.len() < 2 {
            return None;
        }

        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.sort_by_key(|index| key(&rows[*index]));

        if order.iter().enumerate().all(|(new, old)| new == *old) {
            return None;
        }

        let mut sorted = Vec::with_capacity(rows.len());
        let mut map = HashMap::new();
        for (new_index, old_index) in order.iter().enumerate() {
            sorted.push(std::mem::take(&mut rows[*old_index]));
            if new_index != *old_index {
                #[allow(clippy::cast_possible_truncation)]
                map.insert(*old_index as u32 + 1, new_index as u32 + 1);
            }
        }

        *rows = sorted;
        Some(map)
    }
}
