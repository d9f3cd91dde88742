//! `#Strings` and `#Blob` heap access and append-only rebuilding.
//!
//! The patcher never rewrites existing heap entries; it appends new ones so that every
//! index stored in untouched table rows stays valid. Readers give bounds-checked access
//! to the original heaps, builders carry the original bytes plus appended entries and
//! dedupe what they add.

use std::collections::HashMap;

use crate::{file::parser::Parser, metadata::write_compressed_uint, Error::OutOfBounds, Result};

/// Index width threshold: heaps of this size or larger need 4-byte indexes.
const WIDE_HEAP_THRESHOLD: usize = 0x1_0000;

/// Read-only view of a `#Strings` heap.
pub struct StringsReader<'a> {
    data: &'a [u8],
}

impl<'a> StringsReader<'a> {
    /// Wrap a `#Strings` heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with the empty string.
    pub fn new(data: &'a [u8]) -> Result<StringsReader<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!(
                "#Strings heap does not start with a null byte"
            ));
        }

        Ok(StringsReader { data })
    }

    /// The null-terminated UTF-8 string at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an index past the heap, or
    /// [`crate::Error::Malformed`] for invalid UTF-8.
    pub fn get(&self, index: u32) -> Result<&'a str> {
        let start = index as usize;
        if start >= self.data.len() {
            return Err(OutOfBounds);
        }

        let Some(terminator) = self.data[start..].iter().position(|byte| *byte == 0) else {
            return Err(malformed_error!(
                "Unterminated string at heap offset {}",
                index
            ));
        };

        std::str::from_utf8(&self.data[start..start + terminator])
            .map_err(|error| malformed_error!("Invalid UTF-8 string in #Strings heap - {}", error))
    }
}

/// Read-only view of a `#Blob` heap.
pub struct BlobReader<'a> {
    data: &'a [u8],
}

impl<'a> BlobReader<'a> {
    /// Wrap a `#Blob` heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with the empty blob.
    pub fn new(data: &'a [u8]) -> Result<BlobReader<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("#Blob heap does not start with a null byte"));
        }

        Ok(BlobReader { data })
    }

    /// The length-prefixed blob at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the index or the declared length runs
    /// past the heap.
    pub fn get(&self, index: u32) -> Result<&'a [u8]> {
        let start = index as usize;
        if start >= self.data.len() {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(self.data);
        parser.seek(start)?;
        let length = parser.read_compressed_uint()? as usize;
        parser.read_bytes(length)
    }
}

/// Append-only rebuilder for the `#Strings` heap.
///
/// Starts from the original heap bytes; [`StringsBuilder::intern`] either returns the
/// offset of an existing full entry or appends a new one.
pub struct StringsBuilder {
    data: Vec<u8>,
    lookup: HashMap<String, u32>,
}

impl StringsBuilder {
    /// Create a builder seeded with the original heap contents.
    ///
    /// Full entries of the original heap are indexed for reuse. Suffix-shared entries
    /// stay untouched; missing them only costs a few duplicate bytes.
    #[must_use]
    pub fn from_existing(data: &[u8]) -> StringsBuilder {
        let mut lookup = HashMap::new();

        let mut start = 1usize;
        for (position, byte) in data.iter().enumerate().skip(1) {
            if *byte == 0 {
                if position > start {
                    if let Ok(existing) = std::str::from_utf8(&data[start..position]) {
                        #[allow(clippy::cast_possible_truncation)]
                        lookup
                            .entry(existing.to_string())
                            .or_insert(start as u32);
                    }
                }
                start = position + 1;
            }
        }

        let data = if data.is_empty() { vec![0] } else { data.to_vec() };

        StringsBuilder { data, lookup }
    }

    /// Offset of `value` in the heap, appending it if not yet present.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap would exceed the 32-bit index space.
    pub fn intern(&mut self, value: &str) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }

        if let Some(offset) = self.lookup.get(value) {
            return Ok(*offset);
        }

        let offset = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("#Strings heap exceeds index space"))?;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.lookup.insert(value.to_string(), offset);

        Ok(offset)
    }

    /// Current heap bytes, padded to a 4-byte boundary.
    #[must_use]
    pub fn into_bytes(mut self) -> Vec<u8> {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        self.data
    }

    /// Returns `true` if indexes into this heap need 4 bytes.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        self.data.len() >= WIDE_HEAP_THRESHOLD
    }
}

/// Append-only rebuilder for the `#Blob` heap.
pub struct BlobBuilder {
    data: Vec<u8>,
    lookup: HashMap<Vec<u8>, u32>,
}

impl BlobBuilder {
    /// Create a builder seeded with the original heap contents.
    ///
    /// Only blobs appended through this builder are deduplicated; scanning the original
    /// heap for equal entries is not worth the risk of mis-walking padding bytes.
    #[must_use]
    pub fn from_existing(data: &[u8]) -> BlobBuilder {
        let data = if data.is_empty() { vec![0] } else { data.to_vec() };

        BlobBuilder {
            data,
            lookup: HashMap::new(),
        }
    }

    /// Offset of `blob` in the heap, appending a length-prefixed entry if this builder
    /// has not added an equal one before.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap would exceed the 32-bit index space.
    pub fn intern(&mut self, blob: &[u8]) -> Result<u32> {
        if blob.is_empty() {
            return Ok(0);
        }

        if let Some(offset) = self.lookup.get(blob) {
            return Ok(*offset);
        }

        let offset = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("#Blob heap exceeds index space"))?;

        let length = u32::try_from(blob.len())
            .map_err(|_| malformed_error!("Blob of {} bytes is too large", blob.len()))?;
        write_compressed_uint(&mut self.data, length);
        self.data.extend_from_slice(blob);
        self.lookup.insert(blob.to_vec(), offset);

        Ok(offset)
    }

    /// Current heap bytes, padded to a 4-byte boundary.
    #[must_use]
    pub fn into_bytes(mut self) -> Vec<u8> {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        self.data
    }

    /// Returns `true` if indexes into this heap need 4 bytes.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        self.data.len() >= WIDE_HEAP_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_reader_lookup() {
        let heap = b"\0Hello\0World\0";
        let reader = StringsReader::new(heap).unwrap();

        assert_eq!(reader.get(0).unwrap(), "");
        assert_eq!(reader.get(1).unwrap(), "Hello");
        assert_eq!(reader.get(7).unwrap(), "World");
        // Suffix sharing works by construction.
        assert_eq!(reader.get(9).unwrap(), "rld");
        assert!(reader.get(64).is_err());
    }

    #[test]
    fn strings_builder_reuses_existing_entries() {
        let heap = b"\0Hello\0World\0";
        let mut builder = StringsBuilder::from_existing(heap);

        assert_eq!(builder.intern("Hello").unwrap(), 1);
        assert_eq!(builder.intern("World").unwrap(), 7);
        assert_eq!(builder.intern("").unwrap(), 0);

        let fresh = builder.intern("OnSpawn").unwrap();
        assert_eq!(fresh, heap.len() as u32);
        assert_eq!(builder.intern("OnSpawn").unwrap(), fresh);

        let bytes = builder.into_bytes();
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(&bytes[fresh as usize..fresh as usize + 8], b"OnSpawn\0");
    }

    #[test]
    fn blob_reader_lookup() {
        // Empty blob at 0, then a 3-byte blob at 1.
        let heap = [0u8, 3, 0xAA, 0xBB, 0xCC];
        let reader = BlobReader::new(&heap).unwrap();

        assert_eq!(reader.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(reader.get(1).unwrap(), &[0xAA, 0xBB, 0xCC]);
        assert!(reader.get(5).is_err());
    }

    #[test]
    fn blob_builder_appends_and_dedupes() {
        let heap = [0u8];
        let mut builder = BlobBuilder::from_existing(&heap);

        let sig = [0x20, 0x00, 0x01];
        let first = builder.intern(&sig).unwrap();
        assert_eq!(first, 1);
        assert_eq!(builder.intern(&sig).unwrap(), first);

        let bytes = builder.into_bytes();
        assert_eq!(bytes[1], 3);
        assert_eq!(&bytes[2..5], &sig);
    }
}
