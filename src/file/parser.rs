//! Sequential binary parser for CIL metadata structures.
//!
//! [`Parser`] is a cursor over a byte slice with bounds-checked primitive reads plus the
//! variable-width encodings metadata uses: compressed unsigned integers (ECMA-335 II.23.2)
//! and compressed `TypeDefOrRef` tokens as they appear inside signature blobs.

use crate::{
    file::io::{read_le_at, CilIO},
    metadata::token::Token,
    Error::OutOfBounds,
    Result,
};

/// A bounds-checked sequential reader over a byte slice.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser over `data`, positioned at the start.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if at least one more byte can be read.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current cursor position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// The underlying buffer.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is beyond the buffer.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Advance the cursor by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the new position is beyond the buffer.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let Some(target) = self.position.checked_add(step) else {
            return Err(OutOfBounds);
        };

        self.seek(target)
    }

    /// Number of bytes left after the cursor.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Read the next byte without advancing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the buffer.
    pub fn peek_byte(&self) -> Result<u8> {
        match self.data.get(self.position) {
            Some(byte) => Ok(*byte),
            None => Err(OutOfBounds),
        }
    }

    /// Read a little-endian value of type `T` and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if insufficient bytes remain.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at(self.data, &mut self.position)
    }

    /// Read `length` bytes and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if insufficient bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let Some(end) = self.position.checked_add(length) else {
            return Err(OutOfBounds);
        };

        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Read a compressed unsigned integer per ECMA-335 II.23.2.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid lead byte, or
    /// [`crate::Error::OutOfBounds`] if the encoding is truncated.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            let value = ((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte);
            return Ok(value);
        }

        // 4-byte encoding: 11xxxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            let value = ((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3;
            return Ok(value);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed `TypeDefOrRef` token as used inside signature blobs
    /// (ECMA-335 II.23.2.8).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag bits do not name a valid table.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table: u32 = match compressed_token & 0x3 {
            0x0 => 0x0200_0000, // TypeDef
            0x1 => 0x0100_0000, // TypeRef
            0x2 => 0x1B00_0000, // TypeSpec
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        let table_index = compressed_token >> 2;

        Ok(Token::new(table + table_index))
    }

    /// Read a null-terminated UTF-8 string and advance past the terminator.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if no terminator is found, or
    /// [`crate::Error::Malformed`] for invalid UTF-8.
    pub fn read_string_utf8(&mut self) -> Result<String> {
        let start = self.position;
        while self.has_more_data() {
            if self.data[self.position] == 0 {
                let result = match std::str::from_utf8(&self.data[start..self.position]) {
                    Ok(string) => string.to_string(),
                    Err(error) => return Err(malformed_error!("Invalid UTF-8 string - {}", error)),
                };

                self.position += 1;
                return Ok(result);
            }

            self.position += 1;
        }

        Err(OutOfBounds)
    }

    /// Advance the cursor to the next multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if padding would run past the buffer.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let remainder = self.position % alignment;
        if remainder != 0 {
            self.advance_by(alignment - remainder)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_compressed_uint() {
        let data = [0x03, 0x8F, 0xFF, 0xC0, 0x00, 0x10, 0x00];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_compressed_uint().unwrap(), 0x03);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x0FFF);
        assert_eq!(parser.read_compressed_uint().unwrap(), 0x1000);
        assert!(parser.read_compressed_uint().is_err());
    }

    #[test]
    fn test_read_compressed_token() {
        // TypeRef row 2 -> (2 << 2) | 1 = 0x09
        let data = [0x09, 0x04];
        let mut parser = Parser::new(&data);

        let typeref = parser.read_compressed_token().unwrap();
        assert_eq!(typeref.value(), 0x0100_0002);

        // TypeDef row 1 -> (1 << 2) | 0 = 0x04
        let typedef = parser.read_compressed_token().unwrap();
        assert_eq!(typedef.value(), 0x0200_0001);
    }

    #[test]
    fn test_parse_string() {
        let data = b"Hello\0World\0";
        let mut parser = Parser::new(data);

        assert_eq!(parser.read_string_utf8().unwrap(), "Hello");
        assert_eq!(parser.read_string_utf8().unwrap(), "World");
        assert!(parser.read_string_utf8().is_err());
    }

    #[test]
    fn test_error_handling() {
        let data = [0x01, 0x02];
        let mut parser = Parser::new(&data);

        assert!(parser.read_le::<u32>().is_err());
        assert!(parser.seek(3).is_err());
        assert!(parser.seek(2).is_ok());
        assert!(!parser.has_more_data());
    }

    #[test]
    fn test_align() {
        let data = [0u8; 16];
        let mut parser = Parser::new(&data);

        parser.advance_by(5).unwrap();
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 8);
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 8);
    }
}
