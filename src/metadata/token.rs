use std::fmt;
use std::hash::{Hash, Hasher};

use crate::metadata::tables::TableId;

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table identifier and a 1-based row index
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_parts() {
        let token = Token(0x06000001);
        assert_eq!(token.value(), 0x06000001);
        assert_eq!(token.table(), 0x06);
        assert_eq!(token.row(), 1);

        let token2 = Token(0x02000005);
        assert_eq!(token2.table(), 0x02);
        assert_eq!(token2.row(), 5);
    }

    #[test]
    fn test_token_from_parts() {
        let token = Token::from_parts(TableId::MethodDef, 42);
        assert_eq!(token.value(), 0x0600002A);

        let token2 = Token::from_parts(TableId::TypeRef, 1);
        assert_eq!(token2.value(), 0x01000001);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0x00000000).is_null());
        assert!(!Token(0x06000001).is_null());
    }

    #[test]
    fn test_token_display() {
        let token = Token(0x06000001);
        assert_eq!(format!("{}", token), "0x06000001");
    }

    #[test]
    fn test_token_hash() {
        let mut map = HashMap::new();
        let token1 = Token(0x06000001);
        let token2 = Token(0x06000002);

        map.insert(token1, "Method1");
        map.insert(token2, "Method2");

        assert_eq!(map.get(&token1), Some(&"Method1"));
        assert_eq!(map.get(&token2), Some(&"Method2"));
    }

    #[test]
    fn test_token_boundary_values() {
        let max_token = Token(0xFFFFFFFF);
        assert_eq!(max_token.table(), 0xFF);
        assert_eq!(max_token.row(), 0x00FFFFFF);
    }
}
