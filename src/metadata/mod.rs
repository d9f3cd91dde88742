//! .NET metadata structures: the BSJB root, heaps, the `#~` tables stream, signature
//! blobs, and CIL method bodies.

pub mod heaps;
pub mod il;
pub mod method;
pub mod root;
pub mod signatures;
pub mod tables;
pub mod token;

/// Append an ECMA-335 II.23.2 compressed unsigned integer to `buffer`.
///
/// Values up to `0x1FFF_FFFF` are representable; anything wider is a caller bug and
/// is truncated into the 4-byte form.
pub fn write_compressed_uint(buffer: &mut Vec<u8>, value: u32) {
    if value < 0x80 {
        buffer.push(value as u8);
    } else if value < 0x4000 {
        buffer.extend_from_slice(&[(0x80 | (value >> 8)) as u8, value as u8]);
    } else {
        buffer.extend_from_slice(&[
            (0xC0 | (value >> 24)) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ]);
    }
}
