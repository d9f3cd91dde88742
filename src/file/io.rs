//! Low-level byte order and safe reading/writing utilities for CIL and PE parsing.
//!
//! All multi-byte values in PE files and CIL metadata are little-endian. The helpers in
//! this module provide bounds-checked access to byte buffers, either from the start of a
//! buffer or at a tracked offset that advances with each read or write.

use crate::{Error::OutOfBounds, Result};

/// Trait for primitive types that can be read from and written to little-endian byte buffers.
///
/// Implemented for the unsigned and signed integer types the metadata format uses. The
/// associated `Bytes` type is the fixed-size array matching the type's width.
pub trait CilIO: Sized {
    /// The byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Read `Self` from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Write `Self` to a byte buffer in little-endian
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_cilio {
    ($($t:ty),*) => {
        $(
            impl CilIO for $t {
                type Bytes = [u8; std::mem::size_of::<$t>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$t>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$t>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_cilio!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Safely reads a value of type `T` in little-endian byte order from the start of a buffer.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer holds fewer bytes than `T` needs.
pub fn read_le<T: CilIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at a specific offset.
///
/// The offset is advanced by the number of bytes read.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes at `offset`.
pub fn read_le_at<T: CilIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..*offset + type_len].try_into() else {
        return Err(OutOfBounds);
    };

    *offset += type_len;

    Ok(T::from_le_bytes(read))
}

/// Dynamically reads either a 2-byte or 4-byte value in little-endian byte order.
///
/// Metadata table columns and heap indexes are stored as `u16` or `u32` depending on
/// table and heap sizes; `is_large` selects the width. Narrow values are promoted to
/// `u32` so callers get a uniform type.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes at `offset`.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    let res = if is_large {
        read_le_at::<u32>(data, offset)?
    } else {
        u32::from(read_le_at::<u16>(data, offset)?)
    };

    Ok(res)
}

/// Safely writes a value of type `T` in little-endian byte order at a specific offset.
///
/// The offset is advanced by the number of bytes written.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer has insufficient room at `offset`.
pub fn write_le_at<T: CilIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()>
where
    T::Bytes: AsRef<[u8]>,
{
    let bytes = value.to_le_bytes();
    let type_len = bytes.as_ref().len();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..*offset + type_len].copy_from_slice(bytes.as_ref());
    *offset += type_len;

    Ok(())
}

/// Dynamically writes either a 2-byte or 4-byte value in little-endian byte order.
///
/// The counterpart of [`read_le_at_dyn`] for serializing metadata table columns.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer has insufficient room, or
/// [`crate::Error::Malformed`] if a narrow write is requested for a value above `u16::MAX`.
pub fn write_le_at_dyn(data: &mut [u8], offset: &mut usize, value: u32, is_large: bool) -> Result<()> {
    if is_large {
        write_le_at::<u32>(data, offset, value)
    } else {
        let narrow = u16::try_from(value)
            .map_err(|_| malformed_error!("Value does not fit narrow column - {}", value))?;
        write_le_at::<u16>(data, offset, narrow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_le_values() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00];
        let mut offset = 0;

        let first: u16 = read_le_at(&data, &mut offset).unwrap();
        let second: u16 = read_le_at(&data, &mut offset).unwrap();
        let third: u32 = read_le_at(&data, &mut offset).unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(third, 3);
        assert_eq!(offset, 8);
    }

    #[test]
    fn read_le_out_of_bounds() {
        let data = [0x01, 0x00];
        let mut offset = 1;
        assert!(read_le_at::<u32>(&data, &mut offset).is_err());
        assert_eq!(offset, 1);
    }

    #[test]
    fn read_dyn_widths() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00];
        let mut offset = 0;

        assert_eq!(read_le_at_dyn(&data, &mut offset, false).unwrap(), 1);
        assert_eq!(read_le_at_dyn(&data, &mut offset, true).unwrap(), 2);
        assert_eq!(offset, 6);
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut data = [0u8; 8];
        let mut offset = 0;

        write_le_at(&mut data, &mut offset, 0xAABBu16).unwrap();
        write_le_at(&mut data, &mut offset, 0x1122_3344u32).unwrap();
        assert_eq!(offset, 6);

        let mut read_offset = 0;
        assert_eq!(read_le_at::<u16>(&data, &mut read_offset).unwrap(), 0xAABB);
        assert_eq!(read_le_at::<u32>(&data, &mut read_offset).unwrap(), 0x1122_3344);
    }

    #[test]
    fn write_dyn_narrow_overflow() {
        let mut data = [0u8; 4];
        let mut offset = 0;
        assert!(write_le_at_dyn(&mut data, &mut offset, 0x10000, false).is_err());
        assert!(write_le_at_dyn(&mut data, &mut offset, 0x10000, true).is_ok());
    }
}
