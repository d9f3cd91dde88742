//! Physical metadata root (BSJB) parsing and rebuilding.
//!
//! The root sits at the RVA the COR20 header's `MetaData` directory points at: the
//! `BSJB` signature, a version string, and the stream directory locating `#~`,
//! `#Strings`, `#US`, `#GUID`, and `#Blob` within the metadata block.
//!
//! ## Reference
//! * ECMA-335 6th Edition, Partition II, Section 24.2

use crate::{file::parser::Parser, Result};

/// `BSJB` signature.
const METADATA_MAGIC: u32 = 0x424A_5342;

/// One entry of the stream directory.
#[derive(Debug, Clone)]
pub struct StreamHeader {
    /// Offset of the stream, relative to the start of the metadata root.
    pub offset: u32,
    /// Declared size of the stream in bytes.
    pub size: u32,
    /// Stream name (`#~`, `#Strings`, ...).
    pub name: String,
}

/// Parsed metadata root.
#[derive(Debug, Clone)]
pub struct MetadataRoot {
    pub major_version: u16,
    pub minor_version: u16,
    /// Runtime version string (e.g. `v4.0.30319`).
    pub version: String,
    pub flags: u16,
    pub streams: Vec<StreamHeader>,
}

impl MetadataRoot {
    /// Parse a metadata root from the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad signature or directory, or
    /// [`crate::Error::OutOfBounds`] if a declared stream falls outside `data`.
    pub fn parse(data: &[u8]) -> Result<MetadataRoot> {
        let mut parser = Parser::new(data);

        let magic = parser.read_le::<u32>()?;
        if magic != METADATA_MAGIC {
            return Err(malformed_error!(
                "Invalid metadata root signature - {:#x}",
                magic
            ));
        }

        let major_version = parser.read_le::<u16>()?;
        let minor_version = parser.read_le::<u16>()?;
        let _reserved = parser.read_le::<u32>()?;

        let version_length = parser.read_le::<u32>()? as usize;
        let version_start = parser.pos();
        let version = parser.read_string_utf8()?;
        parser.seek(version_start + version_length)?;

        let flags = parser.read_le::<u16>()?;
        let stream_count = parser.read_le::<u16>()?;

        let mut streams = Vec::with_capacity(stream_count as usize);
        for _ in 0..stream_count {
            let offset = parser.read_le::<u32>()?;
            let size = parser.read_le::<u32>()?;
            let name = parser.read_string_utf8()?;
            parser.align(4)?;

            let Some(end) = offset.checked_add(size) else {
                return Err(malformed_error!("Stream '{}' overflows", name));
            };
            if end as usize > data.len() {
                return Err(malformed_error!(
                    "Stream '{}' extends past the metadata block",
                    name
                ));
            }

            streams.push(StreamHeader { offset, size, name });
        }

        Ok(MetadataRoot {
            major_version,
            minor_version,
            version,
            flags,
            streams,
        })
    }

    /// Stream directory entry by name.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&StreamHeader> {
        self.streams.iter().find(|header| header.name == name)
    }
}

/// Serialize a complete metadata block: root header, stream directory, and the stream
/// contents in the given order. Every stream is padded to a 4-byte boundary.
#[must_use]
pub fn build_metadata(version: &str, flags: u16, streams: &[(String, Vec<u8>)]) -> Vec<u8> {
    // Version string buffer is null-terminated and padded to 4 bytes.
    let version_padded = (version.len() + 1).next_multiple_of(4);

    let directory_size: usize = streams
        .iter()
        .map(|(name, _)| 8 + (name.len() + 1).next_multiple_of(4))
        .sum();
    let header_size = 16 + version_padded + 4 + directory_size;

    let mut offsets = Vec::with_capacity(streams.len());
    let mut cursor = header_size;
    for (_, bytes) in streams {
        offsets.push(cursor);
        cursor += bytes.len().next_multiple_of(4);
    }

    let mut out = Vec::with_capacity(cursor);
    out.extend_from_slice(&METADATA_MAGIC.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&u32::try_from(version_padded).unwrap_or(0).to_le_bytes());
    out.extend_from_slice(version.as_bytes());
    out.resize(16 + version_padded, 0);

    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&u16::try_from(streams.len()).unwrap_or(0).to_le_bytes());

    for ((name, bytes), offset) in streams.iter().zip(&offsets) {
        let padded = bytes.len().next_multiple_of(4);
        out.extend_from_slice(&u32::try_from(*offset).unwrap_or(0).to_le_bytes());
        out.extend_from_slice(&u32::try_from(padded).unwrap_or(0).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }

    for (_, bytes) in streams {
        out.extend_from_slice(bytes);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }

    out
}
