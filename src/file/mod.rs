//! PE file abstraction and .NET binary access.
//!
//! This module provides the data-access layer for assemblies on disk: a [`Backend`] trait
//! abstracting over memory-mapped files and in-memory buffers, the [`File`] wrapper that
//! validates the PE envelope and resolves addresses, and the low-level [`io`] and
//! [`parser`] utilities the metadata layer is built on.
//!
//! # References
//!
//! - Microsoft PE/COFF Specification
//! - ECMA-335 6th Edition, Partition II - PE File Format

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{pe::PeInfo, Error::Empty, Result};
use memory::Memory;
use physical::Physical;

/// Backend trait for file data sources.
///
/// This trait abstracts over the source of PE data, allowing for both in-memory and on-disk
/// representations. All implementations must be thread-safe.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;
}

/// Represents a loaded PE file carrying .NET metadata.
///
/// Loading validates the PE envelope and the presence of a CLR runtime header; the parsed
/// header summary is kept as owned data (see [`crate::pe::PeInfo`]) so the patcher can
/// compute header offsets without holding borrows into the file.
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// Owned summary of the PE headers.
    pe: PeInfo,
}

impl File {
    /// Loads a PE file from the given path.
    ///
    /// The file is memory-mapped for efficient access.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or opened
    /// - The file is not a valid PE format
    /// - The PE file does not contain .NET metadata (missing CLR runtime header)
    /// - The file is empty
    pub fn from_file(file: &Path) -> Result<File> {
        let input = Physical::new(file)?;

        Self::load(input)
    }

    /// Loads a PE file from a memory buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is empty, not a valid PE, or missing .NET metadata.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        let input = Memory::new(data);

        Self::load(input)
    }

    /// Internal loader for any backend.
    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        let pe = PeInfo::parse(data.data())?;

        Ok(File {
            data: Box::new(data),
            pe,
        })
    }

    /// Returns the total size of the loaded file in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the file has a length of zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the parsed PE header summary.
    #[must_use]
    pub fn pe(&self) -> &PeInfo {
        &self.pe
    }

    /// Returns the RVA and size (in bytes) of the CLR runtime header.
    #[must_use]
    pub fn clr(&self) -> (u32, u32) {
        (self.pe.clr_rva, self.pe.clr_size)
    }

    /// Converts a relative virtual address into a file offset.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the RVA falls outside every section.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        self.pe.rva_to_offset(rva)
    }

    /// Returns a bounds-checked slice of the file data.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the requested range is out of bounds.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.data.data_slice(offset, len)
    }

    /// Returns the entire file data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.data.data()
    }
}
