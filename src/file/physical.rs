//! Physical file backend for memory-mapped I/O.
//!
//! Assemblies are mapped read-only into the address space instead of being read into a
//! buffer upfront. Metadata parsing touches the file in a non-sequential pattern, so the
//! operating system's demand paging is a good fit.

use super::Backend;
use crate::{
    Error::{Error, FileError, OutOfBounds},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A file backend that uses memory-mapped I/O for efficient access to files on disk.
///
/// The mapping is read-only and shared. All access operations include bounds checking
/// to ensure memory safety.
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// # Arguments
    /// * `path` - Path to the PE file on disk
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// [`crate::Error::Error`] if memory mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Error(error.to_string())),
        };

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if offset_end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_invalid_file_path() {
        let result = Physical::new("/nonexistent/path/to/file.dll");
        assert!(result.is_err());
        match result.unwrap_err() {
            FileError(io_error) => {
                assert_eq!(io_error.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected FileError"),
        }
    }

    #[test]
    fn physical_bounds() {
        let temp_dir = std::env::temp_dir();
        let temp_path = temp_dir.join("netbehave_physical_bounds.bin");
        std::fs::write(&temp_path, [0xAA_u8, 0xBB, 0xCC, 0xDD]).unwrap();

        let physical = Physical::new(&temp_path).unwrap();
        assert_eq!(physical.len(), 4);
        assert_eq!(physical.data_slice(1, 2).unwrap(), &[0xBB, 0xCC]);
        assert!(physical.data_slice(3, 2).is_err());
        assert!(physical.data_slice(usize::MAX, 1).is_err());

        std::fs::remove_file(&temp_path).unwrap();
    }
}
