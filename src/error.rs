use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this crate can potentially
/// return.
///
/// This enum covers all failure modes of loading a .NET assembly image, planning and applying
/// the event-method patch, and verifying the written output. Each variant provides specific
/// context about the failure mode to enable appropriate error handling.
#[derive(Error, Debug)]
pub enum Error {
    /// The file is damaged and could not be parsed.
    ///
    /// This error indicates that the file structure is corrupted or doesn't
    /// conform to the expected .NET PE format. The error includes the source
    /// location where the malformation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the file.
    ///
    /// This error occurs when trying to read data beyond the end of the file
    /// or stream. It's a safety check to prevent buffer overruns during parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    ///
    /// Indicates that the input file is not a supported .NET PE executable,
    /// or uses features this crate does not rewrite (uncompressed `#-` streams,
    /// pointer indirection tables, edit-and-continue tables).
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations
    /// such as reading from disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during PE parsing.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// The patch target does not reference the configured base type.
    ///
    /// The target assembly carries no `TypeRef` whose full name matches the
    /// configured base type, so there is nothing to patch. The patch run is
    /// abandoned without writing any output.
    #[error("Base type '{0}' is not referenced by the target assembly")]
    MissingBaseType(String),

    /// Verification was requested but no patch output exists on disk.
    ///
    /// The verification pass re-reads the written file; if the patch phase
    /// never produced one, there is nothing to check.
    #[error("No patched assembly found at '{0}'")]
    MissingPatchState(String),

    /// An assembly referenced during type resolution could not be located.
    ///
    /// The associated value is the simple name of the assembly that was
    /// searched for in the configured search directories.
    #[error("Failed to resolve assembly '{0}'")]
    UnresolvedAssembly(String),

    /// A signature uses a construct this crate does not import.
    ///
    /// Method signatures are copied across assembly boundaries; constructs
    /// like function pointers or `TypeSpec`-scoped references are rejected
    /// rather than imported incorrectly.
    #[error("Unsupported signature construct - {0}")]
    UnsupportedSignature(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
