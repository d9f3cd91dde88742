#![allow(clippy::module_name_repetitions)]

//! # netbehave
//!
//! A single-purpose patching tool for Unity Netcode game assemblies: it injects
//! trivial pass-through overrides of `Unity.Netcode.NetworkBehaviour`'s virtual `On*`
//! event methods into every subclass that lacks them, so hooking code can rely on
//! those methods always existing.
//!
//! The crate parses the .NET PE envelope and ECMA-335 metadata itself (headers,
//! heaps, the `#~` tables stream, signature blobs, and CIL bodies), mutates the
//! decoded tables, and writes a valid patched assembly to a cache directory. A
//! verification pass then re-opens the written file through the same read path and
//! reports how many subclasses are compliant.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::path::{Path, PathBuf};
//! use netbehave::{patch::{patch_assembly, PatchOptions}, verify::verify_patch};
//!
//! let options = PatchOptions::new(PathBuf::from("cache"));
//! let summary = patch_assembly(Path::new("Managed/Assembly-CSharp.dll"), &options)?;
//! let report = verify_patch(&summary, &options)?;
//! println!("{}/{} types compliant", report.compliant, report.total);
//! # Ok::<(), netbehave::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`file`] - memory-mapped and in-memory data access, byte-level parsing
//! - [`pe`] - PE header summary and the COR20 (CLI) header
//! - [`metadata`] - heaps, tables, signatures, and CIL bodies
//! - [`image`] - a fully parsed assembly ([`image::AssemblyImage`])
//! - [`resolver`] - directory-based assembly resolution
//! - [`patch`] - the plan / synthesize / emit pipeline
//! - [`verify`] - the observational compliance check
//!
//! ## Scope
//!
//! This is not a general bytecode rewriting framework. Uncompressed (`#-`) metadata,
//! `*Ptr` indirection tables, and edit-and-continue images are rejected as
//! [`Error::NotSupported`]; generic and vararg virtuals are excluded from the event
//! set, and signature shapes the importer cannot carry across assemblies (function
//! pointers, vararg sentinels, generic variables) abort the pass.
//!
//! ## Standards
//!
//! Metadata handling follows the ECMA-335 specification (6th edition), Partition II.

#[macro_use]
pub(crate) mod error;

pub mod file;
pub mod image;
pub mod metadata;
pub mod patch;
pub mod pe;
pub mod resolver;
pub mod verify;

pub use error::Error;

/// Convenience alias for `Result<T, netbehave::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

pub use image::AssemblyImage;
pub use patch::{patch_assembly, PatchOptions, PatchSummary};
pub use verify::{verify_assembly, verify_patch, VerifyReport};
