//! Error types for the deploy engine.
//!
//! Every operation fails fast with one of these variants. The set is closed:
//! callers can match on it exhaustively and no failure is ever retried.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for deploy, diet and extract operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Parameter Errors ====================
    #[error("no engine supplied (give either one engine or per-architecture engines)")]
    NoEngine,

    #[error("no output path supplied")]
    NoOutput,

    #[error("invalid UUID '{0}'")]
    InvalidUuid(String),

    // ==================== Header Errors ====================
    #[error("could not read a Mach-O header at offset {offset:#x}")]
    NoHeader { offset: usize },

    #[error("unsupported Mach-O header (magic {magic:#x}, filetype {filetype:#x})")]
    BadHeader { magic: u32, filetype: u32 },

    #[error("bad load command at offset {offset:#x}: {reason}")]
    BadCommand { offset: usize, reason: String },

    #[error("malformed file at offset {offset:#x}: {reason}")]
    BadFile { offset: usize, reason: String },

    #[error("{field} requires {needed} bytes but only {available} remain in the file")]
    NoMemory {
        field: &'static str,
        needed: u64,
        available: u64,
    },

    // ==================== Engine Validation Errors ====================
    #[error("engine has an unsupported CPU type {0:#x}")]
    BadCpuType(u32),

    #[error("engine does not link against {framework}")]
    BadTarget { framework: &'static str },

    // ==================== Segment Layout Errors ====================
    #[error("engine has no __LINKEDIT segment")]
    NoLinkEditSegment,

    #[error("engine has no __PROJECT segment")]
    NoProjectSegment,

    #[error("engine has no __PAYLOAD segment")]
    NoPayloadSegment,

    #[error("engine segments are out of order: {reason}")]
    BadSegmentOrder { reason: &'static str },

    #[error("unknown load command {0:#x} after __LINKEDIT")]
    UnknownLoadCommand(u32),

    // ==================== Diet Errors ====================
    #[error("cannot diet image: {reason}")]
    CannotDiet { reason: &'static str },

    #[error("no architectures left after filtering")]
    NoArchs,

    // ==================== Extract Errors ====================
    #[error("section '{segment},{section}' not found")]
    SectionNotFound { segment: String, section: String },
}

/// A specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a bad command error with a formatted message.
    #[inline]
    pub fn bad_command(offset: usize, reason: impl Into<String>) -> Self {
        Error::BadCommand {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a bad file error with a formatted message.
    #[inline]
    pub fn bad_file(offset: usize, reason: impl Into<String>) -> Self {
        Error::BadFile {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates an error for a table that claims more bytes than the file holds.
    #[inline]
    pub fn no_memory(field: &'static str, needed: u64, available: u64) -> Self {
        Error::NoMemory {
            field,
            needed,
            available,
        }
    }

    /// Returns true if the error is caused by the engine's structure rather
    /// than by the parameters or the file system.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::NoHeader { .. }
                | Error::BadHeader { .. }
                | Error::BadCommand { .. }
                | Error::BadFile { .. }
                | Error::NoMemory { .. }
                | Error::NoLinkEditSegment
                | Error::NoProjectSegment
                | Error::NoPayloadSegment
                | Error::BadSegmentOrder { .. }
                | Error::UnknownLoadCommand(_)
        )
    }
}
