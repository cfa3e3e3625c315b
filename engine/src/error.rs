//! Error types for the conversion engine.
//!
//! Two layers of errors exist:
//! - `EngineError`: run-level errors that prevent a batch from starting or
//!   force it to stop (bad configuration, unavailable engine, a wedged engine).
//! - `ConversionError`: failures reported by the external conversion engine
//!   for a single document. These are classified by the retry layer and end
//!   up recorded in a `ConversionResult`, not returned from the run.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur at the run level.
///
/// Configuration variants are reported before any conversion begins.
/// `EngineLocked` is the only variant raised mid-run: it signals that the
/// shared engine instance stayed locked through the whole retry budget.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source directory does not exist
    #[error("Source directory not found: {}", .path.display())]
    SourceNotFound { path: PathBuf },

    /// Source directory is not accessible (permissions)
    #[error("Source directory access denied: {}", .path.display())]
    SourceAccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Target directory cannot be created or written to
    #[error("Target directory is not writable: {}", .path.display())]
    TargetNotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Path is unusable for the requested operation
    #[error("Invalid path: {} ({reason})", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// No usable extension was given in the allowed-format list
    #[error("No allowed source formats configured")]
    NoAllowedFormats,

    /// Failed to enumerate the source tree
    #[error("Failed to enumerate directory: {}", .path.display())]
    EnumerationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to create a target directory
    #[error("Failed to create directory: {}", .path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The conversion engine is missing or refused to start
    #[error("Conversion engine unavailable: {program} ({reason})")]
    EngineUnavailable { program: String, reason: String },

    /// The engine stayed locked for every allowed attempt; the run was aborted
    #[error("Conversion engine locked after {attempts} attempts while processing {}", .path.display())]
    EngineLocked {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: ConversionError,
    },

    /// The job was driven out of order (e.g. run twice)
    #[error("Job is in state {state} but {expected} is required")]
    InvalidState { state: String, expected: String },

    /// Failed to write the run report
    #[error("Failed to write report: {}", .path.display())]
    ReportFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::SourceAccessDenied { source, .. }
            | Self::TargetNotWritable { source, .. }
            | Self::EnumerationFailed { source, .. }
            | Self::DirectoryCreationFailed { source, .. }
            | Self::ReportFailed { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// True if this error aborted a run that had already started converting.
    pub fn is_run_abort(&self) -> bool {
        matches!(self, Self::EngineLocked { .. })
    }
}

/// Failures raised by a `ConversionEngine` or one of its documents.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The engine is blocked (modal dialog, licence prompt, concurrent use).
    /// This is the transient error the retry layer waits out.
    #[error("Engine is locked by another process: {message}")]
    Locked { message: String },

    /// The engine could not load the source document
    #[error("Failed to open {}: {message}", .path.display())]
    Open { path: PathBuf, message: String },

    /// The engine could not persist the document in the target format
    #[error("Failed to save {}: {message}", .path.display())]
    Save { path: PathBuf, message: String },

    /// Releasing a document handle failed
    #[error("Failed to close {}: {message}", .path.display())]
    Close { path: PathBuf, message: String },

    /// Shutting down the engine failed
    #[error("Failed to shut down conversion engine: {message}")]
    Quit { message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConversionError {
    /// True for the classified "resource locked by another process" error.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}
