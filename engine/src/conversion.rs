//! Conversion engine interface and scoped resource handles.
//!
//! The engine itself is a black box reached through `ConversionEngine` and
//! `Document`. The orchestrator never holds those directly: it goes through
//! `EngineSession` and `DocumentHandle`, which track whether the underlying
//! resource is still open and release it exactly once, on drop if nothing
//! released it earlier.

use std::path::{Path, PathBuf};

use crate::error::ConversionError;
use crate::model::TargetFormat;

/// An external engine able to load spreadsheet documents.
///
/// Implementations are driven from a single thread, one document at a time.
pub trait ConversionEngine {
    /// Load a source document. Raises `ConversionError::Locked` when the
    /// engine is blocked.
    fn open(&mut self, path: &Path) -> Result<Box<dyn Document>, ConversionError>;

    /// Shut the engine down and free its resources.
    fn quit(&mut self) -> Result<(), ConversionError>;

    /// Executable names of the processes this engine spawns, used to find
    /// strays after the run.
    fn process_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A document opened by a `ConversionEngine`.
pub trait Document {
    fn save_as(&mut self, path: &Path, format: TargetFormat) -> Result<(), ConversionError>;

    fn close(&mut self) -> Result<(), ConversionError>;
}

/// Exclusive owner of the run's single engine instance.
pub struct EngineSession {
    engine: Option<Box<dyn ConversionEngine>>,
}

impl EngineSession {
    pub fn new(engine: Box<dyn ConversionEngine>) -> Self {
        EngineSession { engine: Some(engine) }
    }

    pub fn is_open(&self) -> bool {
        self.engine.is_some()
    }

    pub fn open(&mut self, path: &Path) -> Result<DocumentHandle, ConversionError> {
        let engine = self.engine.as_mut().ok_or_else(|| ConversionError::Open {
            path: path.to_path_buf(),
            message: "engine already released".to_string(),
        })?;
        let document = engine.open(path)?;
        Ok(DocumentHandle::new(path, document))
    }

    /// Quit the engine. Later calls are no-ops.
    pub fn release(&mut self) -> Result<(), ConversionError> {
        match self.engine.take() {
            Some(mut engine) => engine.quit(),
            None => Ok(()),
        }
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("Conversion engine release failed: {}", e);
        }
    }
}

/// An open document that is closed exactly once.
pub struct DocumentHandle {
    path: PathBuf,
    document: Option<Box<dyn Document>>,
}

impl DocumentHandle {
    fn new(path: &Path, document: Box<dyn Document>) -> Self {
        DocumentHandle {
            path: path.to_path_buf(),
            document: Some(document),
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.document.is_some()
    }

    pub fn save_as(&mut self, path: &Path, format: TargetFormat) -> Result<(), ConversionError> {
        match self.document.as_mut() {
            Some(document) => document.save_as(path, format),
            None => Err(ConversionError::Save {
                path: path.to_path_buf(),
                message: "document already closed".to_string(),
            }),
        }
    }

    pub fn close(&mut self) -> Result<(), ConversionError> {
        match self.document.take() {
            Some(mut document) => document.close(),
            None => Ok(()),
        }
    }
}

impl Drop for DocumentHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Closing {} failed: {}", self.path.display(), e);
        }
    }
}
