//! LibreOffice-backed conversion engine.
//!
//! Every `save_as` runs one headless `soffice --convert-to` process against a
//! private user profile owned by the engine, so a run never attaches to (or
//! is blocked by) an interactive LibreOffice session of the same user.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use crate::conversion::{ConversionEngine, Document};
use crate::error::{ConversionError, EngineError};
use crate::model::TargetFormat;

/// Phrases in soffice output that mean the instance or its profile is busy.
/// Problems with one document (a locked or protected file) are not listed.
const LOCK_PHRASES: &[&str] = &[
    "is already running",
    "another instance",
    "user installation could not be completed",
];

/// A headless LibreOffice installation.
pub struct OfficeEngine {
    program: String,
    version: String,
    profile: Option<TempDir>,
    profile_url: String,
}

impl OfficeEngine {
    /// Check that `program` runs and set up a private profile for it.
    ///
    /// # Errors
    /// `EngineError::EngineUnavailable` if the program cannot be started or
    /// reports failure for `--version`.
    pub fn detect(program: &str) -> Result<Self, EngineError> {
        let unavailable = |reason: String| EngineError::EngineUnavailable {
            program: program.to_string(),
            reason,
        };

        let output = Command::new(program)
            .arg("--version")
            .output()
            .map_err(|e| unavailable(format!("failed to execute: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(unavailable(format!("--version failed: {}", stderr.trim())));
        }

        let mut engine = Self::new(program)?;
        engine.version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        log::info!("Using {} ({})", engine.version, program);
        Ok(engine)
    }

    /// Engine for `program` without probing it first.
    pub fn new(program: &str) -> Result<Self, EngineError> {
        let profile = tempfile::Builder::new()
            .prefix("sheetconv-profile-")
            .tempdir()
            .map_err(|e| EngineError::EngineUnavailable {
                program: program.to_string(),
                reason: format!("cannot create profile directory: {}", e),
            })?;
        let profile_url = file_url(profile.path());

        Ok(OfficeEngine {
            program: program.to_string(),
            version: String::new(),
            profile: Some(profile),
            profile_url,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn profile_dir(&self) -> Option<&Path> {
        self.profile.as_ref().map(TempDir::path)
    }
}

impl ConversionEngine for OfficeEngine {
    fn open(&mut self, path: &Path) -> Result<Box<dyn Document>, ConversionError> {
        if self.profile.is_none() {
            return Err(ConversionError::Open {
                path: path.to_path_buf(),
                message: "engine has been shut down".to_string(),
            });
        }

        let metadata = fs::metadata(path).map_err(|e| ConversionError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if !metadata.is_file() {
            return Err(ConversionError::Open {
                path: path.to_path_buf(),
                message: "not a regular file".to_string(),
            });
        }

        // Another user holding this document only fails this document.
        if let Some(marker) = lock_marker_for(path) {
            if marker.exists() {
                return Err(ConversionError::Open {
                    path: path.to_path_buf(),
                    message: format!("document is open in another session ({} exists)", marker.display()),
                });
            }
        }

        Ok(Box::new(OfficeDocument {
            program: self.program.clone(),
            profile_url: self.profile_url.clone(),
            source: path.to_path_buf(),
        }))
    }

    fn quit(&mut self) -> Result<(), ConversionError> {
        match self.profile.take() {
            Some(profile) => profile.close().map_err(|e| ConversionError::Quit {
                message: format!("cannot remove profile directory: {}", e),
            }),
            None => Ok(()),
        }
    }

    fn process_names(&self) -> Vec<String> {
        vec!["soffice".to_string(), "soffice.bin".to_string()]
    }
}

/// A source document queued for conversion. soffice loads it fresh for each
/// save, so there is nothing to hold open between calls.
struct OfficeDocument {
    program: String,
    profile_url: String,
    source: PathBuf,
}

impl Document for OfficeDocument {
    fn save_as(&mut self, path: &Path, format: TargetFormat) -> Result<(), ConversionError> {
        let save_error = |message: String| ConversionError::Save {
            path: path.to_path_buf(),
            message,
        };

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let staging = tempfile::Builder::new()
            .prefix(".sheetconv-")
            .tempdir_in(parent)?;

        let output = Command::new(&self.program)
            .arg(format!("-env:UserInstallation={}", self.profile_url))
            .args(["--headless", "--norestore", "--nologo", "--convert-to", format.filter(), "--outdir"])
            .arg(staging.path())
            .arg(&self.source)
            .output()
            .map_err(|e| save_error(format!("failed to execute {}: {}", self.program, e)))?;

        let mut produced_name = self.source.file_stem().unwrap_or_default().to_os_string();
        produced_name.push(".");
        produced_name.push(format.extension());
        let produced = staging.path().join(produced_name);

        // soffice exits 0 on many conversion failures, so the file is the real signal.
        if !output.status.success() || !produced.is_file() {
            let mut message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if message.is_empty() {
                message = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            if mentions_lock(&message) {
                return Err(ConversionError::Locked { message });
            }
            if message.is_empty() {
                message = format!("no output produced ({})", output.status);
            }
            return Err(save_error(message));
        }

        fs::rename(&produced, path)?;
        log::debug!("{} written by {}", path.display(), self.program);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConversionError> {
        Ok(())
    }
}

/// `.~lock.<name>#` next to the document, as LibreOffice writes while editing it.
fn lock_marker_for(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy();
    Some(path.with_file_name(format!(".~lock.{}#", name)))
}

fn mentions_lock(output: &str) -> bool {
    let output = output.to_lowercase();
    LOCK_PHRASES.iter().any(|phrase| output.contains(phrase))
}

fn file_url(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    if path.starts_with('/') {
        format!("file://{}", path)
    } else {
        format!("file:///{}", path)
    }
}
