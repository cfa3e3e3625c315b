//! Filesystem operations module.
//!
//! This module provides the target-side filesystem work of a run:
//! - Choosing a final output path under the conflict policy
//! - Creating target directories lazily, once per directory
//! - Checking that the target root is writable before anything is converted

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::EngineError;

/// Length of the random token inserted into conflicting output names.
const TOKEN_LEN: usize = 8;

/// Output paths already produced in this run.
#[derive(Debug, Default)]
pub struct OutputRegistry {
    claimed: HashSet<PathBuf>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        OutputRegistry::default()
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.claimed.contains(path)
    }

    pub fn claim(&mut self, path: &Path) {
        self.claimed.insert(path.to_path_buf());
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// Insert `-<suffix>` before the extension: `report.xlsx` -> `report-<suffix>.xlsx`.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}-{}", stem, suffix),
    };
    path.with_file_name(name)
}

/// Insert `-<token>` before the extension: `report.xlsx` -> `report-1a2b3c4d.xlsx`.
pub fn with_unique_token(path: &Path) -> PathBuf {
    let token = Uuid::new_v4().simple().to_string();
    with_suffix(path, &token[..TOKEN_LEN])
}

/// Pick the final output path for a provisional one and claim it.
///
/// - Without `overwrite`, an existing file (or an output already produced in
///   this run) is left alone and a token-suffixed sibling is chosen instead.
/// - With `overwrite`, an existing file from an earlier run is deleted so the
///   new output replaces it. When another source of this run already claimed
///   the provisional path, the output is named after the source's extension
///   (`a.xlsb` -> `a-xlsb.xlsx`) and replaced the same way, so repeated runs
///   always produce the same set of files.
///
/// # Errors
/// An existing output cannot be removed, or (with `overwrite`) the
/// extension-named output is also taken in this run.
pub fn resolve_output_path(
    provisional: &Path,
    source: &Path,
    overwrite: bool,
    registry: &mut OutputRegistry,
) -> io::Result<PathBuf> {
    let taken_in_run = registry.is_claimed(provisional);

    if overwrite {
        let output = if taken_in_run {
            let source_ext = source
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default();
            let candidate = with_suffix(provisional, &source_ext);
            if source_ext.is_empty() || registry.is_claimed(&candidate) {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!(
                        "{} is already written by another source in this run",
                        provisional.display()
                    ),
                ));
            }
            candidate
        } else {
            provisional.to_path_buf()
        };

        match fs::remove_file(&output) {
            Ok(()) => log::debug!("Removed existing output {}", output.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        registry.claim(&output);
        return Ok(output);
    }

    if !taken_in_run && !provisional.exists() {
        registry.claim(provisional);
        return Ok(provisional.to_path_buf());
    }

    loop {
        let candidate = with_unique_token(provisional);
        if !registry.is_claimed(&candidate) && !candidate.exists() {
            registry.claim(&candidate);
            return Ok(candidate);
        }
    }
}

/// Target directories known to exist during this run.
#[derive(Debug, Default)]
pub struct DirectoryTracker {
    created: HashSet<PathBuf>,
}

impl DirectoryTracker {
    pub fn new() -> Self {
        DirectoryTracker::default()
    }

    /// Make sure the directory holding `path` exists. The filesystem is only
    /// consulted the first time a directory is seen.
    pub fn ensure_parent(&mut self, path: &Path) -> Result<(), EngineError> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        if parent.as_os_str().is_empty() || self.created.contains(parent) {
            return Ok(());
        }
        ensure_dir_exists(parent)?;
        self.created.insert(parent.to_path_buf());
        Ok(())
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.created.contains(dir)
    }
}

/// Ensure a directory exists, creating it (and its parents) if necessary.
///
/// # Errors
/// Returns EngineError if the path exists but is not a directory, or if
/// creation fails.
pub fn ensure_dir_exists(dir: &Path) -> Result<(), EngineError> {
    match fs::metadata(dir) {
        Ok(metadata) => {
            if metadata.is_dir() {
                Ok(())
            } else {
                Err(EngineError::DirectoryCreationFailed {
                    path: dir.to_path_buf(),
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "Path exists but is not a directory",
                    ),
                })
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(|e| EngineError::DirectoryCreationFailed {
                path: dir.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: e,
        }),
    }
}

/// Verify that files can be created in `dir`, creating `dir` if needed.
///
/// A small probe file is written and removed again.
pub fn check_writable(dir: &Path) -> Result<(), EngineError> {
    let not_writable = |source: io::Error| EngineError::TargetNotWritable {
        path: dir.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(not_writable)?;
    let probe = dir.join(format!(".sheetconv-probe-{}", Uuid::new_v4().simple()));
    fs::write(&probe, b"").map_err(not_writable)?;
    if let Err(e) = fs::remove_file(&probe) {
        log::warn!("Could not remove write probe {}: {}", probe.display(), e);
    }
    Ok(())
}
