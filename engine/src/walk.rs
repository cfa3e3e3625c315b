//! Source tree enumeration.
//!
//! `walk_tasks` lazily walks a source tree and yields one `ConversionTask`
//! per eligible file, with the output path mirrored under the target root.
//! Nothing is created on the target side here; directories are made by the
//! orchestrator when the first task in them is converted.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::model::{ConversionTask, TargetFormat};

/// Filename prefixes of transient lock files editors leave next to an open
/// document (`~$book.xls` from Office, `.~lock.book.xls#` from LibreOffice).
pub const LOCK_MARKER_PREFIXES: &[&str] = &["~$", ".~lock."];

/// Parse a `;`-separated format list such as `.xls; XLSB;xlt` into
/// lower-case extensions without dots. Empty entries are dropped.
pub fn parse_extensions(list: &str) -> Vec<String> {
    normalize_extensions(list.split(';'))
}

pub fn normalize_extensions<I, S>(entries: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut extensions: Vec<String> = Vec::new();
    for entry in entries {
        let ext = entry.as_ref().trim().trim_start_matches('.').to_lowercase();
        if !ext.is_empty() && !extensions.contains(&ext) {
            extensions.push(ext);
        }
    }
    extensions
}

pub fn is_lock_marker(file_name: &str) -> bool {
    LOCK_MARKER_PREFIXES.iter().any(|prefix| file_name.starts_with(prefix))
}

/// Returns the lower-case extension of `path` if it is in `allowed`.
pub fn matching_extension(path: &Path, allowed: &[String]) -> Option<String> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    allowed.iter().any(|a| *a == ext).then_some(ext)
}

/// Lazy sequence of conversion tasks under a source root.
pub struct TaskWalker {
    inner: walkdir::IntoIter,
    source_root: PathBuf,
    target_root: PathBuf,
    allowed: Vec<String>,
    target_format: TargetFormat,
}

/// Walk `source_root`, yielding tasks for files whose extension is in
/// `allowed` (already normalized) and whose name is not a lock marker.
///
/// Unreadable entries come out as `Err` items; the walk continues after them.
pub fn walk_tasks(
    source_root: &Path,
    target_root: &Path,
    allowed: &[String],
    target_format: TargetFormat,
) -> TaskWalker {
    TaskWalker {
        inner: WalkDir::new(source_root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter(),
        source_root: source_root.to_path_buf(),
        target_root: target_root.to_path_buf(),
        allowed: allowed.to_vec(),
        target_format,
    }
}

impl TaskWalker {
    fn task_for(&self, path: &Path) -> Option<ConversionTask> {
        let file_name = path.file_name()?.to_string_lossy();
        if is_lock_marker(&file_name) {
            log::debug!("Skipping lock file {}", path.display());
            return None;
        }
        let extension = matching_extension(path, &self.allowed)?;
        let relative = path.strip_prefix(&self.source_root).ok()?;
        let output_path = self
            .target_root
            .join(relative)
            .with_extension(self.target_format.extension());

        Some(ConversionTask {
            source_path: path.to_path_buf(),
            output_path,
            extension,
        })
    }
}

impl Iterator for TaskWalker {
    type Item = Result<ConversionTask, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.source_root.clone());
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
                    return Some(Err(EngineError::EnumerationFailed { path, source }));
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(task) = self.task_for(entry.path()) {
                return Some(Ok(task));
            }
        }
    }
}
