//! Run log sink.
//!
//! `RunLog` is handed to every component that reports events. Console output
//! goes through the `log` facade; when file logging is enabled the same
//! events are appended to two UTF-8 text files:
//! - the info log, one timestamped line per notable event
//! - the error log, one multi-line block per failure with the full error chain

use chrono::Local;
use std::error::Error;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const INFO_LOG_NAME: &str = "sheetconv-info.log";
pub const ERROR_LOG_NAME: &str = "sheetconv-errors.log";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Default)]
pub struct RunLog {
    info_path: Option<PathBuf>,
    error_path: Option<PathBuf>,
}

impl RunLog {
    /// Console-only logging.
    pub fn console() -> Self {
        RunLog::default()
    }

    /// Console logging plus the two append-only files inside `dir`.
    pub fn with_files(dir: &Path) -> Self {
        RunLog {
            info_path: Some(dir.join(INFO_LOG_NAME)),
            error_path: Some(dir.join(ERROR_LOG_NAME)),
        }
    }

    pub fn info_path(&self) -> Option<&Path> {
        self.info_path.as_deref()
    }

    pub fn error_path(&self) -> Option<&Path> {
        self.error_path.as_deref()
    }

    pub fn info(&self, message: &str) {
        log::info!("{}", message);
        self.append_line(message);
    }

    pub fn warn(&self, message: &str) {
        log::warn!("{}", message);
        self.append_line(&format!("WARNING: {}", message));
    }

    /// Record a failure. The info log gets a one-line mention and the error
    /// log gets the full diagnostic block.
    pub fn error(&self, context: &str, err: &dyn Error) {
        log::error!("{}: {}", context, err);
        self.append_line(&format!("ERROR: {}: {}", context, err));

        let Some(path) = &self.error_path else {
            return;
        };
        let mut block = String::new();
        block.push_str(&format!("==== {} ====\n", Local::now().format(TIMESTAMP_FORMAT)));
        block.push_str(&format!("Context: {}\n", context));
        block.push_str(&format!("Error: {}\n", err));
        let mut cause = err.source();
        while let Some(inner) = cause {
            block.push_str(&format!("Caused by: {}\n", inner));
            cause = inner.source();
        }
        block.push_str(&format!("Debug: {:?}\n\n", err));
        append(path, &block);
    }

    fn append_line(&self, message: &str) {
        if let Some(path) = &self.info_path {
            let line = format!("[{}] {}\n", Local::now().format(TIMESTAMP_FORMAT), message);
            append(path, &line);
        }
    }
}

fn append(path: &Path, text: &str) {
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(text.as_bytes()));
    if let Err(e) = result {
        log::warn!("Cannot write log file {}: {}", path.display(), e);
    }
}
