//! Core data model for conversion runs.
//!
//! This module defines the main data structures:
//! - ConversionJob: one batch run over a source tree
//! - ConversionTask: a single eligible source file and its provisional output
//! - ConversionResult: what happened to one task
//! - RunSession: read-only settings shared by every component for one run
//! - TargetFormat, Outcome, JobState: enums controlling behavior

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

/// Represents one batch conversion over a source tree.
#[derive(Debug)]
pub struct ConversionJob {
    /// Unique identifier for this job
    pub id: Uuid,

    /// Root source directory
    pub source_root: PathBuf,

    /// Root target directory (mirrors the source layout)
    pub target_root: PathBuf,

    /// Lower-case source extensions eligible for conversion, without dots
    pub allowed_extensions: Vec<String>,

    /// Format every output is written in
    pub target_format: TargetFormat,

    /// Tasks discovered by planning
    pub tasks: Vec<ConversionTask>,

    /// One result per processed task, in task order
    pub results: Vec<ConversionResult>,

    /// Current job state
    pub state: JobState,

    /// Index of the task currently being converted (if Running)
    pub current_task_index: Option<usize>,

    /// When job was created
    pub created_at: DateTime<Local>,

    /// When job execution started
    pub start_time: Option<DateTime<Local>>,

    /// When job execution finished or was aborted
    pub end_time: Option<DateTime<Local>>,
}

impl ConversionJob {
    /// Count results by outcome.
    pub fn summary(&self) -> JobSummary {
        let mut summary = JobSummary::default();
        for result in &self.results {
            match result.outcome {
                Outcome::Success => summary.succeeded += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Aborted => summary.aborted += 1,
            }
        }
        summary
    }
}

/// A single source file scheduled for conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionTask {
    /// Full source path
    pub source_path: PathBuf,

    /// Mirrored output path before conflict resolution
    pub output_path: PathBuf,

    /// Lower-case source extension without the dot
    pub extension: String,
}

/// Final state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// Converted and saved
    Success,
    /// This file failed; the batch continued
    Failed,
    /// Never attempted because the run was aborted
    Aborted,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "Success"),
            Outcome::Failed => write!(f, "Failed"),
            Outcome::Aborted => write!(f, "Aborted"),
        }
    }
}

/// What happened to one task.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    pub task: ConversionTask,
    pub outcome: Outcome,

    /// Most tries any single engine call needed (0 if the engine was never called)
    pub attempts_used: u32,

    /// Where the output actually landed (Success only)
    pub output_path: Option<PathBuf>,

    /// Human-readable error message (Failed and Aborted)
    pub error: Option<String>,
}

impl ConversionResult {
    pub fn success(task: ConversionTask, output_path: PathBuf, attempts_used: u32) -> Self {
        ConversionResult {
            task,
            outcome: Outcome::Success,
            attempts_used,
            output_path: Some(output_path),
            error: None,
        }
    }

    pub fn failed(task: ConversionTask, attempts_used: u32, error: String) -> Self {
        ConversionResult {
            task,
            outcome: Outcome::Failed,
            attempts_used,
            output_path: None,
            error: Some(error),
        }
    }

    pub fn aborted(task: ConversionTask, reason: String) -> Self {
        ConversionResult {
            task,
            outcome: Outcome::Aborted,
            attempts_used: 0,
            output_path: None,
            error: Some(reason),
        }
    }
}

/// Aggregated counts over a job's results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub aborted: usize,
}

impl JobSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.aborted
    }
}

/// The state of an entire conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    /// Created, not yet started
    Pending,
    /// Currently converting
    Running,
    /// All tasks processed (some may have failed)
    Completed,
    /// Stopped early by a run-fatal engine error
    Aborted,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "Pending"),
            JobState::Running => write!(f, "Running"),
            JobState::Completed => write!(f, "Completed"),
            JobState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Spreadsheet format written by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum TargetFormat {
    /// Office Open XML workbook
    #[default]
    Xlsx,
    /// Office Open XML workbook with macros
    Xlsm,
    /// OpenDocument spreadsheet
    Ods,
}

impl TargetFormat {
    /// Extension of files written in this format, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::Xlsx => "xlsx",
            TargetFormat::Xlsm => "xlsm",
            TargetFormat::Ods => "ods",
        }
    }

    /// Export filter understood by the office engine.
    pub fn filter(&self) -> &'static str {
        match self {
            TargetFormat::Xlsx => "xlsx:Calc MS Excel 2007 XML",
            TargetFormat::Xlsm => "xlsm:Calc MS Excel 2007 VBA XML",
            TargetFormat::Ods => "ods:calc8",
        }
    }

    /// Parse a format name such as `xlsx` or `.ODS`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "xlsx" => Some(TargetFormat::Xlsx),
            "xlsm" => Some(TargetFormat::Xlsm),
            "ods" => Some(TargetFormat::Ods),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Settings for one run. Read-only after construction and passed explicitly
/// to every component.
#[derive(Debug, Clone)]
pub struct RunSession {
    /// Replace existing outputs and delete sources after a successful conversion
    pub overwrite: bool,

    pub verbose: bool,

    /// Whether the info and error log files are written
    pub log_enabled: bool,

    /// When the run started; also the reaper's cut-off for stray processes
    pub start_timestamp: DateTime<Local>,

    pub target_format: TargetFormat,
}

impl RunSession {
    pub fn new(overwrite: bool, verbose: bool, log_enabled: bool, target_format: TargetFormat) -> Self {
        RunSession {
            overwrite,
            verbose,
            log_enabled,
            start_timestamp: Local::now(),
            target_format,
        }
    }

    /// `overwrite` also means "replace in place": the source goes away once
    /// its output is saved.
    pub fn deletes_source(&self) -> bool {
        self.overwrite
    }
}
