//! Machine-readable run report.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::{ConversionJob, ConversionResult, JobState, JobSummary, TargetFormat};

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    id: Uuid,
    state: JobState,
    source_root: &'a Path,
    target_root: &'a Path,
    target_format: TargetFormat,
    allowed_extensions: &'a [String],
    created_at: DateTime<Local>,
    start_time: Option<DateTime<Local>>,
    end_time: Option<DateTime<Local>>,
    summary: JobSummary,
    results: &'a [ConversionResult],
}

/// Write `job` as pretty-printed JSON to `path`, replacing any earlier report.
pub fn write_report(job: &ConversionJob, path: &Path) -> Result<(), EngineError> {
    let report = RunReport {
        id: job.id,
        state: job.state,
        source_root: &job.source_root,
        target_root: &job.target_root,
        target_format: job.target_format,
        allowed_extensions: &job.allowed_extensions,
        created_at: job.created_at,
        start_time: job.start_time,
        end_time: job.end_time,
        summary: job.summary(),
        results: &job.results,
    };

    let report_failed = |source: std::io::Error| EngineError::ReportFailed {
        path: PathBuf::from(path),
        source,
    };
    let json = serde_json::to_string_pretty(&report).map_err(|e| report_failed(e.into()))?;
    fs::write(path, json).map_err(report_failed)?;
    log::debug!("Report written to {}", path.display());
    Ok(())
}
