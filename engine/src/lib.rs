//! # sheetconv engine - Batch spreadsheet conversion library
//!
//! A headless engine that walks a directory tree of legacy spreadsheets and
//! re-saves each one in a modern format through an external conversion
//! engine (LibreOffice by default). Built as the library behind the
//! `sheetconv` CLI.
//!
//! ## Overview
//!
//! The engine features:
//! - Lazy recursive enumeration with a case-insensitive format filter
//! - Mirrored output paths, target directories created on demand
//! - Name conflict resolution or overwrite-and-move semantics
//! - Bounded retry of the engine's transient "locked" error
//! - Per-file results; one bad file never stops the batch
//! - Cleanup of engine processes left behind by the run
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use sheetconv_engine::{
//!     create_job, plan_job, run_job, OfficeEngine, RetryPolicy, RunContext, RunLog, RunSession,
//!     TargetFormat,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut job = create_job("/data/legacy", "/data/converted", &[".xls".to_string()], TargetFormat::Xlsx)?;
//! plan_job(&mut job, &RunLog::console())?;
//! println!("Will convert {} files", job.tasks.len());
//!
//! let session = RunSession::new(false, false, false, TargetFormat::Xlsx);
//! let policy = RetryPolicy::new(5, Duration::from_secs(5));
//! let log = RunLog::console();
//! let ctx = RunContext { session: &session, policy: &policy, log: &log, progress: None };
//! run_job(&mut job, Box::new(OfficeEngine::detect("soffice")?), ctx)?;
//!
//! for result in &job.results {
//!     println!("{}: {}", result.task.source_path.display(), result.outcome);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (ConversionJob, ConversionTask, RunSession)
//! - **error**: Run-level and engine-level error types
//! - **conversion**: Engine traits and scoped engine/document handles
//! - **office**: LibreOffice implementation of the engine traits
//! - **retry**: Retry policy and executor for engine calls
//! - **walk**: Source tree enumeration
//! - **fs_ops**: Output path resolution and target directory handling
//! - **job**: Job orchestration (create, plan, run)
//! - **reaper**: Stray engine process cleanup
//! - **logging**: Info and error log files
//! - **progress**: Progress callback trait
//! - **report**: JSON run report

pub mod model;
pub mod error;
pub mod conversion;
pub mod office;
pub mod retry;
pub mod walk;
pub mod fs_ops;
pub mod job;
pub mod reaper;
pub mod logging;
pub mod progress;
pub mod report;

#[cfg(test)]
mod testing;

// Re-export main types and functions
pub use model::{
    ConversionJob, ConversionResult, ConversionTask, JobState, JobSummary, Outcome, RunSession, TargetFormat,
};
pub use error::{ConversionError, EngineError};
pub use conversion::{ConversionEngine, Document};
pub use office::OfficeEngine;
pub use retry::{ExhaustionPolicy, RetryPolicy};
pub use job::{create_job, plan_job, run_batch, run_job, RunContext};
pub use reaper::{ProcessTable, SystemProcessTable};
pub use logging::RunLog;
pub use progress::ProgressCallback;
pub use report::write_report;
