//! sheetconv - Command-line interface for the spreadsheet conversion engine.
//!
//! Parses arguments, sets up console and file logging, and drives one batch
//! run with per-file status lines on stderr.

use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use sheetconv_engine::{
    fs_ops,
    job::{create_job, plan_job, run_batch, RunContext},
    model::{ConversionJob, ConversionResult, ConversionTask, Outcome, RunSession, TargetFormat},
    office::OfficeEngine,
    progress::ProgressCallback,
    reaper::{ProcessTable, SystemProcessTable},
    report::write_report,
    retry::{ExhaustionPolicy, RetryPolicy},
    walk, RunLog,
};

/// sheetconv - Convert legacy spreadsheets in bulk
#[derive(Parser, Debug)]
#[command(name = "sheetconv")]
#[command(version = "0.1.0")]
#[command(about = "Convert a directory tree of legacy spreadsheets to a modern format")]
struct Args {
    /// Source directory
    #[arg(long, value_name = "PATH")]
    src: PathBuf,

    /// Target directory (mirrors the source tree)
    #[arg(long, value_name = "PATH")]
    dst: PathBuf,

    /// Source formats to convert, separated by ';' (e.g. ".xls;.xlsb")
    #[arg(long, value_name = "LIST", default_value = ".xls")]
    formats: String,

    /// Output format: xlsx, xlsm or ods
    #[arg(long, value_name = "FORMAT", default_value = "xlsx")]
    to: String,

    /// Replace existing outputs and delete each source after it converts
    #[arg(long)]
    overwrite: bool,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    /// Append to the info and error log files
    #[arg(long)]
    log: bool,

    /// Directory for the log files (defaults to the target directory)
    #[arg(long, value_name = "PATH", requires = "log")]
    log_dir: Option<PathBuf>,

    /// Tries per engine call while the engine reports it is locked
    #[arg(long, value_name = "N", default_value_t = 5)]
    max_attempts: u32,

    /// Base retry delay in seconds; the n-th wait is n times this
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    retry_delay: u64,

    /// What to do when retries run out: abort or skip
    #[arg(long, value_name = "POLICY", default_value = "abort")]
    on_lock_exhaustion: String,

    /// LibreOffice program used for conversion
    #[arg(long, value_name = "PROGRAM", default_value = "soffice")]
    soffice: String,

    /// Write a JSON report of every file to this path
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Do not terminate engine processes left running after the batch
    #[arg(long)]
    no_reap: bool,
}

/// CLI implementation of ProgressCallback for displaying conversion progress
struct CliProgress {
    verbose: bool,
    start_time: Instant,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            start_time: Instant::now(),
        }
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn file_name(task: &ConversionTask) -> String {
        task.source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "(unknown)".to_string())
    }
}

impl ProgressCallback for CliProgress {
    fn on_job_started(&self, job: &ConversionJob) {
        eprintln!("Preparing conversion...");
        eprintln!("  Source: {}", job.source_root.display());
        eprintln!("  Target: {}", job.target_root.display());
        eprintln!("  Formats: {} -> {}", job.allowed_extensions.join(", "), job.target_format);
        eprintln!("  Total: {} files", job.tasks.len());
        eprintln!(
            "  Started: {}",
            job.start_time.unwrap_or_else(Local::now).format("%Y-%m-%d %H:%M:%S")
        );
        eprintln!();
    }

    fn on_task_started(&self, job: &ConversionJob, task_index: usize, task: &ConversionTask) {
        if self.verbose {
            eprintln!("[{:3}/{}] Starting: {}", task_index + 1, job.tasks.len(), task.source_path.display());
        }
    }

    fn on_retry_wait(&self, task: &ConversionTask, attempt: u32, delay: Duration) {
        eprintln!(
            "        {} is locked (attempt {}), waiting {}",
            Self::file_name(task),
            attempt,
            Self::format_duration(delay)
        );
    }

    fn on_task_completed(&self, job: &ConversionJob, task_index: usize, result: &ConversionResult) {
        let name = Self::file_name(&result.task);
        match (&result.outcome, &result.output_path) {
            (Outcome::Success, Some(output)) if self.verbose => {
                eprintln!("[{:3}/{}] Success: {} -> {}", task_index + 1, job.tasks.len(), name, output.display());
            }
            (Outcome::Aborted, _) if !self.verbose => {}
            (outcome, _) => {
                eprintln!("[{:3}/{}] {}: {}", task_index + 1, job.tasks.len(), outcome, name);
            }
        }
    }

    fn on_job_completed(&self, job: &ConversionJob) {
        let summary = job.summary();
        eprintln!();
        eprintln!("Conversion {}!", job.state.to_string().to_lowercase());
        eprintln!(
            "Summary: {} converted, {} failed, {} aborted",
            summary.succeeded, summary.failed, summary.aborted
        );
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if summary.failed > 0 {
            eprintln!();
            eprintln!("Failed files:");
            for result in job.results.iter().filter(|r| r.outcome == Outcome::Failed) {
                let message = result.error.as_deref().unwrap_or("(unknown error)");
                eprintln!("  {}: {}", result.task.source_path.display(), message);
            }
        }
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Parse and validate command-line arguments, then run the batch
fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            1
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<(), String> {
    let allowed = walk::parse_extensions(&args.formats);
    if allowed.is_empty() {
        return Err(format!("No usable source formats in '{}'", args.formats));
    }

    let target_format = TargetFormat::from_str(&args.to).ok_or_else(|| {
        format!("Invalid target format '{}'. Must be 'xlsx', 'xlsm', or 'ods'", args.to)
    })?;

    let on_exhausted = ExhaustionPolicy::from_str(&args.on_lock_exhaustion).ok_or_else(|| {
        format!(
            "Invalid lock exhaustion policy '{}'. Must be 'abort' or 'skip'",
            args.on_lock_exhaustion
        )
    })?;

    if args.max_attempts == 0 {
        return Err("--max-attempts must be at least 1".to_string());
    }
    let policy = RetryPolicy::new(args.max_attempts, Duration::from_secs(args.retry_delay))
        .with_exhaustion(on_exhausted);

    // Taken before anything can start an engine process.
    let session = RunSession::new(args.overwrite, args.verbose, args.log, target_format);

    let mut job = create_job(&args.src, &args.dst, &allowed, target_format)
        .map_err(|e| format!("Job creation failed: {}", e))?;

    let log = if args.log {
        let dir = args.log_dir.as_ref().unwrap_or(&args.dst);
        fs_ops::ensure_dir_exists(dir).map_err(|e| format!("Cannot use log directory: {}", e))?;
        RunLog::with_files(dir)
    } else {
        RunLog::console()
    };

    plan_job(&mut job, &log).map_err(|e| format!("Job planning failed: {}", e))?;

    if job.tasks.is_empty() {
        log.info(&format!("No matching files under {}", job.source_root.display()));
        return write_optional_report(args, &job);
    }

    let engine = OfficeEngine::detect(&args.soffice).map_err(|e| e.to_string())?;

    let progress = CliProgress::new(args.verbose);
    let ctx = RunContext {
        session: &session,
        policy: &policy,
        log: &log,
        progress: Some(&progress),
    };

    let mut system_processes = SystemProcessTable::new();
    let processes: Option<&mut dyn ProcessTable> = if args.no_reap {
        None
    } else {
        Some(&mut system_processes as &mut dyn ProcessTable)
    };

    let result = run_batch(&mut job, Box::new(engine), ctx, processes);
    write_optional_report(args, &job)?;

    match result {
        Ok(reaped) => {
            if reaped > 0 {
                eprintln!("Terminated {} leftover engine process(es)", reaped);
            }
            Ok(())
        }
        Err(e) => Err(format!("Run aborted: {}", e)),
    }
}

fn write_optional_report(args: &Args, job: &ConversionJob) -> Result<(), String> {
    match &args.report {
        Some(path) => write_report(job, path).map_err(|e| e.to_string()),
        None => Ok(()),
    }
}
