//! Job orchestration module.
//!
//! This module provides the main job lifecycle functions:
//! - Creating a job from source/target paths and the allowed formats
//! - Planning a job (walking the source tree into tasks)
//! - Running a job (converting every task through one engine instance)
//! - Running a whole batch, including stray-process cleanup at teardown

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::Local;
use uuid::Uuid;

use crate::conversion::{ConversionEngine, DocumentHandle, EngineSession};
use crate::error::{ConversionError, EngineError};
use crate::fs_ops::{self, DirectoryTracker, OutputRegistry};
use crate::logging::RunLog;
use crate::model::{ConversionJob, ConversionResult, ConversionTask, JobState, RunSession, TargetFormat};
use crate::progress::ProgressCallback;
use crate::reaper::{self, ProcessTable};
use crate::retry::{self, ExhaustionPolicy, RetryError, RetryPolicy};
use crate::walk;

/// Everything a run reads besides the job itself. Built once per run and
/// passed down explicitly.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub session: &'a RunSession,
    pub policy: &'a RetryPolicy,
    pub log: &'a RunLog,
    pub progress: Option<&'a dyn ProgressCallback>,
}

/// Create a new conversion job.
///
/// Validates that the source path exists and is a directory, that at least
/// one source format is allowed, and that the target root is writable
/// (creating it if needed).
///
/// # Errors
/// Returns the configuration error that makes the run impossible.
pub fn create_job<P: AsRef<Path>>(
    source: P,
    target: P,
    allowed_extensions: &[String],
    target_format: TargetFormat,
) -> Result<ConversionJob, EngineError> {
    let source = source.as_ref();
    let target = target.as_ref();

    match fs::metadata(source) {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(EngineError::InvalidPath {
                    path: source.to_path_buf(),
                    reason: "Source must be a directory".to_string(),
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(EngineError::SourceNotFound {
                path: source.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(EngineError::SourceAccessDenied {
                path: source.to_path_buf(),
                source: e,
            });
        }
    }

    if target.as_os_str().is_empty() {
        return Err(EngineError::InvalidPath {
            path: target.to_path_buf(),
            reason: "Target path is empty".to_string(),
        });
    }

    let allowed_extensions = walk::normalize_extensions(allowed_extensions);
    if allowed_extensions.is_empty() {
        return Err(EngineError::NoAllowedFormats);
    }

    fs_ops::check_writable(target)?;

    Ok(ConversionJob {
        id: Uuid::new_v4(),
        source_root: source.to_path_buf(),
        target_root: target.to_path_buf(),
        allowed_extensions,
        target_format,
        tasks: Vec::new(),
        results: Vec::new(),
        state: JobState::Pending,
        current_task_index: None,
        created_at: Local::now(),
        start_time: None,
        end_time: None,
    })
}

/// Plan a job by walking the source tree into `job.tasks`.
///
/// Unreadable subdirectories are logged and skipped.
///
/// # Errors
/// Returns EngineError if the source root itself cannot be read.
pub fn plan_job(job: &mut ConversionJob, log: &RunLog) -> Result<(), EngineError> {
    if job.state != JobState::Pending {
        return Err(EngineError::InvalidState {
            state: job.state.to_string(),
            expected: JobState::Pending.to_string(),
        });
    }

    job.tasks.clear();
    let walker = walk::walk_tasks(
        &job.source_root,
        &job.target_root,
        &job.allowed_extensions,
        job.target_format,
    );
    for item in walker {
        match item {
            Ok(task) => job.tasks.push(task),
            Err(EngineError::EnumerationFailed { path, source }) if path != job.source_root => {
                let err = EngineError::EnumerationFailed { path, source };
                log.error("Skipping unreadable part of the source tree", &err);
            }
            Err(e) => return Err(e),
        }
    }

    log::debug!("Planned {} task(s) under {}", job.tasks.len(), job.source_root.display());
    Ok(())
}

/// Run a planned job, converting every task with `engine`.
///
/// The engine is owned for the whole run and released on every exit path.
/// A failing file is recorded and the run moves on. When the engine stays
/// locked through the whole retry budget and the policy says
/// `ExhaustionPolicy::AbortRun`, the remaining tasks are recorded as Aborted
/// and the lock error is returned.
///
/// # Errors
/// `EngineError::InvalidState` if the job is not Pending,
/// `EngineError::EngineLocked` if the run was aborted.
pub fn run_job(
    job: &mut ConversionJob,
    engine: Box<dyn ConversionEngine>,
    ctx: RunContext<'_>,
) -> Result<(), EngineError> {
    if job.state != JobState::Pending {
        return Err(EngineError::InvalidState {
            state: job.state.to_string(),
            expected: JobState::Pending.to_string(),
        });
    }

    let mut session = EngineSession::new(engine);
    job.state = JobState::Running;
    job.start_time = Some(Local::now());
    job.results.clear();

    if let Some(callback) = ctx.progress {
        callback.on_job_started(job);
    }
    ctx.log.info(&format!(
        "Converting {} file(s) from {} to {} as {}",
        job.tasks.len(),
        job.source_root.display(),
        job.target_root.display(),
        job.target_format
    ));

    let mut dirs = DirectoryTracker::new();
    let mut registry = OutputRegistry::new();
    let mut fatal: Option<EngineError> = None;

    for task_index in 0..job.tasks.len() {
        let task = job.tasks[task_index].clone();

        let abort_reason = fatal.as_ref().map(|err| format!("Run aborted: {}", err));
        let result = if let Some(reason) = abort_reason {
            ctx.log.info(&format!("Not attempted: {}", task.source_path.display()));
            ConversionResult::aborted(task, reason)
        } else {
            job.current_task_index = Some(task_index);
            if let Some(callback) = ctx.progress {
                callback.on_task_started(job, task_index, &task);
            }
            match convert_task(&task, &mut session, &mut dirs, &mut registry, ctx) {
                TaskOutcome::Done(result) => result,
                TaskOutcome::Abort(result, err) => {
                    ctx.log.error("Aborting run: the conversion engine appears to be stuck", &err);
                    fatal = Some(err);
                    result
                }
            }
        };

        job.results.push(result);
        if let Some(callback) = ctx.progress {
            callback.on_task_completed(job, task_index, &job.results[task_index]);
        }
    }

    if let Err(e) = session.release() {
        ctx.log.error("Releasing the conversion engine", &e);
    }

    job.state = if fatal.is_some() { JobState::Aborted } else { JobState::Completed };
    job.end_time = Some(Local::now());
    job.current_task_index = None;

    let summary = job.summary();
    ctx.log.info(&format!(
        "Run {}: {} converted, {} failed, {} aborted",
        job.state, summary.succeeded, summary.failed, summary.aborted
    ));
    if let Some(callback) = ctx.progress {
        callback.on_job_completed(job);
    }

    match fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Run a planned job and then terminate engine processes that were started
/// during the run and are still alive. The cleanup happens whether or not
/// the run succeeded; its count is returned with a successful run.
pub fn run_batch(
    job: &mut ConversionJob,
    engine: Box<dyn ConversionEngine>,
    ctx: RunContext<'_>,
    processes: Option<&mut dyn ProcessTable>,
) -> Result<usize, EngineError> {
    let process_names = engine.process_names();
    let result = run_job(job, engine, ctx);

    let reaped = match processes {
        Some(table) => reaper::reap_stray_processes(table, &process_names, ctx.session.start_timestamp, ctx.log),
        None => 0,
    };
    result.map(|()| reaped)
}

enum TaskOutcome {
    Done(ConversionResult),
    /// The task failed in a way that stops the whole run
    Abort(ConversionResult, EngineError),
}

fn convert_task(
    task: &ConversionTask,
    session: &mut EngineSession,
    dirs: &mut DirectoryTracker,
    registry: &mut OutputRegistry,
    ctx: RunContext<'_>,
) -> TaskOutcome {
    let source = task.source_path.as_path();
    let overwrite = ctx.session.overwrite;

    if overwrite && task.output_path == task.source_path {
        let message = format!("Output would replace its own source: {}", source.display());
        ctx.log.warn(&message);
        return TaskOutcome::Done(ConversionResult::failed(task.clone(), 0, message));
    }

    let output = match fs_ops::resolve_output_path(&task.output_path, source, overwrite, registry) {
        Ok(output) => output,
        Err(e) => {
            ctx.log.error(&format!("Preparing output for {}", source.display()), &e);
            return TaskOutcome::Done(ConversionResult::failed(task.clone(), 0, e.to_string()));
        }
    };
    if output != task.output_path {
        log::debug!("{} exists, writing {} instead", task.output_path.display(), output.display());
    }

    if let Err(e) = dirs.ensure_parent(&output) {
        ctx.log.error(&format!("Preparing output for {}", source.display()), &e);
        return TaskOutcome::Done(ConversionResult::failed(task.clone(), 0, e.to_string()));
    }

    let opened = retry::execute(
        ctx.policy,
        &format!("Opening {}", source.display()),
        || session.open(source),
        |attempt, delay, err| notify_wait(ctx, task, attempt, delay, err),
    );
    let (mut document, open_attempts) = match opened {
        Ok(attempted) => (attempted.value, attempted.attempts),
        Err(e) => return retry_failure(task, e, 0, ctx),
    };

    let saved = retry::execute(
        ctx.policy,
        &format!("Saving {}", output.display()),
        || document.save_as(&output, ctx.session.target_format),
        |attempt, delay, err| notify_wait(ctx, task, attempt, delay, err),
    );
    close_document(&mut document, ctx);

    let save_attempts = match saved {
        Ok(attempted) => attempted.attempts,
        Err(e) => {
            remove_partial_output(&output);
            return retry_failure(task, e, open_attempts, ctx);
        }
    };

    if ctx.session.deletes_source() {
        match fs::remove_file(source) {
            Ok(()) => log::debug!("Removed source {}", source.display()),
            Err(e) => ctx.log.error(&format!("Removing converted source {}", source.display()), &e),
        }
    }

    ctx.log.info(&format!("Converted {} -> {}", source.display(), output.display()));
    TaskOutcome::Done(ConversionResult::success(
        task.clone(),
        output,
        open_attempts.max(save_attempts),
    ))
}

fn retry_failure(
    task: &ConversionTask,
    err: RetryError,
    earlier_attempts: u32,
    ctx: RunContext<'_>,
) -> TaskOutcome {
    let attempts = earlier_attempts.max(err.attempts());
    let message = err.to_string();

    if err.is_exhausted() && ctx.policy.on_exhausted() == ExhaustionPolicy::AbortRun {
        let result = ConversionResult::failed(task.clone(), attempts, message);
        let fatal = EngineError::EngineLocked {
            path: task.source_path.clone(),
            attempts: err.attempts(),
            source: err.into_source(),
        };
        return TaskOutcome::Abort(result, fatal);
    }

    ctx.log.error(&format!("Converting {}", task.source_path.display()), &err);
    TaskOutcome::Done(ConversionResult::failed(task.clone(), attempts, message))
}

fn notify_wait(ctx: RunContext<'_>, task: &ConversionTask, attempt: u32, delay: Duration, err: &ConversionError) {
    ctx.log.warn(&format!(
        "{} (attempt {}/{}), retrying in {}s: {}",
        task.source_path.display(),
        attempt,
        ctx.policy.max_attempts(),
        delay.as_secs_f32(),
        err
    ));
    if let Some(callback) = ctx.progress {
        callback.on_retry_wait(task, attempt, delay);
    }
}

fn close_document(document: &mut DocumentHandle, ctx: RunContext<'_>) {
    if let Err(e) = document.close() {
        ctx.log.error(&format!("Closing {}", document.source_path().display()), &e);
    }
}

fn remove_partial_output(output: &Path) {
    if output.exists() {
        if let Err(e) = fs::remove_file(output) {
            log::warn!("Could not remove partial output {}: {}", output.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Outcome;
    use crate::testing::{EngineEvents, ScriptedEngine};
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn xls() -> Vec<String> {
        vec![".xls".to_string()]
    }

    fn source_tree(files: &[(&str, &[u8])]) -> (tempfile::TempDir, PathBuf, PathBuf) {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");
        for (name, data) in files {
            let path = src.join(name);
            fs::create_dir_all(path.parent().unwrap()).expect("Failed to create parent");
            fs::write(&path, data).expect("Failed to write source file");
        }
        let dst = temp_dir.path().join("dst");
        (temp_dir, src, dst)
    }

    fn planned_job(src: &Path, dst: &Path) -> ConversionJob {
        let mut job = create_job(src, dst, &xls(), TargetFormat::Xlsx).expect("Failed to create job");
        plan_job(&mut job, &RunLog::console()).expect("Failed to plan job");
        job
    }

    fn run_with(
        job: &mut ConversionJob,
        engine: ScriptedEngine,
        overwrite: bool,
        policy: &RetryPolicy,
    ) -> Result<(), EngineError> {
        let session = RunSession::new(overwrite, false, false, TargetFormat::Xlsx);
        let log = RunLog::console();
        let ctx = RunContext { session: &session, policy, log: &log, progress: None };
        run_job(job, Box::new(engine), ctx)
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    fn outcomes(job: &ConversionJob) -> Vec<Outcome> {
        job.results.iter().map(|r| r.outcome).collect()
    }

    #[test]
    fn test_create_job_with_valid_source() {
        let (_tmp, src, dst) = source_tree(&[]);
        let job = create_job(&src, &dst, &xls(), TargetFormat::Xlsx).expect("Failed to create job");

        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.allowed_extensions, vec!["xls"]);
        assert!(job.tasks.is_empty());
        assert!(dst.is_dir(), "Target root should be created by the write check");
    }

    #[test]
    fn test_create_job_with_missing_source() {
        let (_tmp, src, dst) = source_tree(&[]);
        let result = create_job(&src.join("nonexistent"), &dst, &xls(), TargetFormat::Xlsx);
        assert!(matches!(result, Err(EngineError::SourceNotFound { .. })));
    }

    #[test]
    fn test_create_job_with_file_as_source() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"data")]);
        let result = create_job(&src.join("a.xls"), &dst, &xls(), TargetFormat::Xlsx);
        assert!(matches!(result, Err(EngineError::InvalidPath { .. })));
    }

    #[test]
    fn test_create_job_without_formats() {
        let (_tmp, src, dst) = source_tree(&[]);
        let result = create_job(&src, &dst, &[" ".to_string()], TargetFormat::Xlsx);
        assert!(matches!(result, Err(EngineError::NoAllowedFormats)));
    }

    #[test]
    fn test_create_job_with_unwritable_target() {
        let (_tmp, src, _dst) = source_tree(&[("blocker", b"file")]);
        // A regular file where the target directory should go.
        let result = create_job(&src, &src.join("blocker").join("out"), &xls(), TargetFormat::Xlsx);
        assert!(matches!(result, Err(EngineError::TargetNotWritable { .. })));
    }

    #[test]
    fn test_plan_job_requires_pending_state() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"data")]);
        let mut job = planned_job(&src, &dst);
        run_with(&mut job, ScriptedEngine::new(EngineEvents::default()), false, &quick_policy(1))
            .expect("Run should succeed");

        assert!(matches!(plan_job(&mut job, &RunLog::console()), Err(EngineError::InvalidState { .. })));
    }

    #[test]
    fn test_lock_marker_scenario() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"data"), ("~$a.xls", b"lock")]);
        let mut job = planned_job(&src, &dst);
        let events = EngineEvents::default();

        run_with(&mut job, ScriptedEngine::new(events.clone()), false, &quick_policy(3))
            .expect("Run should succeed");

        assert_eq!(job.tasks.len(), 1);
        assert_eq!(outcomes(&job), vec![Outcome::Success]);
        assert_eq!(fs::read(dst.join("a.xlsx")).expect("Missing output"), b"xlsx:data");
        assert!(!events.all().iter().any(|e| e.contains("~$")));
        assert!(src.join("a.xls").exists(), "Source must be kept without overwrite");
    }

    #[test]
    fn test_every_eligible_file_yields_one_result() {
        let (_tmp, src, dst) = source_tree(&[
            ("a.xls", b"1"),
            ("B.XLS", b"2"),
            ("notes.txt", b"3"),
            ("deep/er/c.xls", b"4"),
            ("deep/~$c.xls", b"5"),
        ]);
        let mut job = planned_job(&src, &dst);

        run_with(&mut job, ScriptedEngine::new(EngineEvents::default()), false, &quick_policy(3))
            .expect("Run should succeed");

        assert_eq!(job.results.len(), 3);
        let sources: HashSet<_> = job.results.iter().map(|r| r.task.source_path.clone()).collect();
        assert_eq!(sources.len(), 3);
        assert!(dst.join("deep").join("er").join("c.xlsx").exists());
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    fn test_target_directories_are_created_lazily() {
        let (_tmp, src, dst) = source_tree(&[("data/x.xls", b"x"), ("docs/readme.txt", b"r")]);
        fs::create_dir_all(src.join("empty")).expect("Failed to create empty dir");
        let mut job = planned_job(&src, &dst);

        run_with(&mut job, ScriptedEngine::new(EngineEvents::default()), false, &quick_policy(1))
            .expect("Run should succeed");

        assert!(dst.join("data").is_dir());
        assert!(!dst.join("docs").exists());
        assert!(!dst.join("empty").exists());
    }

    #[test]
    fn test_conflict_scenario_keeps_existing_output() {
        let (_tmp, src, dst) = source_tree(&[("report.xls", b"new")]);
        fs::create_dir_all(&dst).expect("Failed to create dst");
        fs::write(dst.join("report.xlsx"), b"existing").expect("Failed to write existing output");
        let mut job = planned_job(&src, &dst);

        run_with(&mut job, ScriptedEngine::new(EngineEvents::default()), false, &quick_policy(1))
            .expect("Run should succeed");

        let output = job.results[0].output_path.clone().expect("Expected an output path");
        let name = output.file_name().unwrap().to_string_lossy().to_string();
        assert_ne!(output, dst.join("report.xlsx"));
        assert!(name.starts_with("report-") && name.ends_with(".xlsx"), "Unexpected name {}", name);
        assert_eq!(fs::read(dst.join("report.xlsx")).expect("Failed to read"), b"existing");
        assert_eq!(fs::read(&output).expect("Failed to read"), b"xlsx:new");
    }

    #[test]
    fn test_overwrite_runs_are_idempotent_and_move_sources() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"one"), ("sub/b.xls", b"two")]);

        for _ in 0..2 {
            fs::write(src.join("a.xls"), b"one").expect("Failed to restore source");
            fs::write(src.join("sub").join("b.xls"), b"two").expect("Failed to restore source");

            let mut job = planned_job(&src, &dst);
            run_with(&mut job, ScriptedEngine::new(EngineEvents::default()), true, &quick_policy(1))
                .expect("Run should succeed");
            assert_eq!(outcomes(&job), vec![Outcome::Success, Outcome::Success]);
        }

        let top: Vec<_> = fs::read_dir(&dst)
            .expect("Failed to list dst")
            .map(|e| e.expect("Bad entry").file_name().to_string_lossy().to_string())
            .filter(|n| n.ends_with(".xlsx"))
            .collect();
        assert_eq!(top, vec!["a.xlsx"]);
        assert_eq!(fs::read_dir(dst.join("sub")).expect("Failed to list sub").count(), 1);
        assert!(!src.join("a.xls").exists(), "Overwrite also deletes the source");
    }

    #[test]
    fn test_overwrite_runs_with_shared_stem_are_idempotent() {
        let (_tmp, src, dst) = source_tree(&[]);
        let allowed = vec!["xls".to_string(), "xlsb".to_string()];

        for _ in 0..3 {
            fs::write(src.join("a.xls"), b"one").expect("Failed to restore source");
            fs::write(src.join("a.xlsb"), b"two").expect("Failed to restore source");

            let mut job = create_job(&src, &dst, &allowed, TargetFormat::Xlsx).expect("Failed to create job");
            plan_job(&mut job, &RunLog::console()).expect("Failed to plan job");
            run_with(&mut job, ScriptedEngine::new(EngineEvents::default()), true, &quick_policy(1))
                .expect("Run should succeed");
            assert_eq!(outcomes(&job), vec![Outcome::Success, Outcome::Success]);
        }

        let mut outputs: Vec<_> = fs::read_dir(&dst)
            .expect("Failed to list dst")
            .map(|e| e.expect("Bad entry").file_name().to_string_lossy().to_string())
            .collect();
        outputs.sort();
        assert_eq!(outputs, vec!["a-xlsb.xlsx", "a.xlsx"]);
        assert_eq!(fs::read(dst.join("a-xlsb.xlsx")).expect("Failed to read"), b"xlsx:two");
    }

    #[test]
    fn test_overwrite_refuses_to_replace_source_in_place() {
        let (_tmp, src, _dst) = source_tree(&[("book.xlsx", b"original")]);
        let mut job = create_job(&src, &src, &["xlsx".to_string()], TargetFormat::Xlsx)
            .expect("Failed to create job");
        plan_job(&mut job, &RunLog::console()).expect("Failed to plan job");
        let events = EngineEvents::default();

        run_with(&mut job, ScriptedEngine::new(events.clone()), true, &quick_policy(1))
            .expect("Run should complete");

        assert_eq!(outcomes(&job), vec![Outcome::Failed]);
        assert_eq!(fs::read(src.join("book.xlsx")).expect("Source lost"), b"original");
        assert_eq!(events.count("open"), 0);
    }

    #[test]
    fn test_retry_success_reports_attempts_used() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"data"), ("b.xls", b"data")]);
        let mut job = planned_job(&src, &dst);
        let engine = ScriptedEngine::new(EngineEvents::default())
            .lock_open("a.xls", 2)
            .lock_save("b.xls", 3);

        run_with(&mut job, engine, false, &quick_policy(5)).expect("Run should succeed");

        assert_eq!(outcomes(&job), vec![Outcome::Success, Outcome::Success]);
        assert_eq!(job.results[0].attempts_used, 3);
        assert_eq!(job.results[1].attempts_used, 4);
    }

    #[test]
    fn test_lock_exhaustion_aborts_run() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"1"), ("b.xls", b"2"), ("c.xls", b"3"), ("d.xls", b"4")]);
        let mut job = planned_job(&src, &dst);
        let events = EngineEvents::default();
        let engine = ScriptedEngine::new(events.clone()).lock_open("b.xls", u32::MAX);

        let result = run_with(&mut job, engine, false, &quick_policy(3));

        match result {
            Err(EngineError::EngineLocked { attempts, path, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(path, src.join("b.xls"));
            }
            other => panic!("Expected EngineLocked, got {:?}", other),
        }
        assert_eq!(job.state, JobState::Aborted);
        assert_eq!(
            outcomes(&job),
            vec![Outcome::Success, Outcome::Failed, Outcome::Aborted, Outcome::Aborted]
        );
        assert_eq!(job.results[1].attempts_used, 3);
        assert_eq!(job.results[2].attempts_used, 0);
        assert_eq!(events.count("open:b.xls"), 3);
        assert_eq!(events.count("open:c.xls"), 0);
        assert_eq!(events.count("quit"), 1, "Engine must be released after an abort");
        assert!(!dst.join("c.xlsx").exists());
    }

    #[test]
    fn test_untried_files_are_listed_in_info_log() {
        let (tmp, src, dst) = source_tree(&[("a.xls", b"1"), ("b.xls", b"2"), ("c.xls", b"3")]);
        let mut job = planned_job(&src, &dst);
        let engine = ScriptedEngine::new(EngineEvents::default()).lock_open("a.xls", u32::MAX);
        let session = RunSession::new(false, false, true, TargetFormat::Xlsx);
        let policy = quick_policy(1);
        let log = RunLog::with_files(tmp.path());
        let ctx = RunContext { session: &session, policy: &policy, log: &log, progress: None };

        let _ = run_job(&mut job, Box::new(engine), ctx);

        let info = fs::read_to_string(tmp.path().join(crate::logging::INFO_LOG_NAME))
            .expect("Failed to read info log");
        assert!(info.contains(&format!("Not attempted: {}", src.join("b.xls").display())));
        assert!(info.contains(&format!("Not attempted: {}", src.join("c.xls").display())));
        assert!(!info.contains(&format!("Not attempted: {}", src.join("a.xls").display())));
    }

    #[test]
    fn test_lock_exhaustion_with_skip_policy_continues() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"1"), ("b.xls", b"2"), ("c.xls", b"3")]);
        let mut job = planned_job(&src, &dst);
        let events = EngineEvents::default();
        let engine = ScriptedEngine::new(events.clone()).lock_save("b.xls", u32::MAX);
        let policy = quick_policy(2).with_exhaustion(ExhaustionPolicy::SkipFile);

        run_with(&mut job, engine, false, &policy).expect("Skip policy should not abort");

        assert_eq!(outcomes(&job), vec![Outcome::Success, Outcome::Failed, Outcome::Success]);
        assert_eq!(events.count("close:b.xls"), 1, "Document must be closed after a failed save");
        assert!(!dst.join("b.xlsx").exists());
    }

    #[test]
    fn test_run_job_continues_on_file_errors() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"1"), ("bad.xls", b"2"), ("c.xls", b"3")]);
        let mut job = planned_job(&src, &dst);
        let events = EngineEvents::default();
        let engine = ScriptedEngine::new(events.clone()).corrupt("bad.xls");

        run_with(&mut job, engine, false, &quick_policy(5)).expect("Per-file errors must not fail the run");

        assert_eq!(outcomes(&job), vec![Outcome::Success, Outcome::Failed, Outcome::Success]);
        assert_eq!(events.count("open:bad.xls"), 1, "Ordinary errors are not retried");
        assert!(job.results[1].error.as_deref().unwrap_or("").contains("corrupt"));
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    fn test_documents_closed_and_engine_released_once() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"1"), ("b.xls", b"2")]);
        let mut job = planned_job(&src, &dst);
        let events = EngineEvents::default();

        run_with(&mut job, ScriptedEngine::new(events.clone()), false, &quick_policy(1))
            .expect("Run should succeed");

        assert_eq!(events.count("open"), 2);
        assert_eq!(events.count("close"), 2);
        assert_eq!(events.count("quit"), 1);
        assert_eq!(events.all().last().map(String::as_str), Some("quit"));
    }

    #[test]
    fn test_engine_quit_failure_is_not_escalated() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"1")]);
        let mut job = planned_job(&src, &dst);
        let engine = ScriptedEngine::new(EngineEvents::default()).fail_quit();

        run_with(&mut job, engine, false, &quick_policy(1)).expect("Quit failure is cleanup only");
        assert_eq!(job.state, JobState::Completed);
    }

    #[test]
    fn test_run_job_requires_pending_state() {
        let (_tmp, src, dst) = source_tree(&[]);
        let mut job = planned_job(&src, &dst);

        run_with(&mut job, ScriptedEngine::new(EngineEvents::default()), false, &quick_policy(1))
            .expect("First run should succeed");
        let result = run_with(&mut job, ScriptedEngine::new(EngineEvents::default()), false, &quick_policy(1));
        assert!(result.is_err(), "Second run should fail");
    }

    // Test helper: Mock progress callback to track invocations
    struct TestProgressCallback {
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl TestProgressCallback {
        fn new() -> Self {
            TestProgressCallback {
                calls: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn get_calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProgressCallback for TestProgressCallback {
        fn on_job_started(&self, _job: &ConversionJob) {
            self.calls.lock().unwrap().push("on_job_started".to_string());
        }

        fn on_task_started(&self, _job: &ConversionJob, task_index: usize, _task: &ConversionTask) {
            self.calls.lock().unwrap().push(format!("on_task_started({})", task_index));
        }

        fn on_retry_wait(&self, _task: &ConversionTask, attempt: u32, _delay: Duration) {
            self.calls.lock().unwrap().push(format!("on_retry_wait({})", attempt));
        }

        fn on_task_completed(&self, _job: &ConversionJob, task_index: usize, result: &ConversionResult) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("on_task_completed({}, {})", task_index, result.outcome));
        }

        fn on_job_completed(&self, _job: &ConversionJob) {
            self.calls.lock().unwrap().push("on_job_completed".to_string());
        }
    }

    #[test]
    fn test_run_job_invokes_callbacks_in_order() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"1"), ("b.xls", b"2"), ("c.xls", b"3")]);
        let mut job = planned_job(&src, &dst);
        let engine = ScriptedEngine::new(EngineEvents::default()).lock_open("b.xls", u32::MAX);
        let session = RunSession::new(false, false, false, TargetFormat::Xlsx);
        let policy = quick_policy(2);
        let log = RunLog::console();
        let progress = TestProgressCallback::new();
        let ctx = RunContext { session: &session, policy: &policy, log: &log, progress: Some(&progress) };

        let _ = run_job(&mut job, Box::new(engine), ctx);

        assert_eq!(
            progress.get_calls(),
            vec![
                "on_job_started",
                "on_task_started(0)",
                "on_task_completed(0, Success)",
                "on_task_started(1)",
                "on_retry_wait(1)",
                "on_task_completed(1, Failed)",
                "on_task_completed(2, Aborted)",
                "on_job_completed",
            ]
        );
    }

    struct FakeProcesses {
        killed: Vec<u32>,
    }

    impl ProcessTable for FakeProcesses {
        fn list(&mut self) -> Vec<reaper::ProcessInfo> {
            let now = Local::now().timestamp() as u64;
            vec![
                reaper::ProcessInfo { pid: 10, name: "fakecalc".to_string(), start_time: now + 60 },
                reaper::ProcessInfo { pid: 11, name: "fakecalc".to_string(), start_time: 1 },
            ]
        }

        fn terminate(&mut self, pid: u32) -> Result<(), String> {
            self.killed.push(pid);
            Ok(())
        }
    }

    #[test]
    fn test_run_batch_reaps_even_after_abort() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"1")]);
        let mut job = planned_job(&src, &dst);
        let engine = ScriptedEngine::new(EngineEvents::default()).lock_open("a.xls", u32::MAX);
        let session = RunSession::new(false, false, false, TargetFormat::Xlsx);
        let policy = quick_policy(1);
        let log = RunLog::console();
        let ctx = RunContext { session: &session, policy: &policy, log: &log, progress: None };
        let mut processes = FakeProcesses { killed: Vec::new() };

        let result = run_batch(&mut job, Box::new(engine), ctx, Some(&mut processes));

        assert!(matches!(result, Err(EngineError::EngineLocked { .. })));
        assert_eq!(processes.killed, vec![10]);
    }

    #[test]
    fn test_run_batch_returns_reaped_count() {
        let (_tmp, src, dst) = source_tree(&[("a.xls", b"1")]);
        let mut job = planned_job(&src, &dst);
        let session = RunSession::new(false, false, false, TargetFormat::Xlsx);
        let policy = quick_policy(1);
        let log = RunLog::console();
        let ctx = RunContext { session: &session, policy: &policy, log: &log, progress: None };
        let mut processes = FakeProcesses { killed: Vec::new() };

        let reaped = run_batch(
            &mut job,
            Box::new(ScriptedEngine::new(EngineEvents::default())),
            ctx,
            Some(&mut processes),
        )
        .expect("Run should succeed");

        assert_eq!(reaped, 1);
    }
}
