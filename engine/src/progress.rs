//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which keeps the
//! orchestrator independent of how status is shown to the user.

use std::time::Duration;

use crate::model::{ConversionJob, ConversionResult, ConversionTask};

/// Trait for receiving progress updates from a conversion job.
///
/// All methods are called synchronously on the conversion thread.
pub trait ProgressCallback: Send {
    /// Called when job execution starts.
    fn on_job_started(&self, job: &ConversionJob);

    /// Called when a task is about to be converted.
    fn on_task_started(&self, job: &ConversionJob, task_index: usize, task: &ConversionTask);

    /// Called before the engine is retried after a locked error.
    fn on_retry_wait(&self, task: &ConversionTask, attempt: u32, delay: Duration);

    /// Called once per task with its final result (including Aborted tasks).
    fn on_task_completed(&self, job: &ConversionJob, task_index: usize, result: &ConversionResult);

    /// Called when job execution ends, whether completed or aborted.
    fn on_job_completed(&self, job: &ConversionJob);
}
