//! Bounded retry around engine calls.
//!
//! Every engine call (open, save) goes through `execute`. Errors the policy
//! classifies as retryable (by default: the engine-locked error) are waited
//! out with a linearly growing delay; everything else propagates at once.
//! Running out of attempts yields `RetryError::Exhausted`, which callers
//! treat differently from an ordinary per-file failure.

use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::error::ConversionError;

/// What a run does when the engine stays locked through every attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Treat the engine as wedged: stop the batch and mark untried files Aborted
    #[default]
    AbortRun,
    /// Fail only the current file and carry on with the next one
    SkipFile,
}

impl ExhaustionPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "abort" | "abort-run" => Some(Self::AbortRun),
            "skip" | "skip-file" => Some(Self::SkipFile),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExhaustionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExhaustionPolicy::AbortRun => write!(f, "abort"),
            ExhaustionPolicy::SkipFile => write!(f, "skip"),
        }
    }
}

/// How many times, how long, and for which errors to retry.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    on_exhausted: ExhaustionPolicy,
    retryable: fn(&ConversionError) -> bool,
}

impl RetryPolicy {
    /// Retry only the engine-locked error. `max_attempts` below 1 is raised to 1.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay,
            on_exhausted: ExhaustionPolicy::AbortRun,
            retryable: ConversionError::is_locked,
        }
    }

    pub fn with_exhaustion(mut self, on_exhausted: ExhaustionPolicy) -> Self {
        self.on_exhausted = on_exhausted;
        self
    }

    pub fn with_retryable(mut self, retryable: fn(&ConversionError) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn on_exhausted(&self) -> ExhaustionPolicy {
        self.on_exhausted
    }

    /// Delay after failed attempt number `attempt` (1-based): `attempt * base_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    pub fn is_retryable(&self, err: &ConversionError) -> bool {
        (self.retryable)(err)
    }

    /// Upper bound on time spent sleeping for one call.
    pub fn total_wait(&self) -> Duration {
        (1..self.max_attempts).map(|attempt| self.backoff(attempt)).sum()
    }
}

impl Default for RetryPolicy {
    /// 5 attempts, 5 s base delay (waits of 5, 10, 15 and 20 s), abort on exhaustion.
    fn default() -> Self {
        RetryPolicy::new(5, Duration::from_secs(5))
    }
}

/// Why a retried call ultimately failed.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Retryable error on every allowed attempt
    #[error("{context}: still locked after {attempts} attempts")]
    Exhausted {
        context: String,
        attempts: u32,
        #[source]
        source: ConversionError,
    },

    /// Non-retryable error; propagated without further attempts
    #[error("{context}: {source}")]
    Failed {
        context: String,
        attempts: u32,
        #[source]
        source: ConversionError,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    pub fn into_source(self) -> ConversionError {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Failed { source, .. } => source,
        }
    }
}

/// A value produced by a retried call and the number of tries it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `operation` under `policy`.
///
/// `on_wait` is called before every sleep with the failed attempt number,
/// the delay about to be slept and the error that caused it.
pub fn execute<T, F, W>(
    policy: &RetryPolicy,
    context: &str,
    mut operation: F,
    mut on_wait: W,
) -> Result<Attempted<T>, RetryError>
where
    F: FnMut() -> Result<T, ConversionError>,
    W: FnMut(u32, Duration, &ConversionError),
{
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(Attempted { value, attempts: attempt }),
            Err(e) if !policy.is_retryable(&e) => {
                return Err(RetryError::Failed {
                    context: context.to_string(),
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) if attempt >= policy.max_attempts() => {
                return Err(RetryError::Exhausted {
                    context: context.to_string(),
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                on_wait(attempt, delay, &e);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}
