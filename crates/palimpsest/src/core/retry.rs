//! Bounded retry around the single-attempt pipeline.
//!
//! All failure classification happens here, in one place, using
//! [`ErrorClass`]: the pipeline and the layers below it never retry on their
//! own. Fatal input errors on the first attempt short-circuit without
//! consuming retry budget; resource-class failures force an engine reset
//! before the next attempt; everything retryable backs off exponentially,
//! capped at five seconds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::events::ProgressBus;
use crate::core::pipeline::Pipeline;
use crate::engine::pool::EnginePool;
use crate::error::{ErrorClass, PalimpsestError, Result};
use crate::types::{ProgressEvent, RecognitionResult, RecognitionTask, TaskStatus};

/// Diagnostics for one failed attempt. Logged, never returned.
#[derive(Debug)]
struct AttemptOutcome {
    attempt: u32,
    class: ErrorClass,
    message: String,
    backoff: Option<Duration>,
    reset: bool,
}

/// Runs tasks through the pipeline with classified, bounded retries.
pub struct RetryController {
    pipeline: Pipeline,
    pool: Arc<EnginePool>,
    events: ProgressBus,
    max_attempts: u32,
}

impl RetryController {
    pub fn new(pipeline: Pipeline, pool: Arc<EnginePool>, events: ProgressBus, max_attempts: u32) -> Self {
        Self {
            pipeline,
            pool,
            events,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run a task to a final verdict.
    ///
    /// # Errors
    ///
    /// Returns the underlying error directly for a first-attempt fatal
    /// failure, otherwise [`PalimpsestError::RetryExhausted`] carrying the
    /// attempt count, total elapsed time, and last cause.
    pub async fn run(&self, task: &RecognitionTask) -> Result<RecognitionResult> {
        self.execute(task).await.1
    }

    /// Like [`run`], additionally reporting how many attempts were consumed.
    ///
    /// [`run`]: Self::run
    pub(crate) async fn execute(&self, task: &RecognitionTask) -> (u32, Result<RecognitionResult>) {
        let started = Instant::now();
        let mut attempts: Vec<AttemptOutcome> = Vec::new();
        let mut last_error: Option<PalimpsestError> = None;

        self.events
            .emit(ProgressEvent::task(&task.file_name, 0, TaskStatus::Starting));

        for attempt in 1..=self.max_attempts {
            match self.pipeline.run_attempt(task).await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(
                            file = %task.file_name,
                            attempt,
                            "recognition succeeded after retries"
                        );
                    }
                    self.events
                        .emit(ProgressEvent::task(&task.file_name, 100, TaskStatus::Completed));
                    return (attempt, Ok(result));
                }
                Err(err) => {
                    let class = err.class();
                    tracing::warn!(
                        file = %task.file_name,
                        attempt,
                        class = ?class,
                        error = %err,
                        "recognition attempt failed"
                    );

                    // Structurally bad input: fail fast, keep the raw error.
                    if class == ErrorClass::Fatal && attempt == 1 {
                        self.events.emit(ProgressEvent::task_error(
                            &task.file_name,
                            100,
                            TaskStatus::Error,
                            &err.to_string(),
                        ));
                        return (attempt, Err(err));
                    }

                    let budget_left = attempt < self.max_attempts
                        && match class {
                            ErrorClass::Fatal => false,
                            ErrorClass::Retryable => true,
                            ErrorClass::RetryableOnce => attempt < 2,
                        };

                    if !budget_left {
                        attempts.push(AttemptOutcome {
                            attempt,
                            class,
                            message: err.to_string(),
                            backoff: None,
                            reset: false,
                        });
                        last_error = Some(err);
                        break;
                    }

                    let reset = err.is_resource_related();
                    if reset {
                        tracing::info!(
                            file = %task.file_name,
                            "resource-class failure, forcing engine reset"
                        );
                        self.pool.reset().await;
                    }

                    let backoff = backoff_delay(attempt);
                    self.events.emit(ProgressEvent::task_error(
                        &task.file_name,
                        retry_progress(attempt),
                        TaskStatus::Processing,
                        &err.to_string(),
                    ));
                    attempts.push(AttemptOutcome {
                        attempt,
                        class,
                        message: err.to_string(),
                        backoff: Some(backoff),
                        reset,
                    });
                    last_error = Some(err);

                    tokio::time::sleep(backoff).await;
                }
            }
        }

        for outcome in &attempts {
            tracing::debug!(
                file = %task.file_name,
                attempt = outcome.attempt,
                class = ?outcome.class,
                backoff = ?outcome.backoff,
                reset = outcome.reset,
                message = %outcome.message,
                "attempt diagnostics"
            );
        }

        let attempt_count = attempts.len() as u32;
        let source = last_error.unwrap_or_else(|| {
            // max_attempts >= 1 guarantees at least one recorded error.
            PalimpsestError::Other("retry loop ended without recording an error".to_string())
        });
        let exhausted = PalimpsestError::RetryExhausted {
            attempts: attempt_count,
            elapsed: started.elapsed(),
            source: Box::new(source),
        };
        self.events.emit(ProgressEvent::task_error(
            &task.file_name,
            100,
            TaskStatus::Error,
            &exhausted.to_string(),
        ));
        (attempt_count, Err(exhausted))
    }
}

/// Exponential backoff: `min(2^attempt * 1000ms, 5000ms)`.
fn backoff_delay(attempt: u32) -> Duration {
    let millis = 1000u64.saturating_mul(1u64 << attempt.min(12)).min(5_000);
    Duration::from_millis(millis)
}

/// Coarse progress for a retried attempt, below the terminal 100.
fn retry_progress(attempt: u32) -> u8 {
    (25 * attempt).min(90) as u8
}
