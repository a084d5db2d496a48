//! Core data types shared across the orchestration layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single recognition job: an opaque image payload plus routing metadata.
///
/// The payload is never decoded by this layer; the file name is used only for
/// extension/format inference, and the options bag is passed to the engine
/// untouched. Tasks are immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionTask {
    pub payload: Vec<u8>,
    pub file_name: String,
    /// Language selector: a single tag or a `+`-joined composite such as
    /// `"ch_sim+en"`. Empty means "use the orchestrator default".
    pub language: String,
    /// Free-form engine passthrough options.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl RecognitionTask {
    pub fn new(payload: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            payload,
            file_name: file_name.into(),
            language: String::new(),
            options: serde_json::Value::Null,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

/// Outcome of a successful recognition attempt.
///
/// Field names (and the seconds-valued `processing_time`) match the shape the
/// recognition engine's hosting service has historically exposed, so a caller
/// can serialize this straight into an API response or report row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Recognized text, already cleaned per the task's language policy.
    pub text: String,
    /// Mean confidence normalized into `[0, 1]`.
    pub confidence: f64,
    pub words: usize,
    pub lines: usize,
    pub paragraphs: usize,
    /// Wall-clock time for the successful attempt.
    #[serde(rename = "processing_time", with = "duration_secs")]
    pub elapsed: Duration,
}

/// Serialize a [`Duration`] as fractional seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

/// Per-task lifecycle status carried on progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Starting,
    Processing,
    Completed,
    Error,
}

/// Progress notification emitted while tasks and batches run.
///
/// Per task the ordering is `Starting` followed by zero or more `Processing`
/// events (one per retried attempt, carrying that attempt's error) and exactly
/// one terminal `Completed`/`Error`. Delivery stops silently once a subscriber
/// drops its receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProgressEvent {
    Task {
        file_name: String,
        /// Coarse completion percentage in `0..=100`.
        progress: u8,
        status: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Batch {
        completed: usize,
        total: usize,
        current_file: String,
        status: TaskStatus,
    },
}

impl ProgressEvent {
    pub fn task(file_name: &str, progress: u8, status: TaskStatus) -> Self {
        Self::Task {
            file_name: file_name.to_string(),
            progress: progress.min(100),
            status,
            error: None,
        }
    }

    pub fn task_error(file_name: &str, progress: u8, status: TaskStatus, error: &str) -> Self {
        Self::Task {
            file_name: file_name.to_string(),
            progress: progress.min(100),
            status,
            error: Some(error.to_string()),
        }
    }
}

/// Resolution of one task within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchItemStatus {
    Succeeded,
    Failed,
    /// The batch was cancelled before this task was dispatched.
    Cancelled,
}

/// Per-task outcome reported by the batch scheduler, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemOutcome {
    pub file_name: String,
    pub status: BatchItemStatus,
    /// Pipeline attempts consumed; zero for cancelled tasks.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RecognitionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItemOutcome {
    pub(crate) fn cancelled(file_name: String) -> Self {
        Self {
            file_name,
            status: BatchItemStatus::Cancelled,
            attempts: 0,
            result: None,
            error: None,
        }
    }
}

/// Aggregate outcome of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub outcomes: Vec<BatchItemOutcome>,
}

/// Cooperative cancellation flag shared across a batch.
///
/// Checked at wave boundaries and before each task dispatch; it never aborts
/// work that is already in flight.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
