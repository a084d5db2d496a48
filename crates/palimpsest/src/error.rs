//! Error types for palimpsest.
//!
//! All fallible operations in the crate return [`PalimpsestError`] through the
//! [`Result`] alias. The taxonomy mirrors the failure points of the
//! orchestration pipeline:
//!
//! - Input-class errors (`EmptyPayload`, `UnsupportedFormat`, `PayloadTooLarge`)
//!   describe structurally bad tasks and are never worth retrying.
//! - Environment-class errors (`Storage`, `Io`) look transient from the
//!   outside and get a bounded retry budget.
//! - Resource-class errors (`EngineInit`, `EngineInitTimeout`) additionally
//!   force an engine reset before the next attempt.
//! - Transient-class errors (`RecognitionTimeout`, `EmptyEngineResult`) are
//!   plain retries.
//!
//! Retry policy itself lives in `core::retry`; this module only answers the
//! classification question so it is decided in exactly one place.
//!
//! System I/O errors bubble up unchanged via `#[from]`: they indicate real
//! environment problems and must stay inspectable for bug reports.
use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`PalimpsestError`].
pub type Result<T> = std::result::Result<T, PalimpsestError>;

/// Main error type for all orchestration operations.
#[derive(Debug, Error)]
pub enum PalimpsestError {
    #[error("empty image payload")]
    EmptyPayload,

    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("image payload of {size} bytes exceeds the {limit} byte ceiling")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("scratch storage failure: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("engine construction failed for '{language}': {message}")]
    EngineInit {
        language: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("timed out after {0:?} waiting for engine construction")]
    EngineInitTimeout(Duration),

    #[error("recognition exceeded the {0:?} deadline")]
    RecognitionTimeout(Duration),

    #[error("engine returned no structured result")]
    EmptyEngineResult,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recognition failed after {attempts} attempts over {elapsed:?}: {source}")]
    RetryExhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: Box<PalimpsestError>,
    },

    #[error("{0}")]
    Other(String),
}

/// How the retry controller should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Structurally bad input; re-attempting the same task cannot succeed.
    Fatal,
    /// Transient-looking; re-attempting has a reasonable chance of success.
    Retryable,
    /// Unknown cause; retried once, then treated as fatal.
    RetryableOnce,
}

/// Substrings in engine-sourced messages that indicate resource exhaustion.
///
/// Matched case-insensitively against the rendered error. Engines report
/// memory pressure in free text, so inspection is the only signal available.
const RESOURCE_SIGNALS: &[&str] = &["memory", "resource", "busy", "exhaust", "overload", "alloc"];

impl PalimpsestError {
    /// Create a `Storage` error without an underlying cause.
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create a `Storage` error preserving the underlying cause.
    pub fn storage_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an `EngineInit` error preserving the underlying cause.
    pub fn engine_init<S, E>(language: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::EngineInit {
            language: language.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Classify this error for the retry controller.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::EmptyPayload
            | Self::UnsupportedFormat(_)
            | Self::PayloadTooLarge { .. }
            | Self::InvalidConfiguration(_) => ErrorClass::Fatal,
            Self::Storage { .. }
            | Self::EngineInit { .. }
            | Self::EngineInitTimeout(_)
            | Self::RecognitionTimeout(_)
            | Self::EmptyEngineResult
            | Self::Io(_) => ErrorClass::Retryable,
            // An exhausted retry is already a terminal verdict.
            Self::RetryExhausted { .. } => ErrorClass::Fatal,
            Self::Other(_) => ErrorClass::RetryableOnce,
        }
    }

    /// Whether the next attempt should force an engine reset first.
    ///
    /// Engine construction failures are resource-class by definition; for
    /// opaque errors the rendered message is scanned for exhaustion signals.
    pub fn is_resource_related(&self) -> bool {
        match self {
            Self::EngineInit { .. } | Self::EngineInitTimeout(_) => true,
            Self::Other(message) => {
                let lower = message.to_lowercase();
                RESOURCE_SIGNALS.iter().any(|signal| lower.contains(signal))
            }
            _ => false,
        }
    }
}
