//! Collaborator interfaces for the black-box recognition engine.
//!
//! The orchestration layer never looks inside the engine: it builds one via
//! an [`EngineFactory`], points it at a staged image artifact, and consumes
//! the structured [`EngineOutput`]. Implementations bridge to whatever
//! actually performs recognition (a native library, an FFI binding, a
//! sidecar process).

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::profile::EngineParams;
use crate::error::Result;

/// Scale of the confidence values an engine reports.
///
/// Declared explicitly by the adapter so the pipeline never has to guess
/// from magnitudes: an engine already reporting in `[0, 1]` must say so, or
/// its values would be divided by 100 into near-zero noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceScale {
    /// Confidence in `[0, 100]`.
    Percent,
    /// Confidence already in `[0, 1]`.
    Unit,
}

/// Structured result of one engine invocation.
///
/// `confidence` is the mean over all detections on the scale declared by
/// [`RecognitionEngine::confidence_scale`]; it is legitimately `0.0` when the
/// engine detected nothing on an otherwise readable image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOutput {
    pub text: String,
    pub confidence: f64,
    pub words: usize,
    pub lines: usize,
    pub paragraphs: usize,
}

/// A live, language-bound recognition engine instance.
///
/// Implementations are not assumed internally thread-safe; the pool's handle
/// serializes invocations, so `recognize` is never called concurrently on the
/// same instance.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Recognize text in the staged image artifact.
    ///
    /// Returns `Ok(None)` when the engine produced no structured result at
    /// all (as opposed to a structured result with empty text).
    async fn recognize(&self, image: &Path) -> Result<Option<EngineOutput>>;

    /// The scale `EngineOutput::confidence` is reported on.
    fn confidence_scale(&self) -> ConfidenceScale {
        ConfidenceScale::Percent
    }
}

/// Builds engine instances for a language-tuned parameter set.
///
/// Construction is expensive (model loading, device allocation); the pool
/// calls this once per language change and reuses the instance across tasks.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self, params: &EngineParams) -> Result<Box<dyn RecognitionEngine>>;
}
