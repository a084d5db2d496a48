//! Single-attempt recognition pipeline.
//!
//! One attempt is: validate, stage, acquire the engine, invoke under the
//! per-language deadline, post-process, release the scratch artifact. Retry
//! policy lives one layer up in `core::retry`; this module fails fast and
//! reports precisely.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::core::config::OrchestratorConfig;
use crate::engine::pool::EnginePool;
use crate::engine::profile::script_class;
use crate::engine::traits::ConfidenceScale;
use crate::error::{PalimpsestError, Result};
use crate::staging::TempStorage;
use crate::text::clean_text;
use crate::types::{RecognitionResult, RecognitionTask};
use crate::validation::validate_task;

/// Drives one recognition attempt end to end.
#[derive(Clone)]
pub struct Pipeline {
    pool: Arc<EnginePool>,
    storage: Arc<TempStorage>,
    config: Arc<OrchestratorConfig>,
}

impl Pipeline {
    pub fn new(pool: Arc<EnginePool>, storage: Arc<TempStorage>, config: Arc<OrchestratorConfig>) -> Self {
        Self {
            pool,
            storage,
            config,
        }
    }

    /// Run a single attempt. No retries happen here.
    ///
    /// The scratch artifact created for the attempt is released on every
    /// path, success or failure, before this function returns.
    pub async fn run_attempt(&self, task: &RecognitionTask) -> Result<RecognitionResult> {
        let started = Instant::now();

        let extension = validate_task(&task.payload, &task.file_name, self.config.max_payload_bytes)?;
        let artifact = self.storage.stage(&task.payload, &extension).await?;

        let outcome = self.recognize_staged(task, &artifact, started).await;

        if let Err(release_err) = self.storage.release(&artifact).await {
            // The attempt outcome wins; a leaked-release error is only logged.
            tracing::warn!(
                path = %artifact.display(),
                error = %release_err,
                "failed to release scratch artifact"
            );
        }

        outcome
    }

    async fn recognize_staged(
        &self,
        task: &RecognitionTask,
        artifact: &Path,
        started: Instant,
    ) -> Result<RecognitionResult> {
        let handle = self.pool.acquire(&task.language).await?;

        let script = script_class(&task.language);
        let deadline = self.config.recognition_timeout(script);
        tracing::debug!(
            file = %task.file_name,
            language = %task.language,
            deadline_ms = deadline.as_millis() as u64,
            "invoking recognition engine"
        );

        let output = handle
            .invoke(artifact, deadline)
            .await?
            .ok_or(PalimpsestError::EmptyEngineResult)?;

        let confidence = normalize_confidence(output.confidence, handle.confidence_scale());
        let policy = self.config.cleaning_policy(&task.language);
        let text = clean_text(&output.text, policy);

        Ok(RecognitionResult {
            text,
            confidence,
            words: output.words,
            lines: output.lines,
            paragraphs: output.paragraphs,
            elapsed: started.elapsed(),
        })
    }
}

/// Normalize an engine confidence onto `[0, 1]`.
///
/// Out-of-range values are measurement noise from the engine, not
/// information, so they are clamped rather than propagated. Non-finite
/// values collapse to zero.
fn normalize_confidence(raw: f64, scale: ConfidenceScale) -> f64 {
    let unit = match scale {
        ConfidenceScale::Percent => raw / 100.0,
        ConfidenceScale::Unit => raw,
    };
    if unit.is_finite() { unit.clamp(0.0, 1.0) } else { 0.0 }
}
