//! Palimpsest - Recognition Orchestration Library
//!
//! Palimpsest manages the part of an OCR system that is not the recognition
//! algorithm: the lifecycle of an expensive, language-specific engine
//! instance, bounded-and-classified retries around each recognition attempt,
//! and wave-scheduled batch execution with cancellation and progress
//! reporting. The engine itself is a collaborator supplied by the host
//! through the [`EngineFactory`] trait.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use palimpsest::{Orchestrator, OrchestratorConfig, RecognitionTask};
//! # use async_trait::async_trait;
//! # struct MyFactory;
//! # #[async_trait]
//! # impl palimpsest::EngineFactory for MyFactory {
//! #     async fn build(&self, _params: &palimpsest::EngineParams)
//! #         -> palimpsest::Result<Box<dyn palimpsest::RecognitionEngine>> { unimplemented!() }
//! # }
//!
//! # async fn example() -> palimpsest::Result<()> {
//! let orchestrator = Orchestrator::new(Arc::new(MyFactory), OrchestratorConfig::default())?;
//!
//! let image = std::fs::read("receipt.png")?;
//! let result = orchestrator
//!     .recognize(RecognitionTask::new(image, "receipt.png").with_language("ch_sim+en"))
//!     .await?;
//! println!("{} ({:.0}%)", result.text, result.confidence * 100.0);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Engine pool** (`engine`): owns zero-or-one live engine, serializes
//!   construction, swaps on language change, reaps idle instances
//! - **Pipeline** (`core::pipeline`): one attempt (validate, stage to
//!   scratch, invoke under a deadline, post-process, release scratch)
//! - **Retry controller** (`core::retry`): failure classification, backoff,
//!   reset-on-resource-exhaustion
//! - **Batch scheduler** (`core::scheduler`): concurrency-limited waves with
//!   pacing, cancellation, and per-task outcomes
//!
//! The engine handle is a single exclusively-owned resource: recognition
//! calls are serialized even when the batch width is greater than one, so
//! extra width overlaps staging and bookkeeping, not engine work. This
//! trades parallelism for stability: engine construction is memory-heavy
//! and the design keeps exactly one instance alive.

#![deny(unsafe_code)]

pub mod core;
pub mod engine;
pub mod error;
pub mod staging;
pub mod text;
pub mod types;
pub mod validation;

pub use error::{ErrorClass, PalimpsestError, Result};
pub use types::{
    BatchItemOutcome, BatchItemStatus, BatchSummary, CancellationFlag, ProgressEvent, RecognitionResult,
    RecognitionTask, TaskStatus,
};

pub use crate::core::config::OrchestratorConfig;
pub use crate::core::events::ProgressBus;
pub use crate::core::orchestrator::Orchestrator;

pub use engine::{
    ConfidenceScale, EngineFactory, EngineHandle, EngineOutput, EngineParams, EnginePool, RecognitionEngine,
    ScriptClass, script_class,
};

pub use staging::TempStorage;
pub use text::{CleaningPolicy, clean_text};
pub use validation::{DEFAULT_MAX_PAYLOAD_BYTES, validate_task};
