//! Orchestration core: configuration, the single-attempt pipeline, retry
//! control, wave scheduling, progress fan-out, and the public facade.
//!
//! Layering, bottom up:
//!
//! - `pipeline` drives one attempt (validate, stage, invoke, clean, release)
//! - `retry` wraps the pipeline with classified bounded retries
//! - `scheduler` fans a batch out over the retry controller in waves
//! - `orchestrator` wires everything and is what hosts interact with

pub mod config;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod scheduler;

pub use config::OrchestratorConfig;
pub use events::ProgressBus;
pub use orchestrator::Orchestrator;
pub use pipeline::Pipeline;
pub use retry::RetryController;
pub use scheduler::{BatchScheduler, compute_concurrency, pacing_delay};
