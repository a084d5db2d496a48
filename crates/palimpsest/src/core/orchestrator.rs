//! The crate's entry point: wires the engine pool, scratch storage, retry
//! controller, and batch scheduler together behind one facade.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::config::OrchestratorConfig;
use crate::core::events::ProgressBus;
use crate::core::pipeline::Pipeline;
use crate::core::retry::RetryController;
use crate::core::scheduler::BatchScheduler;
use crate::engine::pool::EnginePool;
use crate::engine::traits::EngineFactory;
use crate::error::Result;
use crate::staging::TempStorage;
use crate::types::{BatchSummary, CancellationFlag, ProgressEvent, RecognitionResult, RecognitionTask};

/// Recognition orchestrator: single-task and batch entry points over one
/// managed engine instance.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Must be created
/// within a Tokio runtime (the engine pool starts its idle reaper
/// immediately).
pub struct Orchestrator {
    pool: Arc<EnginePool>,
    storage: Arc<TempStorage>,
    config: Arc<OrchestratorConfig>,
    retry: Arc<RetryController>,
    events: ProgressBus,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Wire an orchestrator around an engine factory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PalimpsestError::InvalidConfiguration`] when the
    /// configuration fails validation.
    pub fn new(factory: Arc<dyn EngineFactory>, config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let storage = Arc::new(TempStorage::new(config.scratch_dir.clone()));
        let pool = EnginePool::new(factory, &config);
        let events = ProgressBus::new();
        let pipeline = Pipeline::new(Arc::clone(&pool), Arc::clone(&storage), Arc::clone(&config));
        let retry = Arc::new(RetryController::new(
            pipeline,
            Arc::clone(&pool),
            events.clone(),
            config.max_attempts,
        ));

        Ok(Self {
            pool,
            storage,
            config,
            retry,
            events,
        })
    }

    /// Subscribe to task and batch progress events.
    ///
    /// Events emitted before the subscription are not replayed, and delivery
    /// stops once the receiver is dropped.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Recognize a single image, with retries.
    pub async fn recognize(&self, task: RecognitionTask) -> Result<RecognitionResult> {
        let task = self.apply_default_language(task);
        self.retry.run(&task).await
    }

    /// Run a batch of tasks in concurrency-limited waves.
    ///
    /// Per-task failures land in the summary; the batch itself only errors on
    /// caller bugs such as an empty task list.
    pub async fn recognize_batch(
        &self,
        tasks: Vec<RecognitionTask>,
        cancel: CancellationFlag,
    ) -> Result<BatchSummary> {
        let tasks = tasks
            .into_iter()
            .map(|task| self.apply_default_language(task))
            .collect();
        let scheduler = BatchScheduler::new(
            Arc::clone(&self.retry),
            self.events.clone(),
            self.config.max_concurrency,
        );
        scheduler.run_batch(tasks, cancel).await
    }

    /// Force-tear-down the current engine and sweep the scratch directory.
    ///
    /// Safe to call while a batch is running: in-flight tasks may fail with
    /// an engine error and are retried by their own controller, which
    /// rebuilds the engine on demand.
    pub async fn reset_engine(&self) -> Result<()> {
        self.pool.reset().await;
        self.storage.clear_scratch().await
    }

    /// Stop the background reaper, tear down the engine, and sweep scratch.
    pub async fn shutdown(&self) -> Result<()> {
        self.pool.shutdown().await;
        self.storage.clear_scratch().await
    }

    /// Engines built since this orchestrator was created.
    pub fn engine_constructions(&self) -> usize {
        self.pool.constructions()
    }

    /// Engine handles destroyed since this orchestrator was created.
    pub fn engine_teardowns(&self) -> usize {
        self.pool.teardowns()
    }

    fn apply_default_language(&self, mut task: RecognitionTask) -> RecognitionTask {
        if task.language.trim().is_empty() {
            task.language = self.config.default_language.clone();
        }
        task
    }
}
