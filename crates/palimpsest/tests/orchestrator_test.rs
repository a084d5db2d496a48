//! End-to-end tests driving the orchestrator facade with scripted engines.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use palimpsest::{
    BatchItemStatus, CancellationFlag, EngineFactory, EngineOutput, EngineParams, Orchestrator, OrchestratorConfig,
    PalimpsestError, ProgressEvent, RecognitionEngine, RecognitionTask, Result, TaskStatus,
};

/// Engine that stalls past any deadline for a scripted number of invocations,
/// then answers promptly.
struct SlowStartEngine {
    language: String,
    stalls_remaining: Arc<AtomicUsize>,
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl RecognitionEngine for SlowStartEngine {
    async fn recognize(&self, _image: &Path) -> Result<Option<EngineOutput>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self
            .stalls_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(Some(EngineOutput {
            text: format!("text from {}", self.language),
            confidence: 86.0,
            words: 3,
            lines: 1,
            paragraphs: 1,
        }))
    }
}

struct ScriptedFactory {
    invocations: Arc<AtomicUsize>,
    builds: Arc<AtomicUsize>,
    shared_stalls: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    fn new(stalls: usize) -> Self {
        Self {
            invocations: Arc::new(AtomicUsize::new(0)),
            builds: Arc::new(AtomicUsize::new(0)),
            shared_stalls: Arc::new(AtomicUsize::new(stalls)),
        }
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn build(&self, params: &EngineParams) -> Result<Box<dyn RecognitionEngine>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SlowStartEngine {
            language: params.language.clone(),
            stalls_remaining: Arc::clone(&self.shared_stalls),
            invocations: Arc::clone(&self.invocations),
        }))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn config_in(scratch: &tempfile::TempDir) -> OrchestratorConfig {
    OrchestratorConfig {
        scratch_dir: Some(scratch.path().to_path_buf()),
        ..Default::default()
    }
}

fn png_task(name: &str, language: &str) -> RecognitionTask {
    RecognitionTask::new(vec![0x89, 0x50, 0x4e, 0x47], name).with_language(language)
}

#[tokio::test]
async fn language_switches_rebuild_the_engine_each_time() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let factory = ScriptedFactory::new(0);
    let builds = Arc::clone(&factory.builds);
    let orchestrator = Orchestrator::new(Arc::new(factory), config_in(&scratch)).unwrap();

    let a1 = orchestrator.recognize(png_task("1.png", "ch_sim")).await.unwrap();
    let b = orchestrator.recognize(png_task("2.png", "eng")).await.unwrap();
    let a2 = orchestrator.recognize(png_task("3.png", "ch_sim")).await.unwrap();

    assert_eq!(a1.text, "text from ch_sim");
    assert_eq!(b.text, "text from eng");
    assert_eq!(a2.text, "text from ch_sim");

    // A -> B -> A: three constructions, two teardowns, no handle caching.
    assert_eq!(builds.load(Ordering::SeqCst), 3);
    assert_eq!(orchestrator.engine_constructions(), 3);
    assert_eq!(orchestrator.engine_teardowns(), 2);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn same_language_batch_reuses_one_engine() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let factory = ScriptedFactory::new(0);
    let orchestrator = Orchestrator::new(Arc::new(factory), config_in(&scratch)).unwrap();

    let tasks = (0..5).map(|i| png_task(&format!("{i}.png"), "eng")).collect();
    let summary = orchestrator
        .recognize_batch(tasks, CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(orchestrator.engine_constructions(), 1);

    // Nothing left behind in scratch.
    let leftovers = std::fs::read_dir(scratch.path()).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn timeouts_on_early_attempts_still_succeed() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    // Stall the first two invocations past the recognition deadline.
    let factory = ScriptedFactory::new(2);
    let invocations = Arc::clone(&factory.invocations);
    let orchestrator = Orchestrator::new(Arc::new(factory), config_in(&scratch)).unwrap();
    let mut events = orchestrator.subscribe();

    let result = orchestrator.recognize(png_task("slow.png", "eng")).await.unwrap();

    assert_eq!(result.text, "text from eng");
    assert_eq!(invocations.load(Ordering::SeqCst), 3);

    // The final task event must be Completed even though attempts 1 and 2
    // timed out.
    let mut last_status = None;
    while let Ok(event) = events.try_recv() {
        if let ProgressEvent::Task { status, .. } = event {
            last_status = Some(status);
        }
    }
    assert_eq!(last_status, Some(TaskStatus::Completed));
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_one_aggregated_error() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    // Every invocation stalls: all three attempts time out.
    let factory = ScriptedFactory::new(usize::MAX);
    let orchestrator = Orchestrator::new(Arc::new(factory), config_in(&scratch)).unwrap();

    let err = orchestrator.recognize(png_task("never.png", "eng")).await.unwrap_err();

    match err {
        PalimpsestError::RetryExhausted { attempts, source, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, PalimpsestError::RecognitionTimeout(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Scratch artifacts from failed attempts were all released.
    let leftovers = std::fs::read_dir(scratch.path()).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn structurally_bad_inputs_fail_without_engine_work() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let factory = ScriptedFactory::new(0);
    let invocations = Arc::clone(&factory.invocations);
    let builds = Arc::clone(&factory.builds);
    let orchestrator = Orchestrator::new(Arc::new(factory), config_in(&scratch)).unwrap();

    let empty = orchestrator
        .recognize(RecognitionTask::new(vec![], "a.png").with_language("eng"))
        .await
        .unwrap_err();
    assert!(matches!(empty, PalimpsestError::EmptyPayload));

    let wrong_format = orchestrator
        .recognize(RecognitionTask::new(vec![1], "notes.txt").with_language("eng"))
        .await
        .unwrap_err();
    assert!(matches!(wrong_format, PalimpsestError::UnsupportedFormat(_)));

    // Zero retries, zero engine interaction for either case.
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
    assert_eq!(builds.load(Ordering::SeqCst), 0);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn mixed_outcome_batch_reports_both_counts() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let factory = ScriptedFactory::new(0);
    let orchestrator = Orchestrator::new(Arc::new(factory), config_in(&scratch)).unwrap();

    let tasks = vec![
        png_task("good-1.png", "eng"),
        RecognitionTask::new(vec![], "broken.png").with_language("eng"),
        png_task("good-2.png", "eng"),
    ];
    let summary = orchestrator
        .recognize_batch(tasks, CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.outcomes[1].status, BatchItemStatus::Failed);
    assert_eq!(summary.outcomes[1].attempts, 1);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancelled_batch_skips_undispatched_tasks() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let factory = ScriptedFactory::new(0);
    let orchestrator = Orchestrator::new(Arc::new(factory), config_in(&scratch)).unwrap();

    let cancel = CancellationFlag::new();
    cancel.cancel();

    let tasks = (0..4).map(|i| png_task(&format!("{i}.png"), "eng")).collect();
    let summary = orchestrator.recognize_batch(tasks, cancel).await.unwrap();

    assert_eq!(summary.cancelled, 4);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(orchestrator.engine_constructions(), 0);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn reset_during_operation_recovers_on_next_task() {
    init_tracing();
    let scratch = tempfile::tempdir().unwrap();
    let factory = ScriptedFactory::new(0);
    let orchestrator = Orchestrator::new(Arc::new(factory), config_in(&scratch)).unwrap();

    orchestrator.recognize(png_task("a.png", "eng")).await.unwrap();
    orchestrator.reset_engine().await.unwrap();
    orchestrator.recognize(png_task("b.png", "eng")).await.unwrap();

    assert_eq!(orchestrator.engine_constructions(), 2);
    assert_eq!(orchestrator.engine_teardowns(), 1);
    orchestrator.shutdown().await.unwrap();
}
