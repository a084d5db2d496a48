//! Wave-based batch scheduler.
//!
//! Concurrency is computed once per batch and kept deliberately small: the
//! shared engine handle serializes actual recognition, so extra width only
//! overlaps staging and bookkeeping while still contending for CPU and
//! memory bandwidth. Tasks run in sequential waves of that width; every wave
//! is awaited in full (one failed task never aborts the batch), and a pacing
//! delay separates consecutive waves so the engine gets slack between bursts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use crate::core::events::ProgressBus;
use crate::core::retry::RetryController;
use crate::error::{PalimpsestError, Result};
use crate::types::{
    BatchItemOutcome, BatchItemStatus, BatchSummary, CancellationFlag, ProgressEvent, RecognitionTask, TaskStatus,
};

/// Widest a wave can get regardless of core count.
const MAX_WAVE_WIDTH: usize = 2;

/// Compute the wave width for a batch.
///
/// `clamp(cores / 4, 1, 2)`, further capped by the task count. An explicit
/// override skips the core heuristic but keeps both caps' lower bound.
pub fn compute_concurrency(task_count: usize, override_width: Option<usize>) -> usize {
    let width = match override_width {
        Some(width) => width,
        None => (num_cpus::get() / 4).clamp(1, MAX_WAVE_WIDTH),
    };
    width.clamp(1, task_count.max(1))
}

/// Delay inserted between consecutive waves: `max(500ms, 1000ms - cores * 100ms)`.
///
/// Faster machines recover quicker and get a shorter floor-bounded pause.
pub fn pacing_delay() -> Duration {
    let cores = num_cpus::get() as i64;
    let millis = (1000 - cores * 100).max(500);
    Duration::from_millis(millis as u64)
}

/// Runs a list of tasks in concurrency-limited waves.
pub struct BatchScheduler {
    retry: Arc<RetryController>,
    events: ProgressBus,
    override_width: Option<usize>,
}

impl BatchScheduler {
    pub fn new(retry: Arc<RetryController>, events: ProgressBus, override_width: Option<usize>) -> Self {
        Self {
            retry,
            events,
            override_width,
        }
    }

    /// Run the batch to completion or cancellation.
    ///
    /// Per-task failures are captured in the summary, never propagated; the
    /// only error here is the caller-bug of an empty task list.
    pub async fn run_batch(&self, tasks: Vec<RecognitionTask>, cancel: CancellationFlag) -> Result<BatchSummary> {
        if tasks.is_empty() {
            return Err(PalimpsestError::InvalidConfiguration(
                "cannot run an empty batch".to_string(),
            ));
        }

        let started = Instant::now();
        let total = tasks.len();
        let width = compute_concurrency(total, self.override_width);
        let pacing = pacing_delay();
        tracing::info!(total, width, pacing_ms = pacing.as_millis() as u64, "starting batch");

        let mut outcomes: Vec<Option<BatchItemOutcome>> = (0..total).map(|_| None).collect();
        let mut completed = 0usize;
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut cancelled = 0usize;

        let mut pending = tasks.into_iter().enumerate().peekable();
        let mut first_wave = true;

        while pending.peek().is_some() {
            if cancel.is_cancelled() {
                break;
            }
            if !first_wave {
                tokio::time::sleep(pacing).await;
                // Re-check: cancellation during the pacing sleep must stop
                // the next wave from launching.
                if cancel.is_cancelled() {
                    break;
                }
            }
            first_wave = false;

            let mut wave = JoinSet::new();
            let mut launched = 0usize;
            while launched < width {
                let Some((index, task)) = pending.next() else {
                    break;
                };
                if cancel.is_cancelled() {
                    cancelled += 1;
                    outcomes[index] = Some(BatchItemOutcome::cancelled(task.file_name));
                    continue;
                }

                let retry = Arc::clone(&self.retry);
                wave.spawn(async move {
                    let file_name = task.file_name.clone();
                    let (attempts, outcome) = retry.execute(&task).await;
                    let item = match outcome {
                        Ok(result) => BatchItemOutcome {
                            file_name,
                            status: BatchItemStatus::Succeeded,
                            attempts,
                            result: Some(result),
                            error: None,
                        },
                        Err(err) => BatchItemOutcome {
                            file_name,
                            status: BatchItemStatus::Failed,
                            attempts,
                            result: None,
                            error: Some(err.to_string()),
                        },
                    };
                    (index, item)
                });
                launched += 1;
            }

            // Await the whole wave; individual failures are data, not errors.
            while let Some(joined) = wave.join_next().await {
                let (index, item) = joined
                    .map_err(|err| PalimpsestError::Other(format!("recognition task panicked: {err}")))?;

                completed += 1;
                let status = match item.status {
                    BatchItemStatus::Succeeded => {
                        succeeded += 1;
                        TaskStatus::Completed
                    }
                    _ => {
                        failed += 1;
                        TaskStatus::Error
                    }
                };
                self.events.emit(ProgressEvent::Batch {
                    completed,
                    total,
                    current_file: item.file_name.clone(),
                    status,
                });
                outcomes[index] = Some(item);
            }
        }

        // Whatever never launched was cancelled.
        for (index, task) in pending {
            cancelled += 1;
            outcomes[index] = Some(BatchItemOutcome::cancelled(task.file_name));
        }

        let elapsed = started.elapsed();
        tracing::info!(
            total,
            succeeded,
            failed,
            cancelled,
            elapsed_ms = elapsed.as_millis() as u64,
            "batch finished"
        );

        #[allow(clippy::unwrap_used)]
        let outcomes: Vec<BatchItemOutcome> = outcomes.into_iter().map(|item| item.unwrap()).collect();

        Ok(BatchSummary {
            total,
            succeeded,
            failed,
            cancelled,
            elapsed,
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicIsize, Ordering};

    use crate::core::config::OrchestratorConfig;
    use crate::core::pipeline::Pipeline;
    use crate::engine::pool::EnginePool;
    use crate::engine::profile::EngineParams;
    use crate::engine::traits::{EngineFactory, EngineOutput, RecognitionEngine};
    use crate::staging::TempStorage;

    /// Records per-invocation start times and concurrency. The engine only
    /// ever sees the staged artifact (a UUID-named file), so the failure
    /// trigger matches on payload contents, not file names.
    struct ProbeEngine {
        starts: Arc<parking_lot::Mutex<Vec<tokio::time::Instant>>>,
        in_flight: Arc<AtomicIsize>,
        max_in_flight: Arc<AtomicIsize>,
        poison_payload: Option<&'static [u8]>,
        cancel_after_first: Option<CancellationFlag>,
    }

    #[async_trait]
    impl RecognitionEngine for ProbeEngine {
        async fn recognize(&self, image: &Path) -> Result<Option<EngineOutput>> {
            self.starts.lock().push(tokio::time::Instant::now());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if let Some(flag) = &self.cancel_after_first {
                flag.cancel();
            }

            let staged = std::fs::read(image).unwrap();
            if let Some(poison) = self.poison_payload
                && staged == poison
            {
                return Err(PalimpsestError::EmptyEngineResult);
            }
            Ok(Some(EngineOutput {
                text: "ok".to_string(),
                confidence: 80.0,
                words: 1,
                lines: 1,
                paragraphs: 1,
            }))
        }
    }

    struct ProbeFactory {
        engine_template: Arc<ProbeEngine>,
    }

    #[async_trait]
    impl EngineFactory for ProbeFactory {
        async fn build(&self, _params: &EngineParams) -> Result<Box<dyn RecognitionEngine>> {
            Ok(Box::new(ProbeEngine {
                starts: Arc::clone(&self.engine_template.starts),
                in_flight: Arc::clone(&self.engine_template.in_flight),
                max_in_flight: Arc::clone(&self.engine_template.max_in_flight),
                poison_payload: self.engine_template.poison_payload,
                cancel_after_first: self.engine_template.cancel_after_first.clone(),
            }))
        }
    }

    struct Fixture {
        scheduler: BatchScheduler,
        pool: Arc<EnginePool>,
        probe: Arc<ProbeEngine>,
        events: ProgressBus,
        _scratch: tempfile::TempDir,
    }

    fn fixture(
        width: Option<usize>,
        poison_payload: Option<&'static [u8]>,
        cancel_after_first: Option<CancellationFlag>,
    ) -> Fixture {
        let scratch = tempfile::tempdir().unwrap();
        let config = Arc::new(OrchestratorConfig {
            scratch_dir: Some(scratch.path().to_path_buf()),
            max_concurrency: width,
            ..Default::default()
        });
        let probe = Arc::new(ProbeEngine {
            starts: Arc::new(parking_lot::Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicIsize::new(0)),
            max_in_flight: Arc::new(AtomicIsize::new(0)),
            poison_payload,
            cancel_after_first,
        });
        let factory = Arc::new(ProbeFactory {
            engine_template: Arc::clone(&probe),
        });
        let pool = EnginePool::new(factory, &config);
        let storage = Arc::new(TempStorage::new(config.scratch_dir.clone()));
        let pipeline = Pipeline::new(Arc::clone(&pool), storage, Arc::clone(&config));
        let events = ProgressBus::new();
        let retry = Arc::new(RetryController::new(
            pipeline,
            Arc::clone(&pool),
            events.clone(),
            config.max_attempts,
        ));
        Fixture {
            scheduler: BatchScheduler::new(retry, events.clone(), config.max_concurrency),
            pool,
            probe,
            events,
            _scratch: scratch,
        }
    }

    fn tasks(count: usize) -> Vec<RecognitionTask> {
        (0..count)
            .map(|i| RecognitionTask::new(vec![1, 2, 3], format!("scan-{i}.png")).with_language("eng"))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_caller_error() {
        let fixture = fixture(Some(2), None, None);
        let err = fixture
            .scheduler
            .run_batch(vec![], CancellationFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PalimpsestError::InvalidConfiguration(_)));
        fixture.pool.shutdown().await;
    }

    #[test]
    fn test_concurrency_heuristic() {
        // Override path
        assert_eq!(compute_concurrency(10, Some(2)), 2);
        assert_eq!(compute_concurrency(1, Some(2)), 1);
        // Heuristic path is machine-dependent but always within [1, 2].
        let width = compute_concurrency(10, None);
        assert!((1..=MAX_WAVE_WIDTH).contains(&width));
        // Task count caps everything.
        assert_eq!(compute_concurrency(1, None), 1);
    }

    #[test]
    fn test_pacing_delay_floor() {
        let delay = pacing_delay();
        assert!(delay >= Duration::from_millis(500));
        assert!(delay <= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_five_tasks_width_two_run_in_three_waves() {
        let fixture = fixture(Some(2), None, None);

        let summary = fixture
            .scheduler
            .run_batch(tasks(5), CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 5);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.outcomes.len(), 5);

        // Input order is preserved.
        for (i, outcome) in summary.outcomes.iter().enumerate() {
            assert_eq!(outcome.file_name, format!("scan-{i}.png"));
            assert_eq!(outcome.status, BatchItemStatus::Succeeded);
        }

        // Tasks within a wave start within milliseconds of each other; the
        // pacing delay (>= 500ms) separates waves. Counting the large gaps
        // between sorted invocation timestamps therefore counts the wave
        // boundaries: 5 tasks at width 2 means waves of 2+2+1, so two gaps.
        let mut starts = fixture.probe.starts.lock().clone();
        assert_eq!(starts.len(), 5);
        starts.sort();
        let threshold = pacing_delay() / 2;
        let wave_boundaries = starts
            .windows(2)
            .filter(|pair| pair[1] - pair[0] >= threshold)
            .count();
        assert_eq!(wave_boundaries, 2, "expected waves 2+2+1");
        assert!(fixture.probe.max_in_flight.load(Ordering::SeqCst) <= 2);
        fixture.pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_never_exceeds_width() {
        let fixture = fixture(Some(2), None, None);

        fixture
            .scheduler
            .run_batch(tasks(6), CancellationFlag::new())
            .await
            .unwrap();

        assert!(fixture.probe.max_in_flight.load(Ordering::SeqCst) <= 2);
        fixture.pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_task_does_not_abort_batch() {
        // Task 1 carries the poison payload: no engine result on any
        // attempt. The rest succeed.
        let fixture = fixture(Some(2), Some(b"poison"), None);
        let mut batch = tasks(4);
        batch[1].payload = b"poison".to_vec();

        let summary = fixture
            .scheduler
            .run_batch(batch, CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.outcomes[1].status, BatchItemStatus::Failed);
        assert_eq!(summary.outcomes[1].attempts, 3);
        assert!(
            summary.outcomes[1]
                .error
                .as_deref()
                .unwrap()
                .contains("after 3 attempts")
        );
        fixture.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_fatal_input_fails_fast_in_batch() {
        let fixture = fixture(Some(2), None, None);
        let mut batch = tasks(3);
        batch[2].payload = vec![];

        let summary = fixture
            .scheduler
            .run_batch(batch, CancellationFlag::new())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.outcomes[2].attempts, 1);
        assert!(
            summary.outcomes[2]
                .error
                .as_deref()
                .unwrap()
                .contains("empty image payload")
        );
        fixture.pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancellation_stops_later_waves() {
        let cancel = CancellationFlag::new();
        // The engine cancels the batch during the first invocation.
        let fixture = fixture(Some(2), None, Some(cancel.clone()));

        let summary = fixture.scheduler.run_batch(tasks(6), cancel).await.unwrap();

        // Wave one (2 tasks) ran to completion; waves two and three never
        // launched.
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.cancelled, 4);
        assert_eq!(summary.failed, 0);
        assert_eq!(fixture.probe.starts.lock().len(), 2);
        for outcome in &summary.outcomes[2..] {
            assert_eq!(outcome.status, BatchItemStatus::Cancelled);
            assert_eq!(outcome.attempts, 0);
        }
        fixture.pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_progress_events_are_monotonic() {
        let fixture = fixture(Some(2), None, None);
        let mut rx = fixture.events.subscribe();

        fixture
            .scheduler
            .run_batch(tasks(3), CancellationFlag::new())
            .await
            .unwrap();

        let mut last_completed = 0usize;
        let mut batch_events = 0usize;
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::Batch { completed, total, .. } = event {
                assert!(completed > last_completed);
                assert_eq!(total, 3);
                last_completed = completed;
                batch_events += 1;
            }
        }
        assert_eq!(batch_events, 3);
        assert_eq!(last_completed, 3);
        fixture.pool.shutdown().await;
    }
}
