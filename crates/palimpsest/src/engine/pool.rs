//! Engine pool: owns the single live engine instance and its lifecycle.
//!
//! The pool is an explicit state machine (`Empty`, `Constructing`,
//! `Ready`) guarded by an async mutex. Construction is a critical section:
//! concurrent callers find the `Constructing` state and wait on a watch
//! channel (woken immediately on any transition, never polled), bounded by
//! the construction timeout. A language mismatch tears the old handle down
//! before the replacement is built; prior-language handles are never cached.
//!
//! An idle reaper task is started with the pool and stopped by `shutdown`;
//! it tears down a handle that has gone unused past the idle threshold, so a
//! burst of work does not pin engine memory forever.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::core::config::OrchestratorConfig;
use crate::engine::profile::EngineParams;
use crate::engine::traits::{ConfidenceScale, EngineFactory, EngineOutput, RecognitionEngine};
use crate::error::{PalimpsestError, Result};

/// The live engine instance bound to one language configuration.
///
/// The engine is not assumed thread-safe: `invoke` serializes access through
/// an internal lock, so two tasks sharing the handle never reach the engine
/// concurrently even when the batch scheduler runs more than one task.
pub struct EngineHandle {
    engine: Arc<dyn RecognitionEngine>,
    language: String,
    created_at: Instant,
    last_used: parking_lot::Mutex<Instant>,
    invoke_lock: Mutex<()>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("language", &self.language)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    fn new(engine: Arc<dyn RecognitionEngine>, language: &str) -> Self {
        let now = Instant::now();
        Self {
            engine,
            language: language.to_string(),
            created_at: now,
            last_used: parking_lot::Mutex::new(now),
            invoke_lock: Mutex::new(()),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the handle last served a task.
    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    pub fn confidence_scale(&self) -> ConfidenceScale {
        self.engine.confidence_scale()
    }

    /// Run one recognition call against the staged artifact, racing the
    /// given hard deadline. Exclusive: concurrent callers queue here.
    pub async fn invoke(&self, image: &Path, deadline: Duration) -> Result<Option<EngineOutput>> {
        let _exclusive = self.invoke_lock.lock().await;
        self.touch();
        let outcome = tokio::time::timeout(deadline, self.engine.recognize(image)).await;
        self.touch();
        match outcome {
            Ok(result) => result,
            Err(_) => Err(PalimpsestError::RecognitionTimeout(deadline)),
        }
    }
}

enum PoolState {
    Empty,
    Constructing,
    Ready(Arc<EngineHandle>),
}

/// Owns zero-or-one live engine instance and serializes its construction.
pub struct EnginePool {
    factory: Arc<dyn EngineFactory>,
    state: Mutex<PoolState>,
    /// Bumped on every state transition; waiters subscribe while holding the
    /// state lock so no transition can slip past them.
    state_tx: watch::Sender<()>,
    construction_timeout: Duration,
    use_gpu: bool,
    model_dir: Option<PathBuf>,
    constructions: AtomicUsize,
    teardowns: AtomicUsize,
    reaper_stop: watch::Sender<bool>,
    reaper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl EnginePool {
    /// Create a pool and start its idle reaper.
    ///
    /// Must be called from within a Tokio runtime (the reaper is spawned
    /// immediately).
    pub fn new(factory: Arc<dyn EngineFactory>, config: &OrchestratorConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(());
        let (reaper_stop, stop_rx) = watch::channel(false);

        let pool = Arc::new(Self {
            factory,
            state: Mutex::new(PoolState::Empty),
            state_tx,
            construction_timeout: config.construction_timeout(),
            use_gpu: config.use_gpu,
            model_dir: config.model_dir.clone(),
            constructions: AtomicUsize::new(0),
            teardowns: AtomicUsize::new(0),
            reaper_stop,
            reaper: parking_lot::Mutex::new(None),
        });

        let task = tokio::spawn(Self::reap_idle(
            Arc::downgrade(&pool),
            stop_rx,
            config.reaper_interval(),
            config.idle_timeout(),
        ));
        *pool.reaper.lock() = Some(task);
        pool
    }

    /// Get the current handle for `language`, constructing or swapping the
    /// engine as needed.
    ///
    /// # Errors
    ///
    /// - [`PalimpsestError::EngineInit`] when construction fails (the pool is
    ///   left `Empty`, never half-built)
    /// - [`PalimpsestError::EngineInitTimeout`] when a concurrent
    ///   construction does not finish within the construction timeout
    pub async fn acquire(&self, language: &str) -> Result<Arc<EngineHandle>> {
        let budget = self.construction_timeout;
        let deadline = Instant::now() + budget;

        loop {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, PoolState::Empty) {
                PoolState::Ready(handle) => {
                    if handle.language() == language {
                        handle.touch();
                        *state = PoolState::Ready(Arc::clone(&handle));
                        return Ok(handle);
                    }

                    tracing::info!(
                        from = %handle.language(),
                        to = language,
                        "language changed, tearing down engine"
                    );
                    self.teardowns.fetch_add(1, Ordering::Relaxed);
                    drop(handle);
                    *state = PoolState::Constructing;
                    drop(state);
                    let _ = self.state_tx.send(());
                    return self.construct(language).await;
                }
                PoolState::Constructing => {
                    *state = PoolState::Constructing;
                    // Subscribe before releasing the lock so the completion
                    // transition cannot be missed.
                    let mut changed = self.state_tx.subscribe();
                    drop(state);

                    if Instant::now() >= deadline {
                        return Err(PalimpsestError::EngineInitTimeout(budget));
                    }
                    match tokio::time::timeout_at(deadline, changed.changed()).await {
                        Ok(_) => continue,
                        Err(_) => return Err(PalimpsestError::EngineInitTimeout(budget)),
                    }
                }
                PoolState::Empty => {
                    *state = PoolState::Constructing;
                    drop(state);
                    let _ = self.state_tx.send(());
                    return self.construct(language).await;
                }
            }
        }
    }

    async fn construct(&self, language: &str) -> Result<Arc<EngineHandle>> {
        tracing::info!(language, "constructing recognition engine");
        let started = Instant::now();
        let params = EngineParams::for_language(language)
            .with_gpu(self.use_gpu)
            .with_model_dir(self.model_dir.clone());

        // A hung factory would leave every waiter timing out with no one to
        // clear the Constructing state, so the build itself shares the bound.
        let built = match tokio::time::timeout(self.construction_timeout, self.factory.build(&params)).await {
            Ok(result) => result,
            Err(_) => Err(PalimpsestError::EngineInitTimeout(self.construction_timeout)),
        };

        let mut state = self.state.lock().await;
        let outcome = match built {
            Ok(engine) => {
                self.constructions.fetch_add(1, Ordering::Relaxed);
                let handle = Arc::new(EngineHandle::new(Arc::from(engine), language));
                *state = PoolState::Ready(Arc::clone(&handle));
                tracing::info!(
                    language,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "engine ready"
                );
                Ok(handle)
            }
            Err(err) => {
                *state = PoolState::Empty;
                tracing::warn!(language, error = %err, "engine construction failed");
                match err {
                    timeout @ PalimpsestError::EngineInitTimeout(_) => Err(timeout),
                    other => Err(PalimpsestError::engine_init(language, other)),
                }
            }
        };
        drop(state);
        let _ = self.state_tx.send(());
        outcome
    }

    /// Force-destroy the current handle regardless of state.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        if matches!(&*state, PoolState::Ready(_)) {
            self.teardowns.fetch_add(1, Ordering::Relaxed);
        }
        *state = PoolState::Empty;
        drop(state);
        let _ = self.state_tx.send(());
        tracing::info!("engine pool reset");
    }

    /// Stop the idle reaper and tear down the current handle.
    pub async fn shutdown(&self) {
        let _ = self.reaper_stop.send(true);
        if let Some(task) = self.reaper.lock().take() {
            task.abort();
        }
        self.reset().await;
    }

    /// Language of the current `Ready` handle, if any.
    pub async fn current_language(&self) -> Option<String> {
        match &*self.state.lock().await {
            PoolState::Ready(handle) => Some(handle.language().to_string()),
            _ => None,
        }
    }

    /// Total engines built over the pool's lifetime.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::Relaxed)
    }

    /// Total handles destroyed (language swaps, resets, idle reaps).
    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::Relaxed)
    }

    async fn reap_idle(
        pool: Weak<EnginePool>,
        mut stop: watch::Receiver<bool>,
        interval: Duration,
        idle_threshold: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(pool) = pool.upgrade() else { return };
                    pool.reap_if_idle(idle_threshold).await;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn reap_if_idle(&self, idle_threshold: Duration) {
        let mut state = self.state.lock().await;
        let PoolState::Ready(handle) = &*state else {
            return;
        };
        if handle.idle_for() < idle_threshold {
            return;
        }

        tracing::info!(
            language = %handle.language(),
            idle_secs = handle.idle_for().as_secs(),
            "tearing down idle engine"
        );
        self.teardowns.fetch_add(1, Ordering::Relaxed);
        *state = PoolState::Empty;
        drop(state);
        let _ = self.state_tx.send(());
    }
}
