//! # Sampling Loop Module
//!
//! Drives the engine at a fixed cadence on a dedicated thread: every period
//! it reads one window from the audio source, classifies it and hands the
//! result to the host's sink.
//!
//! ## Guarantees
//! - Ticks never overlap. A tick that overruns its period is followed
//!   immediately by the next one; missed ticks are skipped, not queued.
//! - Results reach the sink in tick order, from a single thread.
//! - [`SamplingLoop::stop`] joins the worker, so no result is emitted after
//!   it returns.
//! - A failing source stops the loop and is reported to the sink.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::engine::TunerEngine;
use crate::error::{Result, TunerError};
use crate::source::AudioSource;
use crate::ClassificationResult;

/// Receives one result per tick.
///
/// Implementations should return quickly; time spent here delays the next
/// tick.
pub trait ResultSink {
    fn emit(&mut self, result: ClassificationResult);

    /// Called once when the loop stops because of an error.
    fn fault(&mut self, error: &TunerError) {
        let _ = error;
    }
}

impl<S: ResultSink + ?Sized> ResultSink for Box<S> {
    fn emit(&mut self, result: ClassificationResult) {
        (**self).emit(result)
    }

    fn fault(&mut self, error: &TunerError) {
        (**self).fault(error)
    }
}

/// Forwards results to another thread. Never blocks: when the channel is
/// full the result is dropped.
impl ResultSink for Sender<ClassificationResult> {
    fn emit(&mut self, result: ClassificationResult) {
        match self.try_send(result) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("result channel full, dropping result"),
            Err(TrySendError::Disconnected(_)) => debug!("result channel closed"),
        }
    }
}

/// State shared between the loop handle and one run of the worker.
#[derive(Debug, Default)]
struct RunState {
    stop_requested: AtomicBool,
    running: AtomicBool,
    emitted: AtomicU64,
    error: Mutex<Option<TunerError>>,
}

impl RunState {
    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// Asks a running loop to stop without waiting for it.
///
/// Safe to use from inside a [`ResultSink`], where joining the worker would
/// deadlock.
#[derive(Debug, Clone)]
pub struct StopHandle {
    state: Arc<RunState>,
    shutdown_tx: Sender<()>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.state.stop_requested.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.try_send(());
    }
}

/// Sampling worker thread management structure.
#[derive(Debug)]
struct Worker {
    state: Arc<RunState>,
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
}

/// Periodic acquire-classify-emit loop.
#[derive(Debug)]
pub struct SamplingLoop {
    engine: Arc<TunerEngine>,
    period: Duration,
    worker: Option<Worker>,
    last_error: Option<TunerError>,
    last_emitted: u64,
}

impl SamplingLoop {
    pub fn new(engine: Arc<TunerEngine>, period: Duration) -> Self {
        Self {
            engine,
            period,
            worker: None,
            last_error: None,
            last_emitted: 0,
        }
    }

    /// A loop using the engine's configured sampling period.
    pub fn with_engine_period(engine: Arc<TunerEngine>) -> Self {
        let period = engine.config().sampling_period();
        Self::new(engine, period)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn engine(&self) -> &Arc<TunerEngine> {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| w.state.running.load(Ordering::SeqCst))
    }

    /// Starts sampling. The first tick fires one period from now.
    ///
    /// # Returns
    /// * `Ok(true)` - A new worker was started
    /// * `Ok(false)` - The loop was already running; nothing changed
    pub fn start<A, S>(&mut self, source: A, sink: S) -> Result<bool>
    where
        A: AudioSource + Send + 'static,
        S: ResultSink + Send + 'static,
    {
        if self.is_running() {
            debug!("sampling loop already running");
            return Ok(false);
        }
        // A previous run may have ended on its own; collect it first.
        self.join_worker();
        self.last_error = None;
        self.last_emitted = 0;

        let state = Arc::new(RunState {
            running: AtomicBool::new(true),
            ..RunState::default()
        });
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);

        let engine = Arc::clone(&self.engine);
        let period = self.period;
        let worker_state = Arc::clone(&state);
        let thread_handle = thread::Builder::new()
            .name("tuner-sampling".to_string())
            .spawn(move || run(engine, period, source, sink, shutdown_rx, worker_state))?;

        info!(?period, "sampling loop started");
        self.worker = Some(Worker {
            state,
            shutdown_tx,
            thread_handle: Some(thread_handle),
        });
        Ok(true)
    }

    /// Stops sampling and waits for the worker to exit. Does nothing when
    /// the loop is not running.
    pub fn stop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.state.stop_requested.store(true, Ordering::SeqCst);
            let _ = worker.shutdown_tx.try_send(());
        }
        self.join_worker();
    }

    /// A handle that can request a stop from any thread, or `None` when no
    /// worker exists.
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.worker.as_ref().map(|w| StopHandle {
            state: Arc::clone(&w.state),
            shutdown_tx: w.shutdown_tx.clone(),
        })
    }

    /// Results emitted by the current (or most recent) run.
    pub fn emitted(&self) -> u64 {
        self.worker
            .as_ref()
            .map_or(self.last_emitted, |w| w.state.emitted.load(Ordering::SeqCst))
    }

    /// Takes the error that ended the most recent run, if any.
    pub fn take_error(&mut self) -> Option<TunerError> {
        if let Some(worker) = &self.worker {
            if let Some(e) = worker.state.error.lock().unwrap_or_else(PoisonError::into_inner).take() {
                return Some(e);
            }
        }
        self.last_error.take()
    }

    fn join_worker(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        if let Some(handle) = worker.thread_handle.take() {
            if handle.join().is_err() {
                error!("sampling thread panicked");
            }
        }
        let pending = worker
            .state
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if pending.is_some() {
            self.last_error = pending;
        }
        self.last_emitted = worker.state.emitted.load(Ordering::SeqCst);
        info!(emitted = self.last_emitted, "sampling loop stopped");
    }
}

impl Drop for SamplingLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<A, S>(
    engine: Arc<TunerEngine>,
    period: Duration,
    mut source: A,
    mut sink: S,
    shutdown_rx: Receiver<()>,
    state: Arc<RunState>,
) where
    A: AudioSource,
    S: ResultSink,
{
    let window = engine.config().window_size_samples;
    let mut deadline = Instant::now() + period;

    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        crossbeam_channel::select! {
            recv(shutdown_rx) -> _ => break,
            recv(crossbeam_channel::after(wait)) -> _ => {}
        }
        if state.stop_requested() {
            break;
        }

        let tick_started = Instant::now();
        let outcome = source
            .read(window)
            .and_then(|buffer| engine.classify(&buffer));

        match outcome {
            Ok(result) => {
                if state.stop_requested() {
                    break;
                }
                sink.emit(result);
                state.emitted.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                if e.is_fatal() {
                    error!("sampling stopped: {e}");
                } else {
                    warn!("sampling stopped: {e}");
                }
                sink.fault(&e);
                *state.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                break;
            }
        }

        deadline += period;
        let now = Instant::now();
        if deadline < now {
            debug!(
                elapsed = ?tick_started.elapsed(),
                ?period,
                "tick overran its period, skipping ahead"
            );
            deadline = now;
        }
    }

    state.running.store(false, Ordering::SeqCst);
}
