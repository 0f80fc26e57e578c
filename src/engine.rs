// src/engine.rs
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, trace, warn};

use crate::analysis::{
    Advance, AnalysisError, AnomalyScorer, FrameEngine, RecordedSignal, SharedFrames,
};
use crate::settings::SharedSettings;
use crate::types::{FrameSnapshot, StreamEvent, TickOutcome};

enum Job {
    Advance(usize),
    Load(RecordedSignal),
    SwapScorer(Box<dyn AnomalyScorer>),
    Sync(Sender<()>),
    Shutdown,
}

/// Progress published by the worker after every job.
#[derive(Debug, Default)]
struct StreamStatus {
    streaming: AtomicBool,
    running: AtomicBool,
    windows_analyzed: AtomicUsize,
    position: AtomicUsize,
    signal_len: AtomicUsize,
}

/// Cloneable tick source. Any number of threads may tick; the worker still runs
/// one advance at a time and a tick that finds it busy is dropped.
#[derive(Clone)]
pub struct TickHandle {
    jobs: SyncSender<Job>,
    cursor: Arc<Mutex<usize>>,
    status: Arc<StreamStatus>,
}

impl TickHandle {
    pub fn tick(&self) -> TickOutcome {
        if !self.status.streaming.load(Ordering::Acquire) {
            return TickOutcome::Idle;
        }
        if !self.status.running.load(Ordering::Acquire) {
            return TickOutcome::Exhausted;
        }
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        // Rendezvous channel: the hand-off only succeeds while the worker is idle.
        match self.jobs.try_send(Job::Advance(*cursor)) {
            Ok(()) => {
                let submitted = *cursor;
                *cursor += 1;
                TickOutcome::Submitted(submitted)
            }
            Err(TrySendError::Full(_)) => {
                trace!("worker busy; tick at {} dropped", *cursor);
                TickOutcome::Skipped
            }
            Err(TrySendError::Disconnected(_)) => TickOutcome::Disconnected,
        }
    }
}

struct Ticker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Runs a [`FrameEngine`] on a background thread, one advance per tick, and
/// hands the latest rendered state to the consumer.
pub struct FrameScheduler {
    handle: TickHandle,
    events: Receiver<StreamEvent>,
    frames: SharedFrames,
    settings: SharedSettings,
    worker: Option<JoinHandle<()>>,
    ticker: Option<Ticker>,
}

impl FrameScheduler {
    pub fn spawn(engine: FrameEngine) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::sync_channel(0);
        let (events_tx, events_rx) = mpsc::channel();
        let status = Arc::new(StreamStatus::default());
        status.running.store(engine.is_running(), Ordering::Release);
        status.position.store(engine.cursor(), Ordering::Release);
        status.signal_len.store(engine.signal().len(), Ordering::Release);
        let cursor = Arc::new(Mutex::new(engine.cursor() + 1));
        let frames = engine.frames();
        let settings = engine.settings();

        let worker_status = Arc::clone(&status);
        let worker = thread::spawn(move || run_worker(engine, jobs_rx, events_tx, worker_status));

        Self {
            handle: TickHandle {
                jobs: jobs_tx,
                cursor,
                status,
            },
            events: events_rx,
            frames,
            settings,
            worker: Some(worker),
            ticker: None,
        }
    }

    pub fn start(&self) {
        info!("stream started");
        self.handle.status.streaming.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        info!("stream stopped");
        self.handle.status.streaming.store(false, Ordering::Release);
    }

    pub fn tick(&self) -> TickOutcome {
        self.handle.tick()
    }

    pub fn tick_handle(&self) -> TickHandle {
        self.handle.clone()
    }

    /// Tick every `interval` from a dedicated thread until stopped or dropped.
    pub fn spawn_ticker(&mut self, interval: Duration) {
        self.stop_ticker();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = self.handle.clone();
        let thread = thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                if handle.tick() == TickOutcome::Disconnected {
                    break;
                }
                thread::sleep(interval);
            }
        });
        self.ticker = Some(Ticker { stop, thread });
    }

    pub fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop.store(true, Ordering::Release);
            ticker.thread.join().ok();
        }
    }

    /// Swap the recording. Queued behind any in-flight advance; the cursor restarts at 1.
    pub fn load_signal(&self, signal: RecordedSignal) -> Result<(), AnalysisError> {
        let mut cursor = self
            .handle
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.send(Job::Load(signal))?;
        *cursor = 1;
        self.handle.status.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Replace the scorer between two advances.
    pub fn swap_scorer(&self, scorer: Box<dyn AnomalyScorer>) -> Result<(), AnalysisError> {
        self.send(Job::SwapScorer(scorer))
    }

    /// Block until every job submitted before this call has finished.
    pub fn flush(&self) -> Result<(), AnalysisError> {
        let (done_tx, done_rx) = mpsc::channel();
        self.send(Job::Sync(done_tx))?;
        done_rx.recv().map_err(|_| AnalysisError::WorkerStopped)
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        let (main, sub_frame) = self.frames.copy_out();
        FrameSnapshot {
            main,
            sub_frame,
            position: self.position(),
            running: self.is_running(),
        }
    }

    pub fn drain_events(&self) -> Vec<StreamEvent> {
        self.events.try_iter().collect()
    }

    pub fn settings(&self) -> SharedSettings {
        self.settings.clone()
    }

    /// Last cursor position the engine drew.
    pub fn position(&self) -> usize {
        self.handle.status.position.load(Ordering::Acquire)
    }

    pub fn windows_analyzed(&self) -> usize {
        self.handle.status.windows_analyzed.load(Ordering::Acquire)
    }

    pub fn signal_len(&self) -> usize {
        self.handle.status.signal_len.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle.status.running.load(Ordering::Acquire)
    }

    pub fn is_streaming(&self) -> bool {
        self.handle.status.streaming.load(Ordering::Acquire)
    }

    fn send(&self, job: Job) -> Result<(), AnalysisError> {
        self.handle
            .jobs
            .send(job)
            .map_err(|_| AnalysisError::WorkerStopped)
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.stop_ticker();
        self.handle.jobs.send(Job::Shutdown).ok();
        if let Some(worker) = self.worker.take() {
            worker.join().ok();
        }
    }
}

fn run_worker(
    mut engine: FrameEngine,
    jobs: Receiver<Job>,
    events: Sender<StreamEvent>,
    status: Arc<StreamStatus>,
) {
    events
        .send(StreamEvent::Log("frame engine ready".to_owned()))
        .ok();
    let mut announced_end = false;
    while let Ok(job) = jobs.recv() {
        match job {
            Job::Advance(idx) => match engine.advance(idx) {
                Ok(Advance::Streamed(report)) => {
                    status.position.store(engine.cursor(), Ordering::Release);
                    status
                        .windows_analyzed
                        .store(engine.windows_analyzed(), Ordering::Release);
                    if let Some(report) = report {
                        events.send(StreamEvent::Analysis(report)).ok();
                    }
                }
                Ok(Advance::Exhausted) => {
                    status.running.store(false, Ordering::Release);
                    if !announced_end {
                        announced_end = true;
                        info!("recording exhausted at {}", engine.cursor());
                        events
                            .send(StreamEvent::Exhausted {
                                position: engine.cursor(),
                            })
                            .ok();
                    }
                }
                Err(e) => {
                    warn!("advance to {idx} failed: {e}");
                    status
                        .windows_analyzed
                        .store(engine.windows_analyzed(), Ordering::Release);
                    events
                        .send(StreamEvent::Log(format!("advance to {idx} failed: {e}")))
                        .ok();
                }
            },
            Job::Load(signal) => {
                let len = signal.len();
                engine.load_signal(signal);
                announced_end = false;
                status.signal_len.store(len, Ordering::Release);
                status.position.store(0, Ordering::Release);
                status.windows_analyzed.store(0, Ordering::Release);
                status.running.store(true, Ordering::Release);
                events.send(StreamEvent::SignalLoaded { len }).ok();
            }
            Job::SwapScorer(scorer) => engine.set_scorer(scorer),
            Job::Sync(done) => {
                done.send(()).ok();
            }
            Job::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;
    use std::time::Instant;

    use super::*;
    use crate::analysis::{
        EngineConfig, Score, ScorerError, SignalTransformer, SyntheticEcgSource, TemplateScorer,
    };

    const DEADLINE: Duration = Duration::from_secs(30);

    fn sine(len: usize) -> RecordedSignal {
        let samples = (0..len)
            .map(|i| (2.0 * PI * 1.2 * i as f64 / 360.0).sin())
            .collect();
        RecordedSignal::new(samples, 360.0).unwrap()
    }

    fn scheduler_for(signal: RecordedSignal) -> FrameScheduler {
        let engine = FrameEngine::new(
            signal,
            SignalTransformer::default(),
            Box::new(TemplateScorer::flat()),
            SharedSettings::default(),
            EngineConfig::default(),
        )
        .unwrap();
        FrameScheduler::spawn(engine)
    }

    fn tick_until(scheduler: &FrameScheduler, target: usize) {
        let started = Instant::now();
        while scheduler.tick() != TickOutcome::Submitted(target) {
            assert!(started.elapsed() < DEADLINE, "never reached {target}");
        }
        scheduler.flush().unwrap();
    }

    /// Tracks how many `score` calls overlap.
    struct CountingScorer {
        in_flight: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
        calls: Arc<AtomicUsize>,
    }

    impl AnomalyScorer for CountingScorer {
        fn score(&mut self, window: &[f64], _threshold: f64) -> Result<Score, ScorerError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Score {
                reconstruction: window.to_vec(),
                error: 0.0,
                flagged: false,
            })
        }
    }

    #[test]
    fn ticks_from_many_threads_never_overlap_advances() {
        let signal = SyntheticEcgSource::new(6.0, 11).generate().unwrap();
        let scheduler = scheduler_for(signal);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        scheduler
            .swap_scorer(Box::new(CountingScorer {
                in_flight: Arc::clone(&in_flight),
                max_seen: Arc::clone(&max_seen),
                calls: Arc::clone(&calls),
            }))
            .unwrap();
        scheduler.start();

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let handle = scheduler.tick_handle();
                thread::spawn(move || {
                    let started = Instant::now();
                    while handle.tick() != TickOutcome::Exhausted {
                        assert!(started.elapsed() < DEADLINE);
                        thread::yield_now();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        scheduler.flush().unwrap();

        assert!(calls.load(Ordering::SeqCst) > 0);
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.position(), scheduler.signal_len() - 1);
    }

    #[test]
    fn scheduled_stream_matches_window_arithmetic() {
        let scheduler = scheduler_for(sine(2000));
        assert_eq!(scheduler.tick(), TickOutcome::Idle);
        scheduler.start();

        tick_until(&scheduler, 432);
        assert_eq!(scheduler.windows_analyzed(), 1);
        tick_until(&scheduler, 864);
        assert_eq!(scheduler.windows_analyzed(), 2);
        assert_eq!(scheduler.position(), 864);

        let reports = scheduler
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, StreamEvent::Analysis(_)))
            .count();
        assert_eq!(reports, 2);
        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.position, 864);
        assert!(snapshot.running);
        assert!(snapshot.main.lit_in_column(799) > 0);
    }

    #[test]
    fn exhaustion_is_reported_once() {
        let scheduler = scheduler_for(sine(300));
        scheduler.start();
        let started = Instant::now();
        while scheduler.tick() != TickOutcome::Exhausted {
            assert!(started.elapsed() < DEADLINE);
        }
        scheduler.flush().unwrap();
        let ends: Vec<_> = scheduler
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                StreamEvent::Exhausted { position } => Some(position),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![299]);
        assert!(!scheduler.snapshot().running);
    }

    #[test]
    fn loading_a_signal_restarts_the_cursor() {
        let scheduler = scheduler_for(sine(2000));
        scheduler.start();
        tick_until(&scheduler, 500);
        scheduler.load_signal(sine(900)).unwrap();
        scheduler.flush().unwrap();
        assert_eq!(scheduler.position(), 0);
        assert_eq!(scheduler.windows_analyzed(), 0);
        assert_eq!(scheduler.signal_len(), 900);
        assert!(scheduler
            .drain_events()
            .iter()
            .any(|e| matches!(e, StreamEvent::SignalLoaded { len: 900 })));
        tick_until(&scheduler, 1);
        assert_eq!(scheduler.position(), 1);
    }

    #[test]
    fn ticker_streams_to_the_end() {
        let mut scheduler = scheduler_for(sine(600));
        scheduler.start();
        scheduler.spawn_ticker(Duration::from_micros(50));
        let started = Instant::now();
        while scheduler.is_running() {
            assert!(started.elapsed() < DEADLINE);
            thread::sleep(Duration::from_millis(5));
        }
        scheduler.stop_ticker();
        scheduler.flush().unwrap();
        assert_eq!(scheduler.position(), 599);
        assert_eq!(scheduler.windows_analyzed(), 1);
    }

    #[test]
    fn paused_stream_does_not_advance() {
        let scheduler = scheduler_for(sine(600));
        scheduler.start();
        tick_until(&scheduler, 10);
        scheduler.stop();
        assert_eq!(scheduler.tick(), TickOutcome::Idle);
        scheduler.flush().unwrap();
        assert_eq!(scheduler.position(), 10);
        assert!(!scheduler.is_streaming());
    }
}
