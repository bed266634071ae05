//! Shared fixtures for the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use isolates::{
    BatchOutcome, Context, FrameId, FrameInfo, IsoError, IsoSystem, Isolate, Result, Runnable,
    Scheduler,
};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `TIMEOUT` passes
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Wait until the named isolate is idle with nothing pending
pub fn settled(system: &IsoSystem, isolate: &str) -> bool {
    eventually(|| {
        system
            .frame_status(isolate)
            .map(|status| !status.executing && status.pending == 0)
            .unwrap_or(false)
    })
}

/// Appends every event to a shared log
pub struct Collector<T> {
    pub seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Send + 'static> Isolate for Collector<T> {
    type Event = T;

    fn on_event(&mut self, _ctx: &mut Context<'_, Self>, event: T) -> Result<()> {
        self.seen.lock().push(event);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ScheduleStats {
    pub submitted: AtomicUsize,
    pub runs: AtomicUsize,
    pub errors: Mutex<Vec<IsoError>>,
}

impl ScheduleStats {
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

/// Wraps a scheduler and counts submissions and completed runs
pub struct CountingScheduler {
    inner: Arc<dyn Scheduler>,
    pub stats: Arc<ScheduleStats>,
}

impl CountingScheduler {
    pub fn new(inner: Arc<dyn Scheduler>) -> Self {
        Self {
            inner,
            stats: Arc::new(ScheduleStats::default()),
        }
    }
}

struct Counted {
    task: Arc<dyn Runnable>,
    stats: Arc<ScheduleStats>,
}

impl Runnable for Counted {
    fn info(&self) -> &FrameInfo {
        self.task.info()
    }

    fn run(self: Arc<Self>) -> Result<BatchOutcome> {
        let outcome = self.task.clone().run();
        if let Err(error) = &outcome {
            self.stats.errors.lock().push(error.clone());
        }
        self.stats.runs.fetch_add(1, Ordering::SeqCst);
        outcome
    }
}

impl Scheduler for CountingScheduler {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn schedule(&self, task: Arc<dyn Runnable>) {
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        self.inner.schedule(Arc::new(Counted {
            task,
            stats: self.stats.clone(),
        }));
    }

    fn attach(&self, frame: &FrameInfo) {
        self.inner.attach(frame);
    }

    fn detach(&self, frame: FrameId) {
        self.inner.detach(frame);
    }

    fn shutdown(&self) {
        self.inner.shutdown();
    }
}

/// Runs every batch inline on the submitting thread, with no trampoline
pub struct InlineScheduler {
    pub results: Arc<Mutex<Vec<Result<BatchOutcome>>>>,
}

impl Scheduler for InlineScheduler {
    fn name(&self) -> &str {
        "inline"
    }

    fn schedule(&self, task: Arc<dyn Runnable>) {
        let outcome = task.run();
        self.results.lock().push(outcome);
    }
}
