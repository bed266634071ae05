//! Dedicated scheduler: one worker thread per attached frame.

use crossbeam_channel::{unbounded, Sender};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, warn};

use super::{run_task, Runnable, Scheduler};
use crate::frame::{FrameId, FrameInfo};

pub struct DedicatedScheduler {
    name: String,
    workers: DashMap<FrameId, Sender<Arc<dyn Runnable>>>,
    closed: AtomicBool,
}

impl DedicatedScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Frames currently owning a thread
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    fn spawn_worker(&self, frame: &FrameInfo) -> Option<Sender<Arc<dyn Runnable>>> {
        let (sender, receiver) = unbounded::<Arc<dyn Runnable>>();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.name, frame.name))
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    run_task(task);
                }
            });
        match spawned {
            Ok(_) => {
                debug!(scheduler = %self.name, frame = %frame.name, "Dedicated worker started");
                Some(sender)
            }
            Err(e) => {
                error!(scheduler = %self.name, frame = %frame.name, error = %e, "Failed to spawn dedicated worker");
                None
            }
        }
    }
}

impl Scheduler for DedicatedScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self, task: Arc<dyn Runnable>) {
        let info = task.info().clone();
        if self.closed.load(Ordering::Acquire) {
            warn!(scheduler = %self.name, frame = %info.name, "Scheduler is shut down, batch dropped");
            return;
        }
        let existing = self.workers.get(&info.id).map(|entry| entry.value().clone());
        let sender = existing.or_else(|| {
            self.attach(&info);
            self.workers.get(&info.id).map(|entry| entry.value().clone())
        });
        match sender {
            Some(sender) => {
                if sender.send(task).is_err() {
                    warn!(scheduler = %self.name, frame = %info.name, "Dedicated worker gone, batch dropped");
                }
            }
            None => {
                warn!(scheduler = %self.name, frame = %info.name, "No worker for frame, batch dropped");
            }
        }
    }

    fn attach(&self, frame: &FrameInfo) {
        if self.closed.load(Ordering::Acquire) {
            warn!(scheduler = %self.name, frame = %frame.name, "Scheduler is shut down, frame not attached");
            return;
        }
        if self.workers.contains_key(&frame.id) {
            return;
        }
        if let Some(sender) = self.spawn_worker(frame) {
            self.workers.entry(frame.id).or_insert(sender);
        }
    }

    fn detach(&self, frame: FrameId) {
        // The worker exits once its queue drains; it may be the calling thread
        if self.workers.remove(&frame).is_some() {
            debug!(scheduler = %self.name, frame_id = %frame, "Dedicated worker released");
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.workers.clear();
    }
}

impl std::fmt::Debug for DedicatedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedicatedScheduler")
            .field("name", &self.name)
            .field("threads", &self.workers.len())
            .finish()
    }
}
