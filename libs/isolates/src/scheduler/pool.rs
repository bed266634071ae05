//! Shared worker pool
//!
//! A fixed set of named threads pulling batches from one unbounded
//! crossbeam queue.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use super::{run_task, Runnable, Scheduler};
use crate::error::{IsoError, Result};

pub struct PoolScheduler {
    name: String,
    sender: RwLock<Option<Sender<Arc<dyn Runnable>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl PoolScheduler {
    /// Spawn `workers` threads named `<name>-<n>`
    pub fn new(name: impl Into<String>, workers: usize) -> Result<Self> {
        let name = name.into();
        if workers == 0 {
            return Err(IsoError::configuration(
                format!("pool '{name}' needs at least one worker"),
                Some("workers"),
            ));
        }

        let (sender, receiver) = unbounded::<Arc<dyn Runnable>>();
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(receiver))
                .map_err(|e| IsoError::scheduler(&name, format!("failed to spawn worker: {e}")))?;
            handles.push(handle);
        }

        info!(scheduler = %name, workers, "Pool scheduler started");
        Ok(Self {
            name,
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(handles),
            size: workers,
        })
    }

    pub fn workers(&self) -> usize {
        self.size
    }
}

fn worker_loop(receiver: Receiver<Arc<dyn Runnable>>) {
    while let Ok(task) = receiver.recv() {
        run_task(task);
    }
}

impl Scheduler for PoolScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self, task: Arc<dyn Runnable>) {
        let sender = self.sender.read();
        let rejected = match sender.as_ref() {
            Some(sender) => sender.send(task).err().map(|e| e.into_inner()),
            None => Some(task),
        };
        if let Some(task) = rejected {
            warn!(scheduler = %self.name, frame = %task.info().name, "Pool is shut down, batch dropped");
        }
    }

    fn shutdown(&self) {
        // Dropping the sender lets workers finish queued batches and exit
        if self.sender.write().take().is_none() {
            return;
        }
        let current = thread::current().id();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(scheduler = %self.name, "Pool worker panicked");
            }
        }
        debug!(scheduler = %self.name, "Pool scheduler stopped");
    }
}

impl std::fmt::Debug for PoolScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolScheduler")
            .field("name", &self.name)
            .field("workers", &self.size)
            .finish()
    }
}

impl Drop for PoolScheduler {
    fn drop(&mut self) {
        self.sender.get_mut().take();
    }
}
