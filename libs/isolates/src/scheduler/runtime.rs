//! Tokio scheduler: batches run as blocking tasks on a tokio runtime.

use std::sync::Arc;
use tokio::runtime::Handle;

use super::{run_task, Runnable, Scheduler};
use crate::error::{IsoError, Result};

#[derive(Debug)]
pub struct TokioScheduler {
    name: String,
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(name: impl Into<String>, handle: Handle) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }

    /// Bind to the runtime of the calling task
    pub fn current(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let handle = Handle::try_current()
            .map_err(|e| IsoError::scheduler(&name, format!("no tokio runtime: {e}")))?;
        Ok(Self::new(name, handle))
    }
}

impl Scheduler for TokioScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self, task: Arc<dyn Runnable>) {
        // Handlers are synchronous and may block, keep them off the async workers
        self.handle.spawn_blocking(move || run_task(task));
    }
}
