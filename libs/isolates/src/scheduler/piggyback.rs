//! Piggyback scheduler: batches run on the submitting thread.
//!
//! A submission made while a batch is already active on this thread (an
//! isolate sending to a piggyback isolate) is deferred on the thread's
//! trampoline and runs as soon as the active batch returns.

use std::sync::Arc;

use super::{Runnable, Scheduler};
use crate::active;

#[derive(Debug)]
pub struct PiggybackScheduler {
    name: String,
}

impl PiggybackScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Scheduler for PiggybackScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedule(&self, task: Arc<dyn Runnable>) {
        active::run_or_defer(task);
    }
}
