//! Schedulers
//!
//! A scheduler decides on which thread a frame's batch runs. The contract
//! every strategy honours: each `schedule` call eventually runs the task
//! exactly once. Frames never submit themselves twice concurrently, so a
//! strategy does not need its own per-frame exclusion.

use std::fmt;
use std::sync::Arc;
use tracing::{error, trace, warn};

use crate::error::Result;
use crate::frame::{FrameId, FrameInfo};

pub mod dedicated;
pub mod piggyback;
pub mod pool;
pub mod runtime;

pub use self::dedicated::DedicatedScheduler;
pub use self::piggyback::PiggybackScheduler;
pub use self::pool::PoolScheduler;
pub use self::runtime::TokioScheduler;

/// How a batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// No pending events remain; the frame cleared its executing flag
    Idle,
    /// Events arrived during the batch; the frame re-submitted itself
    Resubmitted,
    /// The frame reached `Terminated`
    Terminated,
}

/// A unit of work a scheduler can run: one batch of one frame
pub trait Runnable: Send + Sync {
    fn info(&self) -> &FrameInfo;

    fn run(self: Arc<Self>) -> Result<BatchOutcome>;
}

/// Execution strategy for frame batches
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;

    /// Run `task` once, eventually, on some thread
    fn schedule(&self, task: Arc<dyn Runnable>);

    /// A frame was assigned to this scheduler
    fn attach(&self, _frame: &FrameInfo) {}

    /// A frame terminated and will not be scheduled again
    fn detach(&self, _frame: FrameId) {}

    /// Stop accepting work and release worker threads
    fn shutdown(&self) {}
}

impl fmt::Debug for dyn Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").field("name", &self.name()).finish()
    }
}

/// Run one batch and log its outcome; used by every worker loop
pub fn run_task(task: Arc<dyn Runnable>) {
    let info = task.info().clone();
    match task.run() {
        Ok(outcome) => {
            trace!(frame = %info.name, frame_id = %info.id, ?outcome, "Batch finished");
        }
        Err(e) if e.is_fatal() => {
            error!(frame = %info.name, frame_id = %info.id, error = %e, "Batch rejected");
        }
        Err(e) => {
            warn!(frame = %info.name, frame_id = %info.id, error = %e, "Batch failed");
        }
    }
}
