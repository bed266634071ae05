//! Per-thread execution bookkeeping
//!
//! Records which frame, if any, is executing a batch on the current thread
//! so nested execution is rejected, and hosts the trampoline that lets the
//! piggyback scheduler run submissions on the caller's thread without ever
//! starting one batch inside another.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{IsoError, Result};
use crate::frame::FrameId;
use crate::scheduler::{run_task, Runnable};

thread_local! {
    static ACTIVE: Cell<Option<FrameId>> = const { Cell::new(None) };
    static TRAMPOLINE: RefCell<Trampoline> = RefCell::new(Trampoline::default());
}

#[derive(Default)]
struct Trampoline {
    draining: bool,
    deferred: VecDeque<Arc<dyn Runnable>>,
}

/// Frame executing on the current thread, if any
pub fn current() -> Option<FrameId> {
    ACTIVE.with(Cell::get)
}

/// Marks a frame active on this thread until dropped
#[must_use = "the frame is only active while the guard lives"]
pub(crate) struct ActiveFrame {
    id: FrameId,
}

impl ActiveFrame {
    pub fn enter(id: FrameId) -> Result<Self> {
        ACTIVE.with(|active| match active.get() {
            Some(running) => Err(IsoError::nested(running, id)),
            None => {
                active.set(Some(id));
                Ok(Self { id })
            }
        })
    }
}

impl Drop for ActiveFrame {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            debug_assert_eq!(active.get(), Some(self.id));
            active.set(None);
        });
    }
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        TRAMPOLINE.with(|t| t.borrow_mut().draining = false);
    }
}

/// Run `task` on this thread now, or queue it behind the batch or drain
/// loop already in progress here.
pub(crate) fn run_or_defer(task: Arc<dyn Runnable>) {
    let run_now = TRAMPOLINE.with(|t| {
        let mut t = t.borrow_mut();
        if t.draining || current().is_some() {
            t.deferred.push_back(task);
            None
        } else {
            t.draining = true;
            Some(task)
        }
    });

    if let Some(task) = run_now {
        let _guard = DrainGuard;
        run_task(task);
        drain_loop();
    }
}

/// Run submissions deferred while this thread was busy.
///
/// No-op while a batch is active or an outer drain loop owns the queue.
pub(crate) fn drain_deferred() {
    let start = TRAMPOLINE.with(|t| {
        let mut t = t.borrow_mut();
        if t.draining || current().is_some() || t.deferred.is_empty() {
            false
        } else {
            t.draining = true;
            true
        }
    });

    if start {
        let _guard = DrainGuard;
        drain_loop();
    }
}

fn drain_loop() {
    while let Some(task) = TRAMPOLINE.with(|t| t.borrow_mut().deferred.pop_front()) {
        run_task(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_enter_rejected() {
        let outer = ActiveFrame::enter(FrameId::new(1)).unwrap();
        assert_eq!(current(), Some(FrameId::new(1)));

        match ActiveFrame::enter(FrameId::new(2)) {
            Err(IsoError::NestedExecution { active, requested }) => {
                assert_eq!(active, FrameId::new(1));
                assert_eq!(requested, FrameId::new(2));
            }
            other => panic!("expected nesting violation, got {:?}", other.map(|_| ())),
        }

        drop(outer);
        assert_eq!(current(), None);
        let again = ActiveFrame::enter(FrameId::new(2)).unwrap();
        drop(again);
    }
}
