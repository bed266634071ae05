//! Isolate behaviour
//!
//! An isolate is private state plus handlers. The runtime guarantees that
//! at most one handler of a given isolate runs at any time, so handlers
//! take `&mut self` and need no locking of their own.

use crate::context::Context;
use crate::error::{IsoError, Result};

/// Behaviour of one isolate
pub trait Isolate: Send + Sized + 'static {
    /// Events accepted on the default `events` channel
    type Event: Send + 'static;

    /// Handle one event from the default channel
    fn on_event(&mut self, ctx: &mut Context<'_, Self>, event: Self::Event) -> Result<()>;

    /// Called once after the isolate is built, before any event
    fn on_start(&mut self, _ctx: &mut Context<'_, Self>) -> Result<()> {
        Ok(())
    }

    /// Called once on termination, after every connector is sealed
    fn on_stop(&mut self, _ctx: &mut Context<'_, Self>) {}

    /// Decide what happens after a handler failed or panicked
    fn on_error(&mut self, _ctx: &mut Context<'_, Self>, _error: &IsoError) -> SupervisorDirective {
        SupervisorDirective::Escalate
    }
}

/// Supervision decision for a failed handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorDirective {
    /// Drop the failed event and continue with the next one
    Resume,
    /// Terminate the isolate
    Stop,
    /// Defer to the system error handler
    Escalate,
}

/// Control events carried by every isolate's `internal` daemon channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    /// Terminate the isolate after the current event
    Terminate,
    /// Seal the named local channel
    Seal(String),
}
