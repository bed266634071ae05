//! Execution context
//!
//! A [`Context`] is handed to every isolate callback. It exists only while
//! the isolate's frame is executing on the current thread and is the sole
//! way isolate code reaches its frame and the system.

use std::sync::Arc;
use tracing::debug;

use crate::connector::Channel;
use crate::error::{IsoError, Result};
use crate::frame::{Frame, FrameId, FrameInfo};
use crate::isolate::{Isolate, SystemEvent};
use crate::system::IsoSystem;

pub struct Context<'a, I: Isolate> {
    frame: &'a Arc<Frame<I>>,
    stop: bool,
    failure: Option<IsoError>,
}

impl<'a, I: Isolate> Context<'a, I> {
    pub(crate) fn new(frame: &'a Arc<Frame<I>>) -> Self {
        Self {
            frame,
            stop: false,
            failure: None,
        }
    }

    pub fn id(&self) -> FrameId {
        self.frame.info().id
    }

    /// Isolate name
    pub fn name(&self) -> &str {
        &self.frame.info().name
    }

    pub fn info(&self) -> &FrameInfo {
        self.frame.info()
    }

    pub fn system(&self) -> &IsoSystem {
        self.frame.system()
    }

    /// This isolate's default channel
    pub fn events(&self) -> Channel<I::Event> {
        self.frame.default_channel()
    }

    /// Open a channel named `isolate#name`, registered system-wide.
    ///
    /// Events sent on it are delivered to `handler`. An open non-daemon
    /// channel keeps the isolate alive.
    pub fn open_channel<T, F>(&self, name: &str, handler: F) -> Result<Channel<T>>
    where
        T: Send + 'static,
        F: FnMut(&mut I, &mut Context<'_, I>, T) -> Result<()> + Send + 'static,
    {
        self.frame.open_connector(name, false, handler)
    }

    /// Like [`open_channel`](Self::open_channel), but the channel does not
    /// keep the isolate alive on its own
    pub fn open_daemon_channel<T, F>(&self, name: &str, handler: F) -> Result<Channel<T>>
    where
        T: Send + 'static,
        F: FnMut(&mut I, &mut Context<'_, I>, T) -> Result<()> + Send + 'static,
    {
        self.frame.open_connector(name, true, handler)
    }

    /// Typed handle to one of this isolate's channels by local name
    pub fn channel<T: Send + 'static>(&self, name: &str) -> Result<Channel<T>> {
        self.frame.local_channel(name)?.downcast()
    }

    /// Seal one of this isolate's channels; later sends fail
    pub fn seal(&self, name: &str) -> Result<()> {
        self.frame.seal(name)
    }

    /// Terminate the isolate once the current callback returns
    pub fn terminate(&mut self) {
        self.stop = true;
    }

    pub fn is_terminating(&self) -> bool {
        self.stop
    }

    pub(crate) fn fail(&mut self, error: IsoError) {
        self.stop = true;
        self.failure.get_or_insert(error);
    }

    pub(crate) fn take_failure(&mut self) -> Option<IsoError> {
        self.failure.take()
    }

    pub(crate) fn handle_system(&mut self, event: SystemEvent) -> Result<()> {
        debug!(frame = %self.name(), ?event, "System event");
        match event {
            SystemEvent::Terminate => {
                self.terminate();
                Ok(())
            }
            SystemEvent::Seal(name) => self.seal(&name),
        }
    }
}
