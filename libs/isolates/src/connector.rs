//! Connectors and Channels
//!
//! A connector is the receive side of a named channel on a frame: an
//! [`EventQueue`] plus the handler the frame drains it into. A [`Channel`]
//! is the freely clonable send handle producers hold. Both share one
//! [`Inlet`], which also carries a weak link back to the owning frame so
//! the empty to non-empty transition can wake it.

use parking_lot::Mutex;
use std::any::{type_name, Any};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use crate::context::Context;
use crate::error::{IsoError, Result};
use crate::isolate::Isolate;
use crate::queue::EventQueue;

/// Connector identifier, unique within one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectorId(u32);

impl ConnectorId {
    /// The isolate's default event connector
    pub const EVENTS: ConnectorId = ConnectorId(0);
    /// The daemon connector carrying runtime control events
    pub const INTERNAL: ConnectorId = ConnectorId(1);

    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Frame callback fired on the empty to non-empty edge of a connector
pub(crate) trait Wake: Send + Sync {
    fn on_pending(self: Arc<Self>, connector: ConnectorId);
}

/// State shared by a connector and every handle to its channel
pub(crate) struct Inlet<T> {
    id: ConnectorId,
    name: Arc<str>,
    daemon: bool,
    queue: EventQueue<T>,
    frame: Weak<dyn Wake>,
}

impl<T: Send + 'static> Inlet<T> {
    pub(crate) fn new(
        id: ConnectorId,
        name: Arc<str>,
        daemon: bool,
        capacity: usize,
        frame: Weak<dyn Wake>,
    ) -> Self {
        Self {
            id,
            name,
            daemon,
            queue: EventQueue::with_capacity(capacity),
            frame,
        }
    }

    fn enqueue(&self, event: T) -> Result<()> {
        match self.queue.push(event) {
            Ok(1) => {
                // Only the producer that made the queue non-empty wakes the frame
                if let Some(frame) = self.frame.upgrade() {
                    frame.on_pending(self.id);
                }
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(_) => Err(IsoError::sealed(&*self.name)),
        }
    }
}

/// Send handle for events of type `T`
pub struct Channel<T> {
    inlet: Arc<Inlet<T>>,
}

impl<T: Send + 'static> Channel<T> {
    pub(crate) fn from_inlet(inlet: Arc<Inlet<T>>) -> Self {
        Self { inlet }
    }

    /// Enqueue an event.
    ///
    /// Fails with [`IsoError::SealedChannel`] once the connector is sealed;
    /// the event is dropped and never buffered.
    pub fn send(&self, event: T) -> Result<()> {
        self.inlet.enqueue(event)
    }

    /// System-wide name, `isolate#channel`
    pub fn name(&self) -> &str {
        &self.inlet.name
    }

    pub fn id(&self) -> ConnectorId {
        self.inlet.id
    }

    pub fn is_sealed(&self) -> bool {
        self.inlet.queue.is_sealed()
    }

    pub fn is_daemon(&self) -> bool {
        self.inlet.daemon
    }

    /// Events buffered and not yet delivered
    pub fn pending(&self) -> usize {
        self.inlet.queue.len()
    }

    /// Type-erased handle for the registry
    pub fn erase(&self) -> AnyChannel {
        AnyChannel {
            inner: self.inlet.clone(),
        }
    }

    /// A channel with no frame behind it; sends only buffer
    #[cfg(test)]
    pub(crate) fn detached(name: &str) -> Self {
        struct NoFrame;
        impl Wake for NoFrame {
            fn on_pending(self: Arc<Self>, _connector: ConnectorId) {}
        }
        let frame: Weak<NoFrame> = Weak::new();
        Self::from_inlet(Arc::new(Inlet::new(ConnectorId::EVENTS, Arc::from(name), false, 0, frame)))
    }

    #[cfg(test)]
    pub(crate) fn seal(&self) -> bool {
        self.inlet.queue.seal()
    }

    /// Whether both handles point at the same connector
    pub fn same_channel(&self, other: &Channel<T>) -> bool {
        Arc::ptr_eq(&self.inlet, &other.inlet)
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inlet: self.inlet.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inlet.name)
            .field("id", &self.inlet.id)
            .field("sealed", &self.inlet.queue.is_sealed())
            .finish()
    }
}

trait ErasedInlet: Send + Sync {
    fn name(&self) -> &str;
    fn is_sealed(&self) -> bool;
    fn is_daemon(&self) -> bool;
    fn event_type(&self) -> &'static str;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + 'static> ErasedInlet for Inlet<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_sealed(&self) -> bool {
        self.queue.is_sealed()
    }

    fn is_daemon(&self) -> bool {
        self.daemon
    }

    fn event_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Channel handle with the event type erased, as stored in the registry
#[derive(Clone)]
pub struct AnyChannel {
    inner: Arc<dyn ErasedInlet>,
}

impl AnyChannel {
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.is_sealed()
    }

    pub fn is_daemon(&self) -> bool {
        self.inner.is_daemon()
    }

    /// Type name of the events this channel carries
    pub fn event_type(&self) -> &'static str {
        self.inner.event_type()
    }

    /// Recover the typed send handle
    pub fn downcast<T: Send + 'static>(&self) -> Result<Channel<T>> {
        self.inner
            .clone()
            .into_any()
            .downcast::<Inlet<T>>()
            .map(Channel::from_inlet)
            .map_err(|_| IsoError::type_mismatch(self.name(), type_name::<T>()))
    }
}

impl fmt::Debug for AnyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyChannel")
            .field("name", &self.name())
            .field("event_type", &self.event_type())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

/// Result of delivering one event
pub(crate) struct Delivery {
    pub outcome: Result<()>,
    /// Events left in the queue after the pop
    pub remaining: usize,
}

/// Receive side of a connector as seen by the frame, with the event type erased
pub(crate) trait Port<I: Isolate>: Send + Sync {
    fn id(&self) -> ConnectorId;
    fn name(&self) -> &str;
    fn local_name(&self) -> &str;
    fn is_daemon(&self) -> bool;
    fn is_sealed(&self) -> bool;
    fn seal(&self) -> bool;
    fn clear(&self) -> usize;
    fn pending(&self) -> usize;
    fn channel(&self) -> AnyChannel;

    /// Pop one event and run the handler on it. `None` when the queue is empty.
    fn deliver_one(&self, isolate: &mut I, ctx: &mut Context<'_, I>) -> Option<Delivery>;
}

type Handler<I, T> = Box<dyn FnMut(&mut I, &mut Context<'_, I>, T) -> Result<()> + Send>;

pub(crate) struct Connector<I: Isolate, T> {
    inlet: Arc<Inlet<T>>,
    local_name: String,
    // Only the frame's executing batch touches the handler
    handler: Mutex<Handler<I, T>>,
}

impl<I, T> Connector<I, T>
where
    I: Isolate,
    T: Send + 'static,
{
    pub(crate) fn new<F>(inlet: Arc<Inlet<T>>, local_name: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(&mut I, &mut Context<'_, I>, T) -> Result<()> + Send + 'static,
    {
        Self {
            inlet,
            local_name: local_name.into(),
            handler: Mutex::new(Box::new(handler)),
        }
    }
}

impl<I, T> Port<I> for Connector<I, T>
where
    I: Isolate,
    T: Send + 'static,
{
    fn id(&self) -> ConnectorId {
        self.inlet.id
    }

    fn name(&self) -> &str {
        &self.inlet.name
    }

    fn local_name(&self) -> &str {
        &self.local_name
    }

    fn is_daemon(&self) -> bool {
        self.inlet.daemon
    }

    fn is_sealed(&self) -> bool {
        self.inlet.queue.is_sealed()
    }

    fn seal(&self) -> bool {
        self.inlet.queue.seal()
    }

    fn clear(&self) -> usize {
        self.inlet.queue.clear()
    }

    fn pending(&self) -> usize {
        self.inlet.queue.len()
    }

    fn channel(&self) -> AnyChannel {
        AnyChannel {
            inner: self.inlet.clone(),
        }
    }

    fn deliver_one(&self, isolate: &mut I, ctx: &mut Context<'_, I>) -> Option<Delivery> {
        let (event, remaining) = self.inlet.queue.pop()?;
        let mut guard = self.handler.lock();
        let handler = &mut **guard;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(isolate, ctx, event)))
            .unwrap_or_else(|payload| Err(IsoError::panicked(payload.as_ref())));
        Some(Delivery { outcome, remaining })
    }
}
