//! Prototypes
//!
//! A prototype is the recipe `IsoSystem::create_isolate` consumes: it builds
//! the isolate inside its new frame and may request a name, a scheduler and
//! frame tuning.

use std::fmt;
use std::marker::PhantomData;

use iso_config::{service, FrameSettings};

use crate::context::Context;
use crate::error::Result;
use crate::isolate::Isolate;

/// Factory for one isolate instance
pub trait Prototype: Send + 'static {
    type Isolate: Isolate;

    /// Construct the isolate. Runs lazily on the frame's first batch, so
    /// `ctx` may already be used to open channels.
    fn build(self, ctx: &mut Context<'_, Self::Isolate>) -> Result<Self::Isolate>;

    /// Requested isolate name; a unique one is synthesised when absent
    fn name(&self) -> Option<&str> {
        None
    }

    /// Requested scheduler; the bundle default is used when absent
    fn scheduler(&self) -> Option<&str> {
        None
    }

    /// Frame tuning; the system defaults are used when absent
    fn options(&self) -> Option<FrameOptions> {
        None
    }
}

/// Per-frame execution tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    /// Events taken from one connector before rotating to the next
    pub quantum: usize,
    /// Events delivered per batch before the frame yields its thread
    pub batch_limit: usize,
    /// Initial per-connector queue allocation
    pub queue_capacity: usize,
}

impl FrameOptions {
    pub fn with_quantum(mut self, quantum: usize) -> Self {
        self.quantum = quantum.max(1);
        self
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            quantum: service::frame::QUANTUM,
            batch_limit: service::frame::BATCH_LIMIT,
            queue_capacity: service::frame::QUEUE_CAPACITY,
        }
    }
}

impl From<&FrameSettings> for FrameOptions {
    fn from(settings: &FrameSettings) -> Self {
        Self::default()
            .with_quantum(settings.quantum)
            .with_batch_limit(settings.batch_limit)
            .with_queue_capacity(settings.queue_capacity)
    }
}

/// Prototype backed by a closure, see [`from_fn`]
pub struct FnPrototype<I, F> {
    build: F,
    name: Option<String>,
    scheduler: Option<String>,
    options: Option<FrameOptions>,
    _isolate: PhantomData<fn() -> I>,
}

/// Build an isolate from a closure run inside the new frame
///
/// ```ignore
/// let proto = prototype::from_fn(|_ctx| Ok(Counter::default()))
///     .named("counter")
///     .on_scheduler("dedicated");
/// ```
pub fn from_fn<I, F>(build: F) -> FnPrototype<I, F>
where
    I: Isolate,
    F: FnOnce(&mut Context<'_, I>) -> Result<I> + Send + 'static,
{
    FnPrototype {
        build,
        name: None,
        scheduler: None,
        options: None,
        _isolate: PhantomData,
    }
}

/// Prototype that hands over an already constructed isolate
pub fn instance<I: Isolate>(isolate: I) -> FnPrototype<I, impl FnOnce(&mut Context<'_, I>) -> Result<I> + Send + 'static> {
    from_fn(move |_ctx: &mut Context<'_, I>| Ok(isolate))
}

impl<I, F> FnPrototype<I, F> {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn on_scheduler(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = Some(scheduler.into());
        self
    }

    pub fn with_options(mut self, options: FrameOptions) -> Self {
        self.options = Some(options);
        self
    }
}

impl<I, F> Prototype for FnPrototype<I, F>
where
    I: Isolate,
    F: FnOnce(&mut Context<'_, I>) -> Result<I> + Send + 'static,
{
    type Isolate = I;

    fn build(self, ctx: &mut Context<'_, I>) -> Result<I> {
        (self.build)(ctx)
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn scheduler(&self) -> Option<&str> {
        self.scheduler.as_deref()
    }

    fn options(&self) -> Option<FrameOptions> {
        self.options
    }
}

impl<I, F> fmt::Debug for FnPrototype<I, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPrototype")
            .field("name", &self.name)
            .field("scheduler", &self.scheduler)
            .field("options", &self.options)
            .finish()
    }
}
