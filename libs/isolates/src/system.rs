//! Isolate System
//!
//! Process-wide registry of isolates: owns the scheduler bundle and the
//! channel directory, hands out unique names and ids, creates frames and
//! tears them down.
//!
//! # Lock Ordering
//!
//! The system's locks (`names`, `frames`, the channel directory) are never
//! held together and never held while calling into a frame. A frame calls
//! back into the system only after releasing its own monitor.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use iso_config::{service, IsoConfig};

use crate::bundle::Bundle;
use crate::connector::Channel;
use crate::delta::{Delta, DeltaKind, DeltaStream};
use crate::error::{IsoError, Result};
use crate::frame::{self, Frame, FrameControl, FrameId, FrameInfo, FrameStatus};
use crate::isolate::{Isolate, SupervisorDirective};
use crate::metrics::SystemMetrics;
use crate::prototype::{FrameOptions, Prototype};

/// Receives isolate failures the isolate itself escalated
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, frame: &FrameInfo, error: &IsoError) -> SupervisorDirective;
}

/// Default handler: log the failure and keep the isolate running
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAndResume;

impl ErrorHandler for LogAndResume {
    fn handle(&self, frame: &FrameInfo, error: &IsoError) -> SupervisorDirective {
        error!(frame = %frame.name, frame_id = %frame.id, error = %error, "Unhandled isolate error");
        SupervisorDirective::Resume
    }
}

impl<F> ErrorHandler for F
where
    F: Fn(&FrameInfo, &IsoError) -> SupervisorDirective + Send + Sync,
{
    fn handle(&self, frame: &FrameInfo, error: &IsoError) -> SupervisorDirective {
        self(frame, error)
    }
}

#[derive(Default)]
struct NameStore {
    used: HashSet<String>,
    counter: u64,
}

struct SystemInner {
    id: String,
    bundle: Bundle,
    channels: crate::registry::Channels,
    names: Mutex<NameStore>,
    next_id: AtomicU64,
    frames: Mutex<HashMap<FrameId, Arc<dyn FrameControl>>>,
    drained: Condvar,
    deltas: DeltaStream,
    error_handler: Arc<dyn ErrorHandler>,
    frame_defaults: FrameOptions,
    metrics: SystemMetrics,
}

/// Handle to an isolate system; clones share the same system
#[derive(Clone)]
pub struct IsoSystem {
    inner: Arc<SystemInner>,
}

impl IsoSystem {
    /// System with the standard scheduler bundle
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> IsoSystemBuilder {
        IsoSystemBuilder::default()
    }

    /// System configured from loaded settings
    pub fn from_config(config: &IsoConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| IsoError::configuration(format!("{e:#}"), None))?;

        Self::builder()
            .bundle(Bundle::from_settings(config)?)
            .frame_defaults(FrameOptions::from(&config.frame))
            .delta_capacity(config.runtime.delta_capacity)
            .build()
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Create an isolate and return its default channel.
    ///
    /// The scheduler is `scheduler`, else the prototype's request, else the
    /// bundle default. Nothing is registered when this fails. The isolate
    /// object itself is built on the frame's first batch.
    pub fn create_isolate<P>(
        &self,
        prototype: P,
        scheduler: Option<&str>,
    ) -> Result<Channel<<P::Isolate as Isolate>::Event>>
    where
        P: Prototype,
    {
        let scheduler = self.inner.bundle.resolve(scheduler.or(prototype.scheduler()))?;
        let name = self.unique_name(prototype.name())?;
        let options = prototype.options().unwrap_or(self.inner.frame_defaults);
        let info = FrameInfo::new(self.unique_id(), name);

        let frame = Frame::new(info.clone(), self.clone(), scheduler.clone(), options, prototype);
        self.inner.frames.lock().insert(info.id, frame.clone());
        scheduler.attach(&info);

        // Producers can only reach the frame once its channels are registered
        if let Err(error) = self.register_builtin(&frame) {
            self.inner.frames.lock().remove(&info.id);
            scheduler.detach(info.id);
            self.inner.names.lock().used.remove(&*info.name);
            return Err(error);
        }
        self.inner.metrics.record_created();
        info!(
            isolate = %info.name,
            isolate_id = %info.id,
            scheduler = %scheduler.name(),
            system_id = %self.inner.id,
            "Isolate created"
        );

        let events = frame.default_channel();
        frame.schedule_for_execution();
        Ok(events)
    }

    fn register_builtin<I: Isolate>(&self, frame: &Arc<Frame<I>>) -> Result<()> {
        let events = frame.default_channel();
        let internal = frame.internal_channel();

        self.inner.channels.register(events.name(), events.erase())?;
        if let Err(error) = self.inner.channels.register(internal.name(), internal.erase()) {
            self.inner.channels.remove(events.name());
            return Err(error);
        }

        for (name, id) in [(events.name(), events.id()), (internal.name(), internal.id())] {
            self.publish(Delta::new(DeltaKind::Open, name, u64::from(id.as_u32())));
        }
        Ok(())
    }

    /// Reserve an isolate name, synthesising one when `proposed` is `None`
    pub fn unique_name(&self, proposed: Option<&str>) -> Result<String> {
        let mut names = self.inner.names.lock();
        match proposed {
            Some(name) => {
                frame::validate_name(name)?;
                if !names.used.insert(name.to_string()) {
                    return Err(IsoError::name_conflict(name));
                }
                Ok(name.to_string())
            }
            None => loop {
                names.counter += 1;
                let candidate = format!(
                    "{}-{}",
                    service::channels::SYNTHETIC_PREFIX,
                    names.counter
                );
                if names.used.insert(candidate.clone()) {
                    return Ok(candidate);
                }
            },
        }
    }

    /// Next frame id; ids are never reused
    pub fn unique_id(&self) -> FrameId {
        FrameId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Drop every `isolate#...` channel registration, then free the
    /// isolate name for reuse
    pub fn release_names(&self, isolate: &str) {
        let removed = self.inner.channels.remove_for_isolate(isolate);
        self.inner.names.lock().used.remove(isolate);
        debug!(isolate, removed, "Names released");
    }

    pub(crate) fn release_frame(&self, info: &FrameInfo) {
        self.release_names(&info.name);
        let mut frames = self.inner.frames.lock();
        frames.remove(&info.id);
        if frames.is_empty() {
            self.inner.drained.notify_all();
        }
    }

    pub(crate) fn escalate(&self, frame: &FrameInfo, error: &IsoError) -> SupervisorDirective {
        self.inner.error_handler.handle(frame, error)
    }

    pub(crate) fn publish(&self, delta: Delta) {
        self.inner.deltas.publish(delta);
    }

    /// Ask a live isolate to terminate; `false` when no such isolate is live
    pub fn terminate(&self, isolate: &str) -> bool {
        let frame = self
            .inner
            .frames
            .lock()
            .values()
            .find(|frame| &*frame.info().name == isolate)
            .cloned();
        match frame {
            Some(frame) => frame.request_termination(),
            None => false,
        }
    }

    /// Live isolates, ordered by id
    pub fn live_isolates(&self) -> Vec<FrameInfo> {
        let mut live: Vec<FrameInfo> = self
            .inner
            .frames
            .lock()
            .values()
            .map(|frame| frame.info().clone())
            .collect();
        live.sort_by_key(|info| info.id);
        live
    }

    pub fn frame_status(&self, isolate: &str) -> Option<FrameStatus> {
        let frame = self
            .inner
            .frames
            .lock()
            .values()
            .find(|frame| &*frame.info().name == isolate)
            .cloned()?;
        Some(frame.status())
    }

    /// Whether an isolate name is currently reserved
    pub fn is_name_used(&self, name: &str) -> bool {
        self.inner.names.lock().used.contains(name)
    }

    pub fn channels(&self) -> &crate::registry::Channels {
        &self.inner.channels
    }

    pub fn bundle(&self) -> &Bundle {
        &self.inner.bundle
    }

    pub fn metrics(&self) -> &SystemMetrics {
        &self.inner.metrics
    }

    /// Subscribe to lifecycle deltas from now on
    pub fn deltas(&self) -> broadcast::Receiver<Delta> {
        self.inner.deltas.subscribe()
    }

    /// Terminate every isolate, wait up to `timeout` for them to finish,
    /// then close the registry and stop the schedulers.
    ///
    /// Returns `false` if some isolate was still live at the deadline.
    /// Must not be called from inside an isolate handler.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let frames: Vec<Arc<dyn FrameControl>> =
            self.inner.frames.lock().values().cloned().collect();
        info!(system_id = %self.inner.id, isolates = frames.len(), "Shutting down isolate system");

        for frame in &frames {
            if !frame.request_termination() {
                debug!(frame = %frame.info().name, "Frame already terminating");
            }
        }
        drop(frames);

        let deadline = Instant::now() + timeout;
        let remaining = {
            let mut frames = self.inner.frames.lock();
            while !frames.is_empty() {
                if self.inner.drained.wait_until(&mut frames, deadline).timed_out() {
                    break;
                }
            }
            frames.len()
        };

        if remaining > 0 {
            warn!(system_id = %self.inner.id, remaining, "Isolates still live after shutdown timeout");
        }

        self.inner.channels.close();
        self.inner.bundle.shutdown();
        info!(system_id = %self.inner.id, metrics = ?self.inner.metrics.snapshot(), "Isolate system stopped");
        remaining == 0
    }
}

impl fmt::Debug for IsoSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsoSystem")
            .field("id", &self.inner.id)
            .field("bundle", &self.inner.bundle)
            .field("isolates", &self.inner.frames.lock().len())
            .field("channels", &self.inner.channels.len())
            .finish()
    }
}

pub struct IsoSystemBuilder {
    bundle: Option<Bundle>,
    error_handler: Arc<dyn ErrorHandler>,
    frame_defaults: FrameOptions,
    delta_capacity: usize,
}

impl Default for IsoSystemBuilder {
    fn default() -> Self {
        Self {
            bundle: None,
            error_handler: Arc::new(LogAndResume),
            frame_defaults: FrameOptions::default(),
            delta_capacity: service::deltas::CAPACITY,
        }
    }
}

impl IsoSystemBuilder {
    pub fn bundle(mut self, bundle: Bundle) -> Self {
        self.bundle = Some(bundle);
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn frame_defaults(mut self, options: FrameOptions) -> Self {
        self.frame_defaults = options;
        self
    }

    pub fn delta_capacity(mut self, capacity: usize) -> Self {
        self.delta_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<IsoSystem> {
        let bundle = match self.bundle {
            Some(bundle) => bundle,
            None => Bundle::standard()?,
        };

        let id = format!("system-{}", Uuid::new_v4().simple());
        debug!(system_id = %id, schedulers = ?bundle.names(), "Isolate system created");

        Ok(IsoSystem {
            inner: Arc::new(SystemInner {
                id,
                bundle,
                channels: crate::registry::Channels::new(),
                names: Mutex::new(NameStore::default()),
                next_id: AtomicU64::new(0),
                frames: Mutex::new(HashMap::new()),
                drained: Condvar::new(),
                deltas: DeltaStream::new(self.delta_capacity),
                error_handler: self.error_handler,
                frame_defaults: self.frame_defaults,
                metrics: SystemMetrics::default(),
            }),
        })
    }
}
