//! Frames
//!
//! A frame is the execution context of one isolate. It owns the isolate's
//! connectors, its lifecycle state and the `executing` flag that keeps at
//! most one batch of that isolate in flight.
//!
//! # Scheduling protocol
//!
//! 1. A producer pushes into a connector queue. Only the push that makes
//!    the queue non-empty calls back into the frame.
//! 2. Under the monitor, the frame appends the connector to its pending
//!    queue and, if `executing` was false, sets it and submits itself to
//!    its scheduler. Concurrent producers therefore cause exactly one
//!    submission per idle to busy edge.
//! 3. The scheduler calls [`Frame::execute_batch`], which drains pending
//!    connectors round-robin, then re-checks the pending queue under the
//!    monitor: either it re-submits (keeping `executing` set) or it clears
//!    `executing`. The re-check runs on every exit path, panics included.
//!
//! The monitor is only held for this bookkeeping, never while isolate code
//! runs.
//!
//! # Lifecycle
//!
//! `Fresh` until the first batch builds the isolate, then `Running`, then
//! `Terminated`. Transitions only move forward.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use iso_config::service::channels;

use crate::active::{self, ActiveFrame};
use crate::connector::{AnyChannel, Channel, Connector, ConnectorId, Inlet, Wake};
use crate::context::Context;
use crate::delta::{Delta, DeltaKind};
use crate::error::{IsoError, Result};
use crate::isolate::{Isolate, SupervisorDirective, SystemEvent};
use crate::multiplexer::{Multiplexer, PendingQueue};
use crate::prototype::{FrameOptions, Prototype};
use crate::scheduler::{BatchOutcome, Runnable, Scheduler};
use crate::system::IsoSystem;

/// Process-unique frame identifier, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(u64);

impl FrameId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a frame, cheap to clone into logs and schedulers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub id: FrameId,
    pub name: Arc<str>,
}

impl FrameInfo {
    pub fn new(id: FrameId, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Frame lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    /// Constructed; the isolate object is not built yet
    Fresh,
    /// Isolate built and processing events
    Running,
    /// No further events are processed; connectors are sealed
    Terminated,
}

/// Point-in-time view of a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStatus {
    pub info: FrameInfo,
    pub lifecycle: Lifecycle,
    pub executing: bool,
    /// Connectors queued for service
    pub pending: usize,
    pub connectors: usize,
}

/// Full registry name of a frame's channel
pub(crate) fn connector_name(isolate: &str, local: &str) -> Arc<str> {
    Arc::from(format!("{isolate}{}{local}", channels::SEPARATOR))
}

/// Isolate and channel names must be non-empty and free of the separator
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(IsoError::invalid_name(name, "name cannot be empty"));
    }
    if name.contains(channels::SEPARATOR) {
        return Err(IsoError::invalid_name(
            name,
            format!("name cannot contain '{}'", channels::SEPARATOR),
        ));
    }
    Ok(())
}

type Builder<I> = Box<dyn FnOnce(&mut Context<'_, I>) -> Result<I> + Send>;

/// Monitor-guarded frame state
struct FrameState<I: Isolate> {
    lifecycle: Lifecycle,
    executing: bool,
    pending: PendingQueue,
    builder: Option<Builder<I>>,
    local_names: HashSet<String>,
    next_connector: u32,
}

pub struct Frame<I: Isolate> {
    info: FrameInfo,
    system: IsoSystem,
    scheduler: Arc<dyn Scheduler>,
    options: FrameOptions,
    multiplexer: Multiplexer<I>,
    monitor: Mutex<FrameState<I>>,
    // Parked between batches; taken out while a batch runs
    isolate: Mutex<Option<I>>,
    events: Channel<I::Event>,
    internal: Channel<SystemEvent>,
}

impl<I: Isolate> Frame<I> {
    pub(crate) fn new<P>(
        info: FrameInfo,
        system: IsoSystem,
        scheduler: Arc<dyn Scheduler>,
        options: FrameOptions,
        prototype: P,
    ) -> Arc<Self>
    where
        P: Prototype<Isolate = I>,
    {
        let builder: Builder<I> = Box::new(move |ctx: &mut Context<'_, I>| prototype.build(ctx));

        Arc::new_cyclic(|weak: &Weak<Self>| {
            let wake: Weak<dyn Wake> = weak.clone();
            let events_inlet = Arc::new(Inlet::new(
                ConnectorId::EVENTS,
                connector_name(&info.name, channels::EVENTS),
                false,
                options.queue_capacity,
                wake.clone(),
            ));
            let internal_inlet = Arc::new(Inlet::new(
                ConnectorId::INTERNAL,
                connector_name(&info.name, channels::INTERNAL),
                true,
                0,
                wake,
            ));

            let multiplexer = Multiplexer::new(options.quantum);
            multiplexer.add(Arc::new(Connector::new(
                events_inlet.clone(),
                channels::EVENTS,
                |isolate: &mut I, ctx: &mut Context<'_, I>, event: I::Event| {
                    isolate.on_event(ctx, event)
                },
            )));
            multiplexer.add(Arc::new(Connector::new(
                internal_inlet.clone(),
                channels::INTERNAL,
                |_isolate: &mut I, ctx: &mut Context<'_, I>, event: SystemEvent| {
                    ctx.handle_system(event)
                },
            )));

            let local_names = [channels::EVENTS, channels::INTERNAL]
                .into_iter()
                .map(str::to_string)
                .collect();

            Frame {
                info,
                system,
                scheduler,
                options,
                multiplexer,
                monitor: Mutex::new(FrameState {
                    lifecycle: Lifecycle::Fresh,
                    executing: false,
                    pending: PendingQueue::default(),
                    builder: Some(builder),
                    local_names,
                    next_connector: ConnectorId::INTERNAL.as_u32() + 1,
                }),
                isolate: Mutex::new(None),
                events: Channel::from_inlet(events_inlet),
                internal: Channel::from_inlet(internal_inlet),
            }
        })
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    pub fn system(&self) -> &IsoSystem {
        &self.system
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn default_channel(&self) -> Channel<I::Event> {
        self.events.clone()
    }

    pub fn internal_channel(&self) -> Channel<SystemEvent> {
        self.internal.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.monitor.lock().lifecycle
    }

    pub fn is_executing(&self) -> bool {
        self.monitor.lock().executing
    }

    pub fn has_pending_events(&self) -> bool {
        !self.monitor.lock().pending.is_empty()
    }

    pub fn has_terminated(&self) -> bool {
        self.monitor.lock().lifecycle == Lifecycle::Terminated
    }

    /// Request a batch. Only the caller that flips `executing` from false
    /// to true submits; returns whether this call submitted.
    pub fn schedule_for_execution(self: &Arc<Self>) -> bool {
        let won = {
            let mut state = self.monitor.lock();
            if state.executing || state.lifecycle == Lifecycle::Terminated {
                false
            } else {
                state.executing = true;
                true
            }
        };
        if won {
            self.submit();
        }
        won
    }

    fn submit(self: &Arc<Self>) {
        self.system.metrics().record_submission();
        self.scheduler.schedule(self.clone());
    }

    /// Scheduler entry point: run one batch.
    ///
    /// Rejected with [`IsoError::NestedExecution`] when another frame is
    /// already executing on this thread; the frame is left untouched.
    pub fn execute_batch(self: &Arc<Self>) -> Result<BatchOutcome> {
        let guard = ActiveFrame::enter(self.info.id)?;

        if !self.monitor.lock().executing {
            return Err(IsoError::scheduler(
                self.scheduler.name(),
                format!("frame '{}' ran without a scheduling request", self.info.name),
            ));
        }

        self.system.metrics().record_batch();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.run_batch())) {
            let error = IsoError::panicked(payload.as_ref());
            error!(frame = %self.info.name, frame_id = %self.info.id, error = %error, "Batch aborted");
            self.system.metrics().record_handler_failure();
            // The isolate unwound with the batch stack
            self.terminate(None, Some(error));
        }

        let outcome = self.finish_batch();
        drop(guard);

        if outcome == BatchOutcome::Resubmitted {
            self.submit();
        }
        active::drain_deferred();
        Ok(outcome)
    }

    fn finish_batch(&self) -> BatchOutcome {
        let mut state = self.monitor.lock();
        if state.lifecycle == Lifecycle::Terminated {
            state.executing = false;
            BatchOutcome::Terminated
        } else if state.pending.is_empty() {
            state.executing = false;
            BatchOutcome::Idle
        } else {
            BatchOutcome::Resubmitted
        }
    }

    fn run_batch(self: &Arc<Self>) {
        let mut ctx = Context::new(self);
        let parked = self.isolate.lock().take();
        let mut isolate = match parked {
            Some(isolate) => isolate,
            None => match self.start(&mut ctx) {
                Some(isolate) => isolate,
                None => return,
            },
        };

        if !ctx.is_terminating() {
            let delivered = self.drain(&mut isolate, &mut ctx);
            self.system.metrics().record_delivered(delivered);
        }

        if !ctx.is_terminating() && self.multiplexer.is_orphaned() {
            debug!(frame = %self.info.name, "No open non-daemon channel left");
            ctx.terminate();
        }

        if ctx.is_terminating() {
            let failure = ctx.take_failure();
            self.terminate(Some(&mut isolate), failure);
        } else {
            *self.isolate.lock() = Some(isolate);
        }
    }

    /// Fresh to Running: build the isolate exactly once
    fn start(self: &Arc<Self>, ctx: &mut Context<'_, I>) -> Option<I> {
        let builder = {
            let mut state = self.monitor.lock();
            if state.lifecycle != Lifecycle::Fresh {
                return None;
            }
            state.builder.take()
        }?;

        match builder(ctx) {
            Ok(mut isolate) => {
                self.monitor.lock().lifecycle = Lifecycle::Running;
                self.system
                    .publish(Delta::new(DeltaKind::Start, &self.info.name, self.info.id.as_u64()));
                info!(
                    frame = %self.info.name,
                    frame_id = %self.info.id,
                    scheduler = %self.scheduler.name(),
                    "Isolate started"
                );
                if let Err(error) = isolate.on_start(ctx) {
                    self.handle_failure(&mut isolate, ctx, channels::EVENTS, error);
                }
                Some(isolate)
            }
            Err(error) => {
                error!(frame = %self.info.name, error = %error, "Isolate construction failed");
                self.system.metrics().record_handler_failure();
                let _ = self.system.escalate(&self.info, &error);
                self.terminate(None, Some(error));
                None
            }
        }
    }

    /// Deliver pending events round-robin; returns the number delivered
    fn drain(&self, isolate: &mut I, ctx: &mut Context<'_, I>) -> usize {
        let quantum = self.multiplexer.quantum();
        let limit = self.options.batch_limit.max(1);
        let mut delivered = 0;

        while delivered < limit && !ctx.is_terminating() {
            let Some(id) = self.monitor.lock().pending.next() else {
                break;
            };
            let Some(port) = self.multiplexer.port(id) else {
                continue;
            };

            let mut served = 0;
            let mut remaining = 0;
            while served < quantum && delivered < limit {
                let Some(delivery) = port.deliver_one(isolate, ctx) else {
                    remaining = 0;
                    break;
                };
                served += 1;
                delivered += 1;
                remaining = delivery.remaining;

                if let Err(error) = delivery.outcome {
                    self.handle_failure(isolate, ctx, port.name(), error);
                }
                if remaining == 0 || ctx.is_terminating() {
                    break;
                }
            }

            // The pop that saw `remaining` happened with the queue lock held,
            // so no producer observed an empty queue since then
            if remaining > 0 {
                self.monitor.lock().pending.requeue(id);
            }
        }

        delivered
    }

    fn handle_failure(&self, isolate: &mut I, ctx: &mut Context<'_, I>, channel: &str, error: IsoError) {
        self.system.metrics().record_handler_failure();
        warn!(frame = %self.info.name, channel, error = %error, "Handler failed");

        let directive = panic::catch_unwind(AssertUnwindSafe(|| isolate.on_error(ctx, &error)))
            .unwrap_or(SupervisorDirective::Escalate);
        let directive = match directive {
            SupervisorDirective::Escalate => self.system.escalate(&self.info, &error),
            decided => decided,
        };

        match directive {
            SupervisorDirective::Resume => {}
            SupervisorDirective::Stop | SupervisorDirective::Escalate => ctx.fail(error),
        }
    }

    /// Move to `Terminated`: seal and empty every connector, run `on_stop`,
    /// release names and leave the scheduler. Runs at most once.
    fn terminate(self: &Arc<Self>, isolate: Option<&mut I>, failure: Option<IsoError>) {
        let ports = self.multiplexer.ports();
        let (builder, sealed) = {
            let mut state = self.monitor.lock();
            if state.lifecycle == Lifecycle::Terminated {
                return;
            }
            // Sealed before `Terminated` is visible, so no send succeeds after it
            let sealed: Vec<bool> = ports.iter().map(|port| port.seal()).collect();
            state.lifecycle = Lifecycle::Terminated;
            state.pending.clear();
            (state.builder.take(), sealed)
        };
        drop(builder);

        let mut dropped = 0;
        for (port, newly_sealed) in ports.iter().zip(sealed) {
            if newly_sealed {
                self.system
                    .publish(Delta::new(DeltaKind::Seal, port.name(), u64::from(port.id().as_u32())));
            }
            dropped += port.clear();
        }

        if let Some(isolate) = isolate {
            let mut ctx = Context::new(self);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| isolate.on_stop(&mut ctx))) {
                warn!(
                    frame = %self.info.name,
                    error = %IsoError::panicked(payload.as_ref()),
                    "on_stop panicked"
                );
            }
        }

        if let Some(error) = &failure {
            self.system.metrics().record_failed();
            self.system
                .publish(Delta::new(DeltaKind::Die, &self.info.name, self.info.id.as_u64()));
            warn!(frame = %self.info.name, frame_id = %self.info.id, error = %error, "Isolate died");
        }

        self.system.release_frame(&self.info);
        self.scheduler.detach(self.info.id);

        self.system
            .publish(Delta::new(DeltaKind::Term, &self.info.name, self.info.id.as_u64()));
        self.system.metrics().record_terminated();
        info!(frame = %self.info.name, frame_id = %self.info.id, dropped, "Isolate terminated");
    }

    pub(crate) fn open_connector<T, F>(self: &Arc<Self>, local: &str, daemon: bool, handler: F) -> Result<Channel<T>>
    where
        T: Send + 'static,
        F: FnMut(&mut I, &mut Context<'_, I>, T) -> Result<()> + Send + 'static,
    {
        validate_name(local)?;
        let full = connector_name(&self.info.name, local);

        let id = {
            let mut state = self.monitor.lock();
            if state.lifecycle == Lifecycle::Terminated {
                return Err(IsoError::terminated(&*self.info.name));
            }
            if !state.local_names.insert(local.to_string()) {
                return Err(IsoError::name_conflict(&*full));
            }
            let id = ConnectorId::new(state.next_connector);
            state.next_connector += 1;
            id
        };

        let frame: Weak<Self> = Arc::downgrade(self);
        let inlet = Arc::new(Inlet::new(id, full.clone(), daemon, self.options.queue_capacity, frame));
        let channel = Channel::from_inlet(inlet.clone());

        // Serviceable before producers can find it by name
        self.multiplexer.add(Arc::new(Connector::new(inlet, local, handler)));
        if let Err(error) = self.system.channels().register(&full, channel.erase()) {
            self.multiplexer.remove(id);
            self.monitor.lock().local_names.remove(local);
            return Err(error);
        }

        self.system
            .publish(Delta::new(DeltaKind::Open, &full, u64::from(id.as_u32())));
        debug!(frame = %self.info.name, channel = %full, daemon, "Channel opened");
        Ok(channel)
    }

    pub(crate) fn local_channel(&self, local: &str) -> Result<AnyChannel> {
        self.multiplexer
            .find(local)
            .map(|port| port.channel())
            .ok_or_else(|| IsoError::unknown_channel(&*connector_name(&self.info.name, local)))
    }

    pub(crate) fn seal(&self, local: &str) -> Result<()> {
        let port = self
            .multiplexer
            .find(local)
            .ok_or_else(|| IsoError::unknown_channel(&*connector_name(&self.info.name, local)))?;
        if port.seal() {
            self.system
                .publish(Delta::new(DeltaKind::Seal, port.name(), u64::from(port.id().as_u32())));
            debug!(frame = %self.info.name, channel = %port.name(), "Channel sealed");
        }
        Ok(())
    }
}

impl<I: Isolate> Wake for Frame<I> {
    fn on_pending(self: Arc<Self>, connector: ConnectorId) {
        let submit = {
            let mut state = self.monitor.lock();
            if state.lifecycle == Lifecycle::Terminated {
                return;
            }
            state.pending.mark(connector);
            !std::mem::replace(&mut state.executing, true)
        };
        if submit {
            self.submit();
        }
    }
}

impl<I: Isolate> Runnable for Frame<I> {
    fn info(&self) -> &FrameInfo {
        &self.info
    }

    fn run(self: Arc<Self>) -> Result<BatchOutcome> {
        self.execute_batch()
    }
}

/// Type-erased control surface the system keeps for every live frame
pub(crate) trait FrameControl: Send + Sync {
    fn info(&self) -> &FrameInfo;
    fn status(&self) -> FrameStatus;
    /// Ask the frame to terminate through its internal channel
    fn request_termination(&self) -> bool;
}

impl<I: Isolate> FrameControl for Frame<I> {
    fn info(&self) -> &FrameInfo {
        &self.info
    }

    fn status(&self) -> FrameStatus {
        let state = self.monitor.lock();
        FrameStatus {
            info: self.info.clone(),
            lifecycle: state.lifecycle,
            executing: state.executing,
            pending: state.pending.len(),
            connectors: self.multiplexer.len(),
        }
    }

    fn request_termination(&self) -> bool {
        self.internal.send(SystemEvent::Terminate).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prototype::{self, FrameOptions};
    use crate::system::IsoSystem;
    use iso_config::service::schedulers;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("worker").is_ok());
        assert!(matches!(validate_name(""), Err(IsoError::InvalidName { .. })));
        assert!(matches!(validate_name("a#b"), Err(IsoError::InvalidName { .. })));
        assert_eq!(&*connector_name("worker", "events"), "worker#events");
    }

    /// Records which channel each event arrived on
    struct Recorder {
        log: Arc<StdMutex<Vec<String>>>,
    }

    impl Isolate for Recorder {
        type Event = u32;

        fn on_event(&mut self, ctx: &mut Context<'_, Self>, burst: u32) -> Result<()> {
            let a = ctx.channel::<u32>("a")?;
            let b = ctx.channel::<u32>("b")?;
            for i in 0..burst {
                a.send(i)?;
                b.send(i)?;
            }
            Ok(())
        }
    }

    fn recorder(log: Arc<StdMutex<Vec<String>>>, quantum: usize) -> impl Prototype<Isolate = Recorder> {
        prototype::from_fn(move |ctx: &mut Context<'_, Recorder>| {
            for name in ["a", "b"] {
                ctx.open_channel(name, move |isolate: &mut Recorder, _ctx: &mut Context<'_, Recorder>, n: u32| {
                    isolate.log.lock().unwrap().push(format!("{name}{n}"));
                    Ok(())
                })?;
            }
            Ok(Recorder { log })
        })
        .named("recorder")
        .on_scheduler(schedulers::PIGGYBACK)
        .with_options(FrameOptions::default().with_quantum(quantum))
    }

    #[test]
    fn test_round_robin_with_quantum() {
        let system = IsoSystem::new().unwrap();
        let log = Arc::new(StdMutex::new(Vec::new()));
        let events = system.create_isolate(recorder(log.clone(), 2), None).unwrap();

        events.send(3).unwrap();

        let order = log.lock().unwrap().clone();
        assert_eq!(order, vec!["a0", "a1", "b0", "b1", "a2", "b2"]);

        let status = system.frame_status("recorder").unwrap();
        assert_eq!(status.lifecycle, Lifecycle::Running);
        assert!(!status.executing);
        assert_eq!(status.pending, 0);
        assert!(system.shutdown(std::time::Duration::from_secs(5)));
    }

    struct Quiet;

    impl Isolate for Quiet {
        type Event = u64;

        fn on_event(&mut self, _ctx: &mut Context<'_, Self>, _event: u64) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_no_send_succeeds_once_terminated() {
        let system = IsoSystem::new().unwrap();
        let scheduler = system.bundle().resolve(Some(schedulers::POOL)).unwrap();
        let frame = Frame::new(
            FrameInfo::new(system.unique_id(), "quiet"),
            system.clone(),
            scheduler,
            FrameOptions::default(),
            prototype::instance(Quiet),
        );
        assert!(frame.schedule_for_execution());

        let producer = {
            let frame = frame.clone();
            std::thread::spawn(move || {
                let events = frame.default_channel();
                let mut n = 0u64;
                loop {
                    let was_terminated = frame.has_terminated();
                    let sent = events.send(n);
                    if was_terminated {
                        return sent;
                    }
                    n += 1;
                }
            })
        };

        frame.internal_channel().send(SystemEvent::Terminate).unwrap();
        let last = producer.join().unwrap();
        assert_eq!(last, Err(IsoError::sealed("quiet#events")));
        assert!(frame.default_channel().is_sealed());
        assert!(system.shutdown(std::time::Duration::from_secs(5)));
    }

    #[test]
    fn test_open_channel_rejects_duplicate_local_name() {
        struct Idle;
        impl Isolate for Idle {
            type Event = ();
            fn on_event(&mut self, _ctx: &mut Context<'_, Self>, _event: ()) -> Result<()> {
                Ok(())
            }
        }

        let system = IsoSystem::new().unwrap();
        let outcome = Arc::new(StdMutex::new(None));
        let seen = outcome.clone();
        system
            .create_isolate(
                prototype::from_fn(move |ctx: &mut Context<'_, Idle>| {
                    let first = ctx.open_channel("dup", |_: &mut Idle, _: &mut Context<'_, Idle>, _: u8| Ok(()));
                    let second = ctx.open_channel("dup", |_: &mut Idle, _: &mut Context<'_, Idle>, _: u8| Ok(()));
                    let events = ctx.open_channel("events", |_: &mut Idle, _: &mut Context<'_, Idle>, _: u8| Ok(()));
                    *seen.lock().unwrap() = Some((first.is_ok(), second.err(), events.err()));
                    Ok(Idle)
                })
                .named("dupes")
                .on_scheduler(schedulers::PIGGYBACK),
                None,
            )
            .unwrap();

        let (first_ok, second, events) = outcome.lock().unwrap().take().unwrap();
        assert!(first_ok);
        assert_eq!(second, Some(IsoError::name_conflict("dupes#dup")));
        assert_eq!(events, Some(IsoError::name_conflict("dupes#events")));
        assert!(system.shutdown(std::time::Duration::from_secs(5)));
    }
}
