//! # Isolates
//!
//! Runtime for isolates: actor-like units of sequential computation that
//! talk only through named, typed, asynchronous channels.
//!
//! ## Architecture
//!
//! ```text
//!  producers ──send──▶ Channel ─┐
//!                               ▼
//!  ┌──────────────────── Frame (one per isolate) ─────────────────────┐
//!  │  events ▸ EventQueue   internal ▸ EventQueue   chan ▸ EventQueue │
//!  │          └────────── Multiplexer (round-robin) ──────────┘       │
//!  │  monitor: lifecycle · executing · pending connectors             │
//!  └──────────────┬───────────────────────────────────────────────────┘
//!                 │ one submission per idle→busy edge
//!                 ▼
//!        Scheduler (pool · dedicated · piggyback · tokio)
//! ```
//!
//! [`IsoSystem`] creates isolates from a [`Prototype`], names them and
//! their channels, and keeps the [`Channels`] directory where channels can
//! be looked up by name, including before they exist.
//!
//! ## Guarantees
//!
//! - At most one batch of a given isolate runs at any time.
//! - Events on one channel are delivered in send order.
//! - Connectors with pending events are serviced round-robin.
//! - A send on a sealed channel fails with [`IsoError::SealedChannel`].
//!
//! ## Example
//!
//! ```no_run
//! use isolates::{prototype, Context, IsoSystem, Isolate, Result};
//!
//! struct Printer;
//!
//! impl Isolate for Printer {
//!     type Event = String;
//!
//!     fn on_event(&mut self, ctx: &mut Context<'_, Self>, line: String) -> Result<()> {
//!         println!("{}: {line}", ctx.name());
//!         Ok(())
//!     }
//! }
//!
//! let system = IsoSystem::new()?;
//! let printer = system.create_isolate(prototype::instance(Printer).named("printer"), None)?;
//! printer.send("hello".to_string())?;
//! system.shutdown(std::time::Duration::from_secs(1));
//! # Ok::<(), isolates::IsoError>(())
//! ```

mod active;
pub mod bundle;
pub mod connector;
pub mod context;
pub mod delta;
pub mod error;
pub mod frame;
pub mod isolate;
pub mod metrics;
mod multiplexer;
pub mod prototype;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod system;

pub use active::current as current_frame;
pub use bundle::{Bundle, BundleBuilder};
pub use connector::{AnyChannel, Channel, ConnectorId};
pub use context::Context;
pub use delta::{Delta, DeltaKind};
pub use error::{IsoError, Result};
pub use frame::{FrameId, FrameInfo, FrameStatus, Lifecycle};
pub use isolate::{Isolate, SupervisorDirective, SystemEvent};
pub use metrics::{MetricsSnapshot, SystemMetrics};
pub use prototype::{FrameOptions, Prototype};
pub use queue::EventQueue;
pub use registry::{Channels, Eventually};
pub use scheduler::{
    BatchOutcome, DedicatedScheduler, PiggybackScheduler, PoolScheduler, Runnable, Scheduler,
    TokioScheduler,
};
pub use system::{ErrorHandler, IsoSystem, IsoSystemBuilder, LogAndResume};
