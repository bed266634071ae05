//! # Isolate Runtime Configuration
//!
//! Configuration model, shared defaults and logging bootstrap for the
//! isolate runtime.
//!
//! ## Usage
//!
//! ```no_run
//! use iso_config::{load_config, logging};
//!
//! let config = load_config(None).expect("valid configuration");
//! logging::init(&config.logging).expect("subscriber installed");
//! ```

pub mod logging;
pub mod runtime_config;
pub mod service;

// Re-export commonly used types
pub use runtime_config::{
    load_config, FrameSettings, IsoConfig, LogSettings, RuntimeSettings, SchedulerSettings,
    SchedulerSpec, Strategy,
};
