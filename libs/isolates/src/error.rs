//! Isolate Runtime Error Types
//!
//! Failures surfaced by the registry, the frames and the schedulers. Every
//! variant is cheap to clone so a single failure can be routed to the
//! isolate, the system error handler and any eventual-lookup observers.

use std::any::Any;
use thiserror::Error;

use crate::frame::FrameId;

/// Main runtime error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IsoError {
    /// Duplicate isolate or channel name
    #[error("Name conflict: '{name}' is already registered")]
    NameConflict { name: String },

    /// Name rejected before it reached the registry
    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Scheduler name not present in the bundle
    #[error("Unknown scheduler: '{name}'")]
    UnknownScheduler { name: String },

    /// Channel name not present in the registry or on the frame
    #[error("Unknown channel: '{name}'")]
    UnknownChannel { name: String },

    /// Send attempted on a sealed connector
    #[error("Channel '{channel}' is sealed")]
    SealedChannel { channel: String },

    /// A batch was invoked while another frame is active on the same thread
    #[error("Nested execution: frame {requested} invoked while frame {active} is active")]
    NestedExecution { active: FrameId, requested: FrameId },

    /// A channel was looked up with the wrong event type
    #[error("Channel '{channel}' does not carry events of type {expected}")]
    TypeMismatch {
        channel: String,
        expected: &'static str,
    },

    /// Operation on an isolate that already reached `Terminated`
    #[error("Isolate '{isolate}' has terminated")]
    Terminated { isolate: String },

    /// Error raised by isolate code while processing an event
    #[error("Handler error: {message}")]
    Handler { message: String },

    /// Panic caught at the batch boundary
    #[error("Handler panicked: {message}")]
    Panicked { message: String },

    /// Eventual lookup abandoned because the registry shut down
    #[error("Registry closed before '{name}' was registered")]
    RegistryClosed { name: String },

    /// Scheduler could not accept or run a batch
    #[error("Scheduler error: {scheduler}: {message}")]
    Scheduler { scheduler: String, message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, IsoError>;

impl IsoError {
    pub fn name_conflict(name: impl Into<String>) -> Self {
        Self::NameConflict { name: name.into() }
    }

    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_scheduler(name: impl Into<String>) -> Self {
        Self::UnknownScheduler { name: name.into() }
    }

    pub fn unknown_channel(name: impl Into<String>) -> Self {
        Self::UnknownChannel { name: name.into() }
    }

    pub fn sealed(channel: impl Into<String>) -> Self {
        Self::SealedChannel {
            channel: channel.into(),
        }
    }

    pub fn nested(active: FrameId, requested: FrameId) -> Self {
        Self::NestedExecution { active, requested }
    }

    pub fn type_mismatch(channel: impl Into<String>, expected: &'static str) -> Self {
        Self::TypeMismatch {
            channel: channel.into(),
            expected,
        }
    }

    pub fn terminated(isolate: impl Into<String>) -> Self {
        Self::Terminated {
            isolate: isolate.into(),
        }
    }

    /// Create a handler error from isolate code
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create a panic error from an unwind payload
    pub fn panicked(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }

    pub fn registry_closed(name: impl Into<String>) -> Self {
        Self::RegistryClosed { name: name.into() }
    }

    pub fn scheduler(scheduler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Scheduler {
            scheduler: scheduler.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// Programming errors that must not be retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IsoError::NestedExecution { .. } | IsoError::Scheduler { .. }
        )
    }

    /// Failures originating in isolate code rather than the runtime
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, IsoError::Handler { .. } | IsoError::Panicked { .. })
    }
}
