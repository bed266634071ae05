//! Runtime defaults
//!
//! Default values and well-known names shared by the configuration model
//! and the runtime core, so both sides agree without duplicating literals.

/// Channel naming
pub mod channels {
    /// Local name of every isolate's default event channel
    pub const EVENTS: &str = "events";

    /// Local name of every isolate's internal (system) channel
    pub const INTERNAL: &str = "internal";

    /// Separator between isolate name and channel name in registered names
    pub const SEPARATOR: char = '#';

    /// Prefix used when synthesising isolate names
    pub const SYNTHETIC_PREFIX: &str = "isolate";
}

/// Frame execution defaults
pub mod frame {
    /// Events delivered from one connector before rotating to the next
    pub const QUANTUM: usize = 16;

    /// Events delivered per batch before yielding the execution slot
    pub const BATCH_LIMIT: usize = 256;

    /// Initial queue allocation per connector (0 = grow on demand)
    pub const QUEUE_CAPACITY: usize = 0;
}

/// Scheduler defaults
pub mod schedulers {
    /// Name of the shared thread pool strategy
    pub const POOL: &str = "pool";

    /// Name of the thread-per-isolate strategy
    pub const DEDICATED: &str = "dedicated";

    /// Name of the run-on-caller strategy
    pub const PIGGYBACK: &str = "piggyback";

    /// Name of the tokio-backed strategy
    pub const TOKIO: &str = "tokio";

    /// Worker threads in the shared pool when none are configured
    pub const POOL_WORKERS: usize = 4;
}

/// Lifecycle delta stream defaults
pub mod deltas {
    /// Broadcast buffer; slow subscribers observe a lag error beyond this
    pub const CAPACITY: usize = 1024;
}
