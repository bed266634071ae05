//! Runtime Configuration Module
//!
//! Provides configuration loading and validation for the isolate runtime.
//! Values come from built-in defaults, an optional TOML file, and `ISO_*`
//! environment overrides (in that order of precedence, last wins).
//!
//! ```toml
//! [runtime]
//! default_scheduler = "pool"
//! delta_capacity = 1024
//!
//! [[schedulers.strategies]]
//! name = "pool"
//! strategy = "pool"
//! workers = 8
//!
//! [frame]
//! quantum = 16
//! batch_limit = 256
//!
//! [logging]
//! level = "info"
//! json = false
//! ```
//!
//! Environment overrides use `__` between sections and keys, for example
//! `ISO_FRAME__QUANTUM=4` or `ISO_LOGGING__LEVEL=debug`.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

use crate::service;

/// Main runtime configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct IsoConfig {
    /// System-wide settings
    pub runtime: RuntimeSettings,

    /// Scheduler bundle definition
    pub schedulers: SchedulerSettings,

    /// Per-frame execution defaults
    pub frame: FrameSettings,

    /// Logging bootstrap
    pub logging: LogSettings,
}

/// System-wide settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Scheduler used by prototypes that do not name one
    pub default_scheduler: String,

    /// Buffer size of the lifecycle delta broadcast
    pub delta_capacity: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            default_scheduler: service::schedulers::POOL.to_string(),
            delta_capacity: service::deltas::CAPACITY,
        }
    }
}

/// Named scheduling strategies making up the bundle
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerSettings {
    pub strategies: Vec<SchedulerSpec>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            strategies: vec![
                SchedulerSpec::new(service::schedulers::POOL, Strategy::Pool),
                SchedulerSpec::new(service::schedulers::DEDICATED, Strategy::Dedicated),
                SchedulerSpec::new(service::schedulers::PIGGYBACK, Strategy::Piggyback),
            ],
        }
    }
}

/// One named scheduler in the bundle
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SchedulerSpec {
    pub name: String,
    pub strategy: Strategy,

    /// Worker threads; only meaningful for [`Strategy::Pool`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
}

impl SchedulerSpec {
    pub fn new(name: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            name: name.into(),
            strategy,
            workers: None,
        }
    }

    /// Worker count for pool strategies, falling back to the default
    pub fn pool_workers(&self) -> usize {
        self.workers.unwrap_or(service::schedulers::POOL_WORKERS)
    }
}

/// Execution strategy of a scheduler
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Shared fixed-size worker pool
    Pool,
    /// One worker thread per isolate
    Dedicated,
    /// Synchronously on the submitting thread
    Piggyback,
    /// Blocking tasks on the ambient tokio runtime
    Tokio,
}

/// Per-frame execution defaults
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct FrameSettings {
    /// Events taken from one connector before rotating to the next
    pub quantum: usize,

    /// Events delivered per batch before the frame yields its slot
    pub batch_limit: usize,

    /// Initial per-connector queue allocation
    pub queue_capacity: usize,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            quantum: service::frame::QUANTUM,
            batch_limit: service::frame::BATCH_LIMIT,
            queue_capacity: service::frame::QUEUE_CAPACITY,
        }
    }
}

/// Logging bootstrap settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl IsoConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading runtime configuration");
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (ISO_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("ISO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let parsed: IsoConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        parsed.validate()?;
        debug!(
            default_scheduler = %parsed.runtime.default_scheduler,
            strategies = parsed.schedulers.strategies.len(),
            "Runtime configuration loaded"
        );
        Ok(parsed)
    }

    /// Parse configuration from TOML text, without environment overrides
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let parsed: IsoConfig = toml::from_str(text).context("Failed to parse TOML configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration as TOML")
    }

    /// Look up a scheduler definition by name
    pub fn scheduler(&self, name: &str) -> Option<&SchedulerSpec> {
        self.schedulers.strategies.iter().find(|spec| spec.name == name)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.schedulers.strategies.is_empty() {
            bail!("at least one scheduler strategy must be configured");
        }

        let mut seen = HashSet::new();
        for spec in &self.schedulers.strategies {
            if spec.name.trim().is_empty() {
                bail!("scheduler name cannot be empty");
            }
            if !seen.insert(spec.name.as_str()) {
                bail!("duplicate scheduler name: {}", spec.name);
            }
            if spec.strategy == Strategy::Pool && spec.pool_workers() == 0 {
                bail!("scheduler '{}': pool needs at least one worker", spec.name);
            }
        }

        if self.scheduler(&self.runtime.default_scheduler).is_none() {
            bail!(
                "default scheduler '{}' is not among the configured strategies",
                self.runtime.default_scheduler
            );
        }

        if self.runtime.delta_capacity == 0 {
            bail!("runtime.delta_capacity must be greater than zero");
        }
        if self.frame.quantum == 0 {
            bail!("frame.quantum must be greater than zero");
        }
        if self.frame.batch_limit == 0 {
            bail!("frame.batch_limit must be greater than zero");
        }

        Ok(())
    }
}

/// Convenience function to load configuration from an optional path
pub fn load_config(path: Option<&Path>) -> Result<IsoConfig> {
    IsoConfig::load(path)
}
