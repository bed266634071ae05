//! Scheduler Bundle
//!
//! Immutable set of named schedulers with one designated default. Isolates
//! pick a scheduler by name when they are created; a missing name falls
//! back to the default.

use std::fmt;
use std::sync::Arc;
use tracing::info;

use iso_config::{service, IsoConfig, Strategy};

use crate::error::{IsoError, Result};
use crate::scheduler::{DedicatedScheduler, PiggybackScheduler, PoolScheduler, Scheduler, TokioScheduler};

#[derive(Clone)]
pub struct Bundle {
    schedulers: Vec<Arc<dyn Scheduler>>,
    default: usize,
}

impl Bundle {
    pub fn builder() -> BundleBuilder {
        BundleBuilder::default()
    }

    /// Pool (default), dedicated and piggyback schedulers under their
    /// well-known names
    pub fn standard() -> Result<Self> {
        Self::builder()
            .register(Arc::new(PoolScheduler::new(
                service::schedulers::POOL,
                service::schedulers::POOL_WORKERS,
            )?))?
            .register(Arc::new(DedicatedScheduler::new(service::schedulers::DEDICATED)))?
            .register(Arc::new(PiggybackScheduler::new(service::schedulers::PIGGYBACK)))?
            .with_default(service::schedulers::POOL)
            .build()
    }

    /// Instantiate the strategies listed in `config`.
    ///
    /// Tokio strategies bind to the runtime of the calling thread.
    pub fn from_settings(config: &IsoConfig) -> Result<Self> {
        let mut builder = Self::builder().with_default(&config.runtime.default_scheduler);
        for spec in &config.schedulers.strategies {
            let scheduler: Arc<dyn Scheduler> = match spec.strategy {
                Strategy::Pool => Arc::new(PoolScheduler::new(&spec.name, spec.pool_workers())?),
                Strategy::Dedicated => Arc::new(DedicatedScheduler::new(&spec.name)),
                Strategy::Piggyback => Arc::new(PiggybackScheduler::new(&spec.name)),
                Strategy::Tokio => Arc::new(TokioScheduler::current(&spec.name)?),
            };
            builder = builder.register(scheduler)?;
        }
        builder.build()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Scheduler>> {
        self.schedulers.iter().find(|s| s.name() == name).cloned()
    }

    /// Scheduler named `name`, or the default when `None`
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn Scheduler>> {
        match name {
            Some(name) => self.get(name).ok_or_else(|| IsoError::unknown_scheduler(name)),
            None => Ok(self.default_scheduler()),
        }
    }

    pub fn default_scheduler(&self) -> Arc<dyn Scheduler> {
        self.schedulers[self.default].clone()
    }

    /// Names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.schedulers.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    pub fn shutdown(&self) {
        for scheduler in &self.schedulers {
            scheduler.shutdown();
        }
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("schedulers", &self.names())
            .field("default", &self.schedulers[self.default].name())
            .finish()
    }
}

#[derive(Default)]
pub struct BundleBuilder {
    schedulers: Vec<Arc<dyn Scheduler>>,
    default: Option<String>,
}

impl BundleBuilder {
    /// Add a scheduler; names must be unique within the bundle
    pub fn register(mut self, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        if self.schedulers.iter().any(|s| s.name() == scheduler.name()) {
            return Err(IsoError::name_conflict(scheduler.name()));
        }
        self.schedulers.push(scheduler);
        Ok(self)
    }

    /// Default scheduler; the first registered one when unset
    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    pub fn build(self) -> Result<Bundle> {
        if self.schedulers.is_empty() {
            return Err(IsoError::configuration(
                "bundle needs at least one scheduler",
                Some("schedulers"),
            ));
        }
        let default = match &self.default {
            Some(name) => self
                .schedulers
                .iter()
                .position(|s| s.name() == name)
                .ok_or_else(|| IsoError::unknown_scheduler(name))?,
            None => 0,
        };

        let bundle = Bundle {
            schedulers: self.schedulers,
            default,
        };
        info!(schedulers = ?bundle.names(), default = %bundle.default_scheduler().name(), "Scheduler bundle ready");
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iso_config::SchedulerSpec;

    #[test]
    fn test_standard_bundle() {
        let bundle = Bundle::standard().unwrap();
        assert_eq!(bundle.names(), vec!["pool", "dedicated", "piggyback"]);
        assert_eq!(bundle.default_scheduler().name(), "pool");
        assert_eq!(bundle.resolve(None).unwrap().name(), "pool");
        assert_eq!(bundle.resolve(Some("piggyback")).unwrap().name(), "piggyback");
        assert_eq!(
            bundle.resolve(Some("gpu")).unwrap_err(),
            IsoError::unknown_scheduler("gpu")
        );
        bundle.shutdown();
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = Bundle::builder()
            .register(Arc::new(PiggybackScheduler::new("inline")))
            .unwrap()
            .register(Arc::new(DedicatedScheduler::new("inline")));
        assert_eq!(result.err().map(|e| e.to_string()), Some(IsoError::name_conflict("inline").to_string()));
    }

    #[test]
    fn test_unknown_default_rejected() {
        let err = Bundle::builder()
            .register(Arc::new(PiggybackScheduler::new("inline")))
            .unwrap()
            .with_default("pool")
            .build()
            .unwrap_err();
        assert_eq!(err, IsoError::unknown_scheduler("pool"));
        assert!(matches!(
            Bundle::builder().build(),
            Err(IsoError::Configuration { .. })
        ));
    }

    #[test]
    fn test_from_settings() {
        let mut config = IsoConfig::default();
        config.runtime.default_scheduler = "inline".to_string();
        config.schedulers.strategies = vec![
            SchedulerSpec::new("inline", Strategy::Piggyback),
            SchedulerSpec {
                workers: Some(2),
                ..SchedulerSpec::new("workers", Strategy::Pool)
            },
        ];

        let bundle = Bundle::from_settings(&config).unwrap();
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.default_scheduler().name(), "inline");
        bundle.shutdown();
    }

    #[test]
    fn test_tokio_strategy_needs_runtime() {
        let mut config = IsoConfig::default();
        config
            .schedulers
            .strategies
            .push(SchedulerSpec::new("async", Strategy::Tokio));
        assert!(matches!(
            Bundle::from_settings(&config),
            Err(IsoError::Scheduler { .. })
        ));
    }
}
