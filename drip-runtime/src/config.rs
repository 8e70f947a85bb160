//! Runtime configuration

use crate::{Error, Result};
use drip_core::HookSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked before a backfill's scope is touched, e.g. to pin a
/// database role or connection
pub type BeforeBackfill = Arc<dyn Fn() -> drip_core::Result<()> + Send + Sync>;

pub const DEFAULT_QUEUE: &str = "data_drip";
pub const DEFAULT_CHILD_QUEUE: &str = "data_drip_child";
pub const DEFAULT_SLEEP_TIME: Duration = Duration::from_millis(100);
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Configuration threaded through the orchestrator and state machines
#[derive(Clone)]
pub struct DripConfig {
    /// Queue runs are enqueued on
    pub queue_name: String,

    /// Queue batches are enqueued on
    pub child_queue_name: String,

    /// Pause after each processed page
    pub sleep_time: Duration,

    /// Batch size used when a request does not specify one
    pub default_batch_size: u32,

    /// Hooks used for slots a definition does not register
    pub hooks: HookSet,

    pub before_backfill: Option<BeforeBackfill>,
}

impl Default for DripConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE.to_string(),
            child_queue_name: DEFAULT_CHILD_QUEUE.to_string(),
            sleep_time: DEFAULT_SLEEP_TIME,
            default_batch_size: DEFAULT_BATCH_SIZE,
            hooks: HookSet::default(),
            before_backfill: None,
        }
    }
}

impl DripConfig {
    /// Load configuration from `DATA_DRIP_*` environment variables, falling
    /// back to defaults for unset ones
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(queue) = std::env::var("DATA_DRIP_QUEUE") {
            config.queue_name = queue;
        }
        if let Ok(queue) = std::env::var("DATA_DRIP_CHILD_QUEUE") {
            config.child_queue_name = queue;
        }
        if let Ok(raw) = std::env::var("DATA_DRIP_SLEEP_TIME_MS") {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                Error::Configuration(format!(
                    "DATA_DRIP_SLEEP_TIME_MS must be a number of milliseconds, got '{}'",
                    raw
                ))
            })?;
            config.sleep_time = Duration::from_millis(millis);
        }
        if let Ok(raw) = std::env::var("DATA_DRIP_BATCH_SIZE") {
            config.default_batch_size = raw.trim().parse().map_err(|_| {
                Error::Configuration(format!(
                    "DATA_DRIP_BATCH_SIZE must be a positive integer, got '{}'",
                    raw
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_name.trim().is_empty() {
            return Err(Error::Configuration("queue_name cannot be empty".to_string()));
        }
        if self.child_queue_name.trim().is_empty() {
            return Err(Error::Configuration(
                "child_queue_name cannot be empty".to_string(),
            ));
        }
        if self.default_batch_size == 0 {
            return Err(Error::Configuration(
                "default_batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_before_backfill<F>(mut self, callback: F) -> Self
    where
        F: Fn() -> drip_core::Result<()> + Send + Sync + 'static,
    {
        self.before_backfill = Some(Arc::new(callback));
        self
    }

    pub fn with_sleep_time(mut self, sleep_time: Duration) -> Self {
        self.sleep_time = sleep_time;
        self
    }

    /// Run the configured `before_backfill` callback, if any
    pub(crate) fn run_before_backfill(&self) -> drip_core::Result<()> {
        match &self.before_backfill {
            Some(callback) => callback(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for DripConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DripConfig")
            .field("queue_name", &self.queue_name)
            .field("child_queue_name", &self.child_queue_name)
            .field("sleep_time", &self.sleep_time)
            .field("default_batch_size", &self.default_batch_size)
            .field("hooks", &self.hooks)
            .field("before_backfill", &self.before_backfill.is_some())
            .finish()
    }
}
