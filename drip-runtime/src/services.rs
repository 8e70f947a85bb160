//! Collaborators shared by the state machines

use crate::config::DripConfig;
use crate::hooks::HookDispatcher;
use crate::queue::JobQueue;
use drip_core::{DefinitionRegistry, RecordStore};
use drip_storage::RunStore;
use std::sync::Arc;

/// Everything the run and batch state machines need, shared behind an `Arc`
pub struct Services {
    pub registry: DefinitionRegistry,
    pub runs: Arc<dyn RunStore>,
    pub records: Arc<dyn RecordStore>,
    pub queue: Arc<dyn JobQueue>,
    pub config: DripConfig,
    pub dispatcher: HookDispatcher,
}

impl Services {
    pub fn new(
        registry: DefinitionRegistry,
        runs: Arc<dyn RunStore>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn JobQueue>,
        config: DripConfig,
    ) -> Self {
        let dispatcher = HookDispatcher::new(config.hooks.clone());
        Self {
            registry,
            runs,
            records,
            queue,
            config,
            dispatcher,
        }
    }
}

/// Map storage errors to runtime errors
///
/// - NotFound → NotFound
/// - StaleStatus, ValidationError → InvalidState (a concurrent transition won)
/// - everything else → Internal
pub(crate) fn map_storage_error(e: drip_storage::Error, context: &str) -> crate::Error {
    use drip_storage::Error as StorageError;
    use tracing::error;

    match e {
        StorageError::NotFound(msg) => {
            error!(error = %msg, context = %context, "Resource not found");
            crate::Error::NotFound(msg)
        }
        StorageError::StaleStatus(msg) => {
            tracing::debug!(error = %msg, context = %context, "Stale status");
            crate::Error::InvalidState(msg)
        }
        StorageError::ValidationError(msg) => {
            error!(error = %msg, context = %context, "Validation error");
            crate::Error::InvalidState(msg)
        }
        _ => {
            let err_msg = format!("{}: {}", context, e);
            error!(error = %err_msg, "Storage error");
            crate::Error::Internal(err_msg)
        }
    }
}
