//! Definition registry
//!
//! The registry is an append-only catalog of backfill definitions, keyed by
//! their unique name. It is passed explicitly to the orchestrator.

use crate::definition::BackfillDefinition;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors that can occur in the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Definition already exists: {0}")]
    DefinitionAlreadyExists(String),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Registry lock poisoned")]
    LockPoisoned,
}

/// Registry of backfill definitions with thread-safe concurrent access.
/// This type uses blocking locks; do not hold guards across await points.
#[derive(Clone)]
pub struct DefinitionRegistry {
    inner: Arc<RwLock<Vec<Arc<dyn BackfillDefinition>>>>,
}

impl DefinitionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a definition, rejecting blank and duplicate names
    pub fn register(&self, definition: Arc<dyn BackfillDefinition>) -> Result<(), RegistryError> {
        let name = definition.name().trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::InvalidDefinition(
                "definition name must not be blank".to_string(),
            ));
        }

        let mut inner = self.write()?;
        if inner.iter().any(|existing| existing.name() == name) {
            return Err(RegistryError::DefinitionAlreadyExists(name));
        }

        inner.push(definition);
        Ok(())
    }

    /// Find a definition by name (linear scan)
    pub fn find(&self, name: &str) -> Option<Arc<dyn BackfillDefinition>> {
        let inner = self.read().ok()?;
        inner.iter().find(|d| d.name() == name).cloned()
    }

    /// All definitions in registration order
    pub fn all(&self) -> Vec<Arc<dyn BackfillDefinition>> {
        self.read().map(|inner| inner.clone()).unwrap_or_default()
    }

    /// Definition names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .map(|inner| inner.iter().map(|d| d.name().to_string()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Count registered definitions
    pub fn count(&self) -> usize {
        self.read().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read()
            .map(|inner| inner.iter().any(|d| d.name() == name))
            .unwrap_or(false)
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, Vec<Arc<dyn BackfillDefinition>>>, RegistryError>
    {
        self.inner.read().map_err(|_| RegistryError::LockPoisoned)
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn BackfillDefinition>>>, RegistryError>
    {
        self.inner.write().map_err(|_| RegistryError::LockPoisoned)
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
