//! Backfill definitions
//!
//! A [`BackfillDefinition`] is the migration logic an author writes: a unique
//! name, a typed options schema, a function from options to a [`Scope`] and
//! either a whole-batch or a per-element processing function.

use crate::hooks::HookSet;
use crate::options::{OptionsSchema, TypedOptions};
use crate::record_store::{Page, RecordStore};
use crate::scope::{Record, Scope};
use crate::{Error, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

static EMPTY_SCHEMA: Lazy<OptionsSchema> = Lazy::new(OptionsSchema::default);

/// How a definition processes the records of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStrategy {
    /// One `process_batch` call per page
    WholeBatch,

    /// One `process_element` call per record, in page order
    #[default]
    PerElement,
}

/// Context handed to processing functions
#[derive(Clone, Copy)]
pub struct ProcessContext<'a> {
    pub store: &'a dyn RecordStore,
    pub options: &'a TypedOptions,
    pub run_id: Uuid,
    pub batch_id: Uuid,
}

impl fmt::Debug for ProcessContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("options", self.options)
            .field("run_id", &self.run_id)
            .field("batch_id", &self.batch_id)
            .finish_non_exhaustive()
    }
}

/// User-authored migration logic
#[async_trait]
pub trait BackfillDefinition: Send + Sync {
    /// Unique name used for registration and persistence
    fn name(&self) -> &str;

    fn options_schema(&self) -> &OptionsSchema {
        &EMPTY_SCHEMA
    }

    /// Records this backfill operates on, given its typed options
    fn scope(&self, _options: &TypedOptions) -> Result<Scope> {
        Err(Error::NotImplemented(format!("{}::scope", self.name())))
    }

    fn strategy(&self) -> ProcessingStrategy {
        ProcessingStrategy::PerElement
    }

    async fn process_batch(&self, _ctx: &ProcessContext<'_>, _page: &Page) -> Result<()> {
        Err(Error::NotImplemented(format!("{}::process_batch", self.name())))
    }

    async fn process_element(&self, _ctx: &ProcessContext<'_>, _record: &Record) -> Result<()> {
        Err(Error::NotImplemented(format!("{}::process_element", self.name())))
    }

    /// Lifecycle hooks registered by this definition
    fn hooks(&self) -> Option<&HookSet> {
        None
    }
}

/// A definition bound to typed options and processing parameters
#[derive(Clone)]
pub struct BackfillInstance {
    definition: Arc<dyn BackfillDefinition>,
    options: TypedOptions,
    batch_size: u32,
    sleep_time: Duration,
}

impl BackfillInstance {
    pub fn new(
        definition: Arc<dyn BackfillDefinition>,
        options: TypedOptions,
        batch_size: u32,
        sleep_time: Duration,
    ) -> Self {
        Self {
            definition,
            options,
            batch_size,
            sleep_time,
        }
    }

    pub fn definition(&self) -> &Arc<dyn BackfillDefinition> {
        &self.definition
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn options(&self) -> &TypedOptions {
        &self.options
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn sleep_time(&self) -> Duration {
        self.sleep_time
    }

    pub fn strategy(&self) -> ProcessingStrategy {
        self.definition.strategy()
    }

    /// Scope selected by the bound options
    pub fn scope(&self) -> Result<Scope> {
        self.definition.scope(&self.options)
    }

    /// Scope with `amount_of_elements` applied as a limit when positive
    pub fn limited_scope(&self, amount_of_elements: Option<u64>) -> Result<Scope> {
        let scope = self.scope()?;
        Ok(match amount_of_elements {
            Some(limit) if limit > 0 => scope.limit(limit),
            _ => scope,
        })
    }

    /// Number of records the instance would touch
    pub async fn count(
        &self,
        store: &dyn RecordStore,
        amount_of_elements: Option<u64>,
    ) -> Result<u64> {
        let scope = self.limited_scope(amount_of_elements)?;
        store.count(&scope).await
    }
}

impl fmt::Debug for BackfillInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackfillInstance")
            .field("definition", &self.definition.name())
            .field("options", &self.options)
            .field("batch_size", &self.batch_size)
            .field("sleep_time", &self.sleep_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRecordStore;
    use crate::options::{OptionSpec, OptionType};
    use serde_json::{json, Map};

    struct NullRoles {
        schema: OptionsSchema,
    }

    impl NullRoles {
        fn new() -> Self {
            Self {
                schema: OptionsSchema::builder()
                    .option(OptionSpec::new("age", OptionType::Integer).filter_on("age"))
                    .build()
                    .unwrap(),
            }
        }
    }

    #[async_trait]
    impl BackfillDefinition for NullRoles {
        fn name(&self) -> &str {
            "NullRoles"
        }

        fn options_schema(&self) -> &OptionsSchema {
            &self.schema
        }

        fn scope(&self, options: &TypedOptions) -> Result<Scope> {
            Ok(Scope::from("employees")
                .filter(crate::scope::Predicate::is_null("role"))
                .apply(self.schema.predicates(options)))
        }
    }

    struct Bare;

    impl BackfillDefinition for Bare {
        fn name(&self) -> &str {
            "Bare"
        }
    }

    fn store() -> InMemoryRecordStore {
        let store = InMemoryRecordStore::new();
        store.insert("employees", 1, json!({"age": 25, "role": null}));
        store.insert("employees", 2, json!({"age": 30, "role": null}));
        store.insert("employees", 3, json!({"age": 25, "role": "admin"}));
        store.insert("employees", 4, json!({"age": 25, "role": null}));
        store
    }

    fn instance(raw: serde_json::Value) -> BackfillInstance {
        let definition = Arc::new(NullRoles::new());
        let raw: Map<String, serde_json::Value> = serde_json::from_value(raw).unwrap();
        let options = definition.options_schema().cast(&raw).unwrap();
        BackfillInstance::new(definition, options, 10, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_count_uses_options_and_limit() {
        let store = store();

        assert_eq!(instance(json!({})).count(&store, None).await.unwrap(), 3);
        assert_eq!(instance(json!({"age": 25})).count(&store, None).await.unwrap(), 2);
        assert_eq!(instance(json!({"age": 25})).count(&store, Some(1)).await.unwrap(), 1);
        assert_eq!(instance(json!({})).count(&store, Some(0)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_defaults_are_not_implemented() {
        let bare = Bare;
        assert!(bare.options_schema().is_empty());
        assert!(matches!(
            bare.scope(&TypedOptions::default()),
            Err(Error::NotImplemented(_))
        ));
        assert_eq!(bare.strategy(), ProcessingStrategy::PerElement);
        assert!(bare.hooks().is_none());
    }
}
