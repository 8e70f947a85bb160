//! # Drip Core
//!
//! Building blocks for resumable backfills: typed option schemas, record
//! scopes, the record store abstraction, backfill definitions, lifecycle hook
//! slots and the definition registry.

pub mod definition;
pub mod hooks;
pub mod memory;
pub mod options;
pub mod record_store;
pub mod registry;
pub mod scope;
pub mod status;

// Re-export commonly used types
pub use definition::{BackfillDefinition, BackfillInstance, ProcessContext, ProcessingStrategy};
pub use hooks::{
    AroundTransition, HookContext, HookScope, HookSet, HookSlot, HookTiming, Proceed,
    TransitionCallback,
};
pub use memory::InMemoryRecordStore;
pub use options::{
    DisplayMetadata, EnumValues, FormDefault, FormField, InputKind, OptionSpec, OptionType,
    OptionValue, OptionsSchema, TypedOptions,
};
pub use record_store::{Page, RecordStore};
pub use registry::{DefinitionRegistry, RegistryError};
pub use scope::{FieldChanges, FilterOp, IdRange, Predicate, Record, RecordId, Scope};
pub use status::{BackfillStatus, UnknownStatus};

/// Result type for Drip core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Drip core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid value for option '{field}': {message}")]
    Cast { field: String, message: String },

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("Transition aborted: {0}")]
    TransitionAborted(String),

    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Invalid options schema: {0}")]
    InvalidSchema(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Processing(#[from] anyhow::Error),
}
