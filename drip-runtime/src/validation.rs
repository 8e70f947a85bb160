//! Field-level validation errors collected when creating a run

use serde::Serialize;
use std::fmt;

/// Category of a validation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    UnknownDefinition,
    NotABackfillDefinition,
    UnknownOption,
    Cast,
    EmptyScope,
    InvalidBatchSize,
    InvalidAmountOfElements,
    InvalidStartAt,
    Blank,
}

/// A single validation failure attached to a field (`base` for the whole run)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl FieldError {
    /// Human readable message, prefixed with the field name unless it is `base`
    pub fn full_message(&self) -> String {
        if self.field == "base" {
            return self.message.clone();
        }

        let mut label = self.field.replace('_', " ");
        if let Some(first) = label.get(0..1) {
            let upper = first.to_uppercase();
            label.replace_range(0..1, &upper);
        }
        format!("{} {}", label, self.message)
    }
}

/// All validation failures for one request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, kind: ValidationErrorKind, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            kind,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    /// Returns true if any error has `kind`
    pub fn has(&self, kind: ValidationErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    /// Errors attached to `field`
    pub fn on(&self, field: &str) -> Vec<&FieldError> {
        self.errors.iter().filter(|e| e.field == field).collect()
    }

    pub fn full_messages(&self) -> Vec<String> {
        self.errors.iter().map(FieldError::full_message).collect()
    }

    /// `Ok(())` when empty, otherwise the collected errors
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_messages().join("; "))
    }
}
