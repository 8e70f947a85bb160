//! Custom assertions for common verification patterns
//!
//! Provides assertion helpers that give better error messages for runs,
//! their batches and validation failures.

use crate::builders::Harness;
use drip_core::BackfillStatus;
use drip_runtime::{BackfillRun, Error, ValidationErrorKind, ValidationErrors};

/// Run assertion helpers
pub struct RunAssertions<'a> {
    harness: &'a Harness,
    run: BackfillRun,
}

impl<'a> RunAssertions<'a> {
    /// Reload `run` and start asserting on its current state
    pub async fn reload(harness: &'a Harness, run: &BackfillRun) -> RunAssertions<'a> {
        let run = harness.run(run).await;
        Self { harness, run }
    }

    pub fn run(&self) -> &BackfillRun {
        &self.run
    }

    /// Assert the run status equals expected
    pub fn assert_status(self, expected: BackfillStatus) -> Self {
        assert_eq!(
            self.run.status, expected,
            "Expected run {} to be {} but it is {} (error: {:?})",
            self.run.id, expected, self.run.status, self.run.error_message
        );
        self
    }

    pub fn assert_completed(self) -> Self {
        self.assert_status(BackfillStatus::Completed)
    }

    /// Assert processed and total counts
    pub fn assert_counts(self, processed: i64, total: Option<i64>) -> Self {
        assert_eq!(
            (self.run.processed_count, self.run.total_count),
            (processed, total),
            "Expected run {} counts (processed, total)",
            self.run.id
        );
        self
    }

    /// Assert the error message contains `fragment`
    pub fn assert_error_contains(self, fragment: &str) -> Self {
        let message = self
            .run
            .error_message
            .as_deref()
            .unwrap_or_else(|| panic!("Run {} has no error message", self.run.id));
        assert!(
            message.contains(fragment),
            "Expected error message '{}' to contain '{}'",
            message,
            fragment
        );
        self
    }

    /// Assert batch sizes in id order
    pub fn assert_batch_sizes(self, expected: &[i32]) -> Self {
        assert_eq!(
            self.harness.batch_sizes(&self.run),
            expected,
            "Unexpected batch sizes for run {}",
            self.run.id
        );
        self
    }

    /// Assert every batch of the run has `expected` status
    pub fn assert_batches(self, expected: BackfillStatus) -> Self {
        for batch in self.harness.runs.batches_for(self.run.id) {
            assert_eq!(
                batch.status,
                expected.as_str(),
                "Expected batch {} ({}..={}) to be {}",
                batch.id,
                batch.start_id,
                batch.finish_id,
                expected
            );
        }
        self
    }
}

/// Unwrap a validation failure, panicking on success or any other error
pub fn expect_validation<T: std::fmt::Debug>(result: drip_runtime::Result<T>) -> ValidationErrors {
    match result {
        Err(Error::Validation(errors)) => errors,
        other => panic!("Expected a validation error, got {:?}", other),
    }
}

/// Assert `errors` holds a `kind` error on `field` whose full message is `message`
pub fn assert_field_error(
    errors: &ValidationErrors,
    field: &str,
    kind: ValidationErrorKind,
    message: &str,
) {
    let on_field = errors.on(field);
    assert!(
        on_field.iter().any(|e| e.kind == kind),
        "Expected a {:?} error on '{}', got {:?}",
        kind,
        field,
        on_field
    );
    assert!(
        errors.full_messages().iter().any(|m| m == message),
        "Expected full message '{}', got {:?}",
        message,
        errors.full_messages()
    );
}
