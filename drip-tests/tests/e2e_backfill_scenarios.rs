//! End-to-end backfill scenarios
//!
//! Drives runs from creation to completion through the orchestrator, the
//! in-memory stores and the shared fixtures.

use drip_core::{BackfillStatus, HookScope, InputKind};
use drip_runtime::{Error, NewRun, ValidationErrorKind};
use drip_tests::assertions::{assert_field_error, expect_validation, RunAssertions};
use drip_tests::fixtures::definitions::{
    AddRoleToEmployee, FailingBackfill, PaintEmployees, ScopeLess, TestBackfillWithDefaults,
};
use drip_tests::fixtures::employees::{self, Employee};
use drip_tests::{FailingJobQueue, HarnessBuilder, HookRecorder};
use serde_json::{json, Map};
use std::sync::Arc;

#[tokio::test]
async fn test_add_role_to_every_employee() {
    let harness = HarnessBuilder::new()
        .with_employees(employees::standard())
        .build();

    let run = harness
        .create(NewRun::new(AddRoleToEmployee::NAME).batch_size(2))
        .await
        .unwrap();
    assert_eq!(run.status, BackfillStatus::Enqueued);

    assert!(harness.drain().await.iter().all(|r| r.is_ok()));

    RunAssertions::reload(&harness, &run)
        .await
        .assert_completed()
        .assert_counts(3, Some(3))
        .assert_batch_sizes(&[2, 1])
        .assert_batches(BackfillStatus::Completed);
    assert!(employees::without_role(&harness.records).is_empty());
}

#[tokio::test]
async fn test_filter_option_narrows_the_scope() {
    let harness = HarnessBuilder::new()
        .with_employees(employees::numbered(6))
        .build();

    let run = harness
        .create(NewRun::new(AddRoleToEmployee::NAME).option("age", "30"))
        .await
        .unwrap();
    harness.drain().await;

    RunAssertions::reload(&harness, &run)
        .await
        .assert_completed()
        .assert_counts(3, Some(3));
    assert_eq!(employees::without_role(&harness.records), vec![1, 3, 5]);
}

#[tokio::test]
async fn test_already_migrated_employees_are_skipped() {
    let harness = HarnessBuilder::new()
        .with_employees(vec![
            Employee::new(1, "Ada", 25),
            Employee::new(2, "Grace", 30).with_role("manager"),
            Employee::new(3, "Linus", 25),
        ])
        .build();

    let run = harness
        .create(NewRun::new(AddRoleToEmployee::NAME).batch_size(10))
        .await
        .unwrap();
    harness.drain().await;

    RunAssertions::reload(&harness, &run)
        .await
        .assert_completed()
        .assert_counts(2, Some(2))
        .assert_batch_sizes(&[2]);
    let grace = harness.records.get(employees::SOURCE, 2).unwrap();
    assert_eq!(grace.get("role"), Some(json!("manager")));
}

#[tokio::test]
async fn test_enum_option_selects_listed_values() {
    let harness = HarnessBuilder::new()
        .with_employees(vec![
            Employee::new(1, "Ada", 25).with_color("red"),
            Employee::new(2, "Grace", 30).with_color("blue"),
            Employee::new(3, "Linus", 25).with_color("green"),
        ])
        .build();

    let run = harness
        .create(NewRun::new(PaintEmployees::NAME).option("colors", "red,green"))
        .await
        .unwrap();
    harness.drain().await;

    RunAssertions::reload(&harness, &run)
        .await
        .assert_completed()
        .assert_counts(2, Some(2));
    assert_eq!(employees::without_role(&harness.records), vec![2]);
}

#[tokio::test]
async fn test_enum_value_outside_the_allowed_set_is_accepted() {
    let harness = HarnessBuilder::new()
        .with_employees(vec![Employee::new(1, "Ada", 25).with_color("purple")])
        .build();

    let run = harness
        .create(NewRun::new(PaintEmployees::NAME).option("colors", "purple"))
        .await
        .unwrap();
    harness.drain().await;

    RunAssertions::reload(&harness, &run)
        .await
        .assert_completed()
        .assert_counts(1, Some(1));
}

#[tokio::test]
async fn test_declared_defaults_reach_processing() {
    let definition = Arc::new(TestBackfillWithDefaults::new());
    let harness = HarnessBuilder::new()
        .with_definition(definition.clone())
        .with_employees(employees::standard())
        .build();

    let run = harness
        .create(
            NewRun::new(TestBackfillWithDefaults::NAME)
                .option("verbose", "true")
                .option("threshold", "0.75"),
        )
        .await
        .unwrap();
    harness.drain().await;
    RunAssertions::reload(&harness, &run).await.assert_completed();

    let seen = definition.seen();
    assert_eq!(seen.len(), 3);
    let options = &seen[0];
    assert_eq!(options.boolean("dry_run"), Some(true));
    assert_eq!(options.boolean("verbose"), Some(true));
    assert_eq!(options.string("name"), Some("default_name"));
    assert_eq!(options.decimal("threshold"), Some(0.75));
    assert_eq!(options.date("since"), None);

    // Only the submitted options are persisted
    let run = harness.run(&run).await;
    assert_eq!(run.options.get("verbose"), Some(&json!("true")));
    assert!(run.options.get("dry_run").is_none());
}

#[tokio::test]
async fn test_option_form_prefills_values() {
    let harness = HarnessBuilder::new().build();

    let mut current = Map::new();
    current.insert("verbose".to_string(), json!(true));
    let fields = harness
        .orchestrator
        .option_form(TestBackfillWithDefaults::NAME, &current)
        .unwrap();

    let field = |name: &str| fields.iter().find(|f| f.name == name).unwrap();
    assert_eq!(field("dry_run").value, Some(json!(true)));
    assert_eq!(field("verbose").value, Some(json!(true)));
    assert_eq!(field("name").value, Some(json!("form_name")));
    assert_eq!(field("name").label, "NAME");
    assert_eq!(field("threshold").value, None);
    assert_eq!(field("dry_run").input, InputKind::Checkbox);

    let fields = harness
        .orchestrator
        .option_form(PaintEmployees::NAME, &Map::new())
        .unwrap();
    assert_eq!(fields[0].input, InputKind::MultiSelect);
    assert_eq!(fields[0].choices, vec!["red", "green", "blue"]);
    assert_eq!(fields[0].selected, fields[0].choices);

    assert!(matches!(
        harness.orchestrator.option_form("Nope", &Map::new()),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_validation_messages() {
    let harness = HarnessBuilder::new()
        .with_employees(employees::standard())
        .build();

    let errors = expect_validation(harness.create(NewRun::new("Nope")).await);
    assert_field_error(
        &errors,
        "backfill_class_name",
        ValidationErrorKind::UnknownDefinition,
        "Backfill class name must be a valid backfill definition",
    );

    let errors = expect_validation(harness.create(NewRun::new(ScopeLess::NAME)).await);
    assert!(errors.has(ValidationErrorKind::NotABackfillDefinition));

    let errors = expect_validation(
        harness
            .create(NewRun::new(AddRoleToEmployee::NAME).option("salary", 10))
            .await,
    );
    assert_field_error(
        &errors,
        "options",
        ValidationErrorKind::UnknownOption,
        "Options contains unknown attributes: salary",
    );

    let errors = expect_validation(
        harness
            .create(NewRun::new(AddRoleToEmployee::NAME).option("age", "forty"))
            .await,
    );
    assert!(errors.has(ValidationErrorKind::Cast));

    let errors = expect_validation(
        harness
            .create(NewRun::new(AddRoleToEmployee::NAME).option("age", 99))
            .await,
    );
    assert!(errors.has(ValidationErrorKind::EmptyScope));
    assert!(errors.full_messages()[0].starts_with("No records to process"));

    let errors = expect_validation(
        harness
            .create(
                NewRun::new(AddRoleToEmployee::NAME)
                    .batch_size(0)
                    .amount_of_elements(-1)
                    .start_at("not a date"),
            )
            .await,
    );
    assert!(errors.has(ValidationErrorKind::InvalidBatchSize));
    assert!(errors.has(ValidationErrorKind::InvalidAmountOfElements));
    assert!(errors.has(ValidationErrorKind::InvalidStartAt));

    assert_eq!(harness.runs.run_count(), 0);
}

#[tokio::test]
async fn test_enqueue_failure_marks_run_failed() {
    let queue = FailingJobQueue::new();
    let harness = HarnessBuilder::new()
        .with_employees(employees::standard())
        .with_queue(Arc::new(queue.clone()))
        .build();

    let result = harness.create(NewRun::new(AddRoleToEmployee::NAME)).await;
    assert!(matches!(result, Err(Error::Enqueue(_))));
    assert_eq!(queue.attempts(), 1);

    let runs = harness.orchestrator.list_runs(1, 10).await.unwrap();
    assert_eq!(runs.items.len(), 1);
    assert_eq!(runs.items[0].status, BackfillStatus::Failed);
    assert!(runs.items[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("Queue unavailable"));
}

#[tokio::test]
async fn test_failed_batch_can_be_retried() {
    let failing = Arc::new(FailingBackfill::failing_on([2]));
    let harness = HarnessBuilder::new()
        .with_definition(failing.clone())
        .with_employees(employees::standard())
        .build();

    let run = harness
        .create(NewRun::new(FailingBackfill::NAME).batch_size(2))
        .await
        .unwrap();
    let results = harness.drain().await;
    assert!(results.iter().any(|r| r.is_err()));

    RunAssertions::reload(&harness, &run)
        .await
        .assert_status(BackfillStatus::Running)
        .assert_counts(1, Some(3));

    let failed = harness
        .runs
        .batches_for(run.id)
        .into_iter()
        .find(|b| b.status == "failed")
        .unwrap();
    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .contains("cannot process employee 2"));

    failing.heal();
    harness
        .orchestrator
        .handle(drip_runtime::WorkItem::DripBatch { batch_id: failed.id })
        .await
        .unwrap();

    RunAssertions::reload(&harness, &run)
        .await
        .assert_completed()
        .assert_counts(3, Some(3))
        .assert_batches(BackfillStatus::Completed);
}

#[tokio::test]
async fn test_stopped_run_leaves_remaining_batches_unprocessed() {
    let harness = HarnessBuilder::new()
        .with_employees(employees::numbered(4))
        .build();

    let run = harness
        .create(NewRun::new(AddRoleToEmployee::NAME).batch_size(1))
        .await
        .unwrap();
    // Plan the run; batches stay queued
    let (_, planned) = harness.step().await.unwrap();
    planned.unwrap();
    assert_eq!(harness.queue.len(), 4);

    // First batch runs, then the operator stops the run
    harness.step().await.unwrap().1.unwrap();
    assert!(harness
        .orchestrator
        .stop_run(run.id)
        .await
        .unwrap()
        .is_applied());
    harness.drain().await;

    RunAssertions::reload(&harness, &run)
        .await
        .assert_status(BackfillStatus::Stopped)
        .assert_counts(1, Some(4));
    assert_eq!(employees::without_role(&harness.records), vec![2, 3, 4]);

    let stopped = harness
        .runs
        .batches_for(run.id)
        .iter()
        .filter(|b| b.status == "stopped")
        .count();
    assert_eq!(stopped, 3);
}

#[tokio::test]
async fn test_fallback_hooks_observe_a_full_lifecycle() {
    let recorder = HookRecorder::new();
    let harness = HarnessBuilder::new()
        .with_employees(employees::standard())
        .with_fallback_hooks(recorder.hook_set(&[HookScope::Run, HookScope::Batch]))
        .build();

    let run = harness
        .create(NewRun::new(AddRoleToEmployee::NAME).batch_size(2))
        .await
        .unwrap();
    harness.drain().await;
    RunAssertions::reload(&harness, &run).await.assert_completed();

    for status in ["enqueued", "running", "completed"] {
        assert_eq!(recorder.count(&format!("after_run_{}", status)), 1);
        assert_eq!(recorder.count(&format!("after_batch_{}", status)), 2);
    }
    assert_eq!(recorder.count("before_run_failed"), 0);
    assert!(
        recorder.position("after_run_running").unwrap()
            < recorder.position("before_batch_running").unwrap()
    );
    assert!(
        recorder.position("after_batch_completed").unwrap()
            < recorder.position("after_run_completed").unwrap()
    );
}

#[tokio::test]
async fn test_progress_and_listing() {
    let harness = HarnessBuilder::new()
        .with_employees(employees::numbered(5))
        .build();

    let run = harness
        .create(NewRun::new(AddRoleToEmployee::NAME).batch_size(2))
        .await
        .unwrap();
    let progress = harness.orchestrator.run_progress(run.id).await.unwrap();
    assert_eq!(progress.status, BackfillStatus::Enqueued);
    assert!(!progress.is_finished());

    harness.drain().await;
    let progress = harness.orchestrator.run_progress(run.id).await.unwrap();
    assert!(progress.is_finished());
    assert_eq!(progress.percent(), Some(100.0));

    let batches = harness.orchestrator.list_batches(run.id, 1, 2).await.unwrap();
    assert_eq!(batches.items.len(), 2);
    assert_eq!(batches.pagination.total_count, 3);
    assert!(batches.pagination.has_next());

    assert_eq!(
        harness.orchestrator.definition_names(),
        vec![
            AddRoleToEmployee::NAME,
            PaintEmployees::NAME,
            ScopeLess::NAME,
            TestBackfillWithDefaults::NAME,
        ]
    );
}
