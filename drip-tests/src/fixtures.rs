//! Test data factories for Drip
//!
//! Employee records plus a handful of backfill definitions covering the
//! option types, both processing strategies and failure paths.

use async_trait::async_trait;
use drip_core::{
    BackfillDefinition, InMemoryRecordStore, OptionSpec, OptionType, OptionsSchema, Page,
    Predicate, ProcessContext, ProcessingStrategy, Record, RecordId, Scope, TypedOptions,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// Employee record factories
pub mod employees {
    use super::*;

    /// Record source backing the employee fixtures
    pub const SOURCE: &str = "employees";

    /// An employee seed row
    #[derive(Debug, Clone)]
    pub struct Employee {
        pub id: RecordId,
        pub name: String,
        pub age: i64,
        pub role: Option<String>,
        pub color: Option<String>,
    }

    impl Employee {
        pub fn new(id: RecordId, name: &str, age: i64) -> Self {
            Self {
                id,
                name: name.to_string(),
                age,
                role: None,
                color: None,
            }
        }

        pub fn with_role(mut self, role: &str) -> Self {
            self.role = Some(role.to_string());
            self
        }

        pub fn with_color(mut self, color: &str) -> Self {
            self.color = Some(color.to_string());
            self
        }

        pub fn fields(&self) -> Value {
            json!({"name": self.name, "age": self.age, "role": self.role, "color": self.color})
        }
    }

    /// Three employees without a role
    pub fn standard() -> Vec<Employee> {
        vec![
            Employee::new(1, "Ada", 25),
            Employee::new(2, "Grace", 30),
            Employee::new(3, "Linus", 25),
        ]
    }

    /// `count` employees without a role; even ids are 30, odd ids 25
    pub fn numbered(count: i64) -> Vec<Employee> {
        (1..=count)
            .map(|id| Employee::new(id, &format!("employee-{}", id), if id % 2 == 0 { 30 } else { 25 }))
            .collect()
    }

    /// Insert `employees` into the in-memory store
    pub fn seed(store: &InMemoryRecordStore, employees: &[Employee]) {
        for employee in employees {
            store.insert(SOURCE, employee.id, employee.fields());
        }
    }

    /// Ids of seeded employees whose role is still null
    pub fn without_role(store: &InMemoryRecordStore) -> Vec<RecordId> {
        store
            .all(SOURCE)
            .into_iter()
            .filter(|r| matches!(r.get("role"), None | Some(Value::Null)))
            .map(|r| r.id)
            .collect()
    }
}

/// Backfill definition factories
pub mod definitions {
    use super::*;

    fn role_changes(role: &str) -> Map<String, Value> {
        let mut changes = Map::new();
        changes.insert("role".to_string(), json!(role));
        changes
    }

    /// Gives every employee without a role the `intern` role, one update per page
    pub struct AddRoleToEmployee {
        schema: OptionsSchema,
    }

    impl AddRoleToEmployee {
        pub const NAME: &'static str = "AddRoleToEmployee";

        pub fn new() -> Self {
            Self {
                schema: OptionsSchema::builder()
                    .option(OptionSpec::new("age", OptionType::Integer).filter_on("age"))
                    .option(OptionSpec::new("name", OptionType::String).filter_on("name"))
                    .build()
                    .expect("AddRoleToEmployee schema"),
            }
        }
    }

    impl Default for AddRoleToEmployee {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl BackfillDefinition for AddRoleToEmployee {
        fn name(&self) -> &str {
            Self::NAME
        }

        fn options_schema(&self) -> &OptionsSchema {
            &self.schema
        }

        fn scope(&self, options: &TypedOptions) -> drip_core::Result<Scope> {
            Ok(Scope::from(employees::SOURCE)
                .filter(Predicate::is_null("role"))
                .apply(self.schema.predicates(options)))
        }

        fn strategy(&self) -> ProcessingStrategy {
            ProcessingStrategy::WholeBatch
        }

        async fn process_batch(&self, ctx: &ProcessContext<'_>, page: &Page) -> drip_core::Result<()> {
            ctx.store.update_all(page.scope(), &role_changes("intern")).await?;
            Ok(())
        }
    }

    /// Declares one option of each scalar type with defaults; records what it saw
    pub struct TestBackfillWithDefaults {
        schema: OptionsSchema,
        seen: Mutex<Vec<TypedOptions>>,
    }

    impl TestBackfillWithDefaults {
        pub const NAME: &'static str = "TestBackfillWithDefaults";

        pub fn new() -> Self {
            Self {
                schema: OptionsSchema::builder()
                    .option(OptionSpec::new("dry_run", OptionType::Boolean).default_value(true))
                    .option(OptionSpec::new("verbose", OptionType::Boolean).default_value(false))
                    .option(
                        OptionSpec::new("name", OptionType::String)
                            .default_value("default_name")
                            .form_default("form_name"),
                    )
                    .option(OptionSpec::new("threshold", OptionType::Decimal))
                    .option(OptionSpec::new("since", OptionType::Date))
                    .build()
                    .expect("TestBackfillWithDefaults schema"),
                seen: Mutex::new(Vec::new()),
            }
        }

        /// Options bound to every processed element, in processing order
        pub fn seen(&self) -> Vec<TypedOptions> {
            self.seen.lock().clone()
        }
    }

    impl Default for TestBackfillWithDefaults {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl BackfillDefinition for TestBackfillWithDefaults {
        fn name(&self) -> &str {
            Self::NAME
        }

        fn options_schema(&self) -> &OptionsSchema {
            &self.schema
        }

        fn scope(&self, _options: &TypedOptions) -> drip_core::Result<Scope> {
            Ok(Scope::from(employees::SOURCE))
        }

        async fn process_element(&self, ctx: &ProcessContext<'_>, _record: &Record) -> drip_core::Result<()> {
            self.seen.lock().push(ctx.options.clone());
            Ok(())
        }
    }

    /// Enum option over colours; processes employees whose `color` is selected
    pub struct PaintEmployees {
        schema: OptionsSchema,
    }

    impl PaintEmployees {
        pub const NAME: &'static str = "PaintEmployees";
        pub const COLORS: [&'static str; 3] = ["red", "green", "blue"];

        pub fn new() -> Self {
            Self {
                schema: OptionsSchema::builder()
                    .option(
                        OptionSpec::new("colors", OptionType::enumeration(Self::COLORS))
                            .filter_on("color"),
                    )
                    .build()
                    .expect("PaintEmployees schema"),
            }
        }
    }

    impl Default for PaintEmployees {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl BackfillDefinition for PaintEmployees {
        fn name(&self) -> &str {
            Self::NAME
        }

        fn options_schema(&self) -> &OptionsSchema {
            &self.schema
        }

        fn scope(&self, options: &TypedOptions) -> drip_core::Result<Scope> {
            Ok(Scope::from(employees::SOURCE).apply(self.schema.predicates(options)))
        }

        async fn process_element(&self, ctx: &ProcessContext<'_>, record: &Record) -> drip_core::Result<()> {
            ctx.store
                .update(employees::SOURCE, record.id, &role_changes("painter"))
                .await
        }
    }

    /// Fails on the listed record ids until they are healed
    pub struct FailingBackfill {
        failing: Mutex<HashSet<RecordId>>,
    }

    impl FailingBackfill {
        pub const NAME: &'static str = "FailingBackfill";

        pub fn failing_on<I: IntoIterator<Item = RecordId>>(ids: I) -> Self {
            Self {
                failing: Mutex::new(ids.into_iter().collect()),
            }
        }

        /// Stop failing on every record
        pub fn heal(&self) {
            self.failing.lock().clear();
        }
    }

    #[async_trait]
    impl BackfillDefinition for FailingBackfill {
        fn name(&self) -> &str {
            Self::NAME
        }

        fn scope(&self, _options: &TypedOptions) -> drip_core::Result<Scope> {
            Ok(Scope::from(employees::SOURCE))
        }

        async fn process_element(&self, _ctx: &ProcessContext<'_>, record: &Record) -> drip_core::Result<()> {
            if self.failing.lock().contains(&record.id) {
                return Err(anyhow::anyhow!("cannot process employee {}", record.id).into());
            }
            Ok(())
        }
    }

    /// A definition that never declares a scope
    pub struct ScopeLess;

    impl ScopeLess {
        pub const NAME: &'static str = "ScopeLess";
    }

    #[async_trait]
    impl BackfillDefinition for ScopeLess {
        fn name(&self) -> &str {
            Self::NAME
        }
    }

    /// Every standard definition, ready to register
    pub fn all() -> Vec<Arc<dyn BackfillDefinition>> {
        vec![
            Arc::new(AddRoleToEmployee::new()),
            Arc::new(TestBackfillWithDefaults::new()),
            Arc::new(PaintEmployees::new()),
            Arc::new(ScopeLess),
        ]
    }
}
