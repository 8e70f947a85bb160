//! Lifecycle hook slots
//!
//! Hooks observe status transitions of runs and batches. For a target moving to
//! status `S` there are three slots: `before_{run|batch}_{S}`,
//! `around_{run|batch}_{S}` and `after_{run|batch}_{S}`. A [`HookSet`] holds the
//! callbacks registered for any subset of slots; definitions may carry one and
//! the runtime configuration carries a process-wide fallback.
//!
//! An around hook receives a [`Proceed`] continuation that performs the actual
//! state mutation. Returning without running it vetoes the transition.

use crate::status::BackfillStatus;
use crate::scope::RecordId;
use crate::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Kind of target a hook observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookScope {
    Run,
    Batch,
}

impl HookScope {
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Batch => "batch",
        }
    }
}

/// Position of a hook relative to the mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookTiming {
    Before,
    Around,
    After,
}

impl HookTiming {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Around => "around",
            Self::After => "after",
        }
    }
}

/// A named hook slot such as `around_batch_running`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookSlot {
    pub timing: HookTiming,
    pub scope: HookScope,
    pub status: BackfillStatus,
}

impl HookSlot {
    pub fn new(timing: HookTiming, scope: HookScope, status: BackfillStatus) -> Self {
        Self {
            timing,
            scope,
            status,
        }
    }
}

impl fmt::Display for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.timing.as_str(),
            self.scope.prefix(),
            self.status
        )
    }
}

/// Snapshot of the target handed to every hook of one transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookContext {
    pub scope: HookScope,

    /// Status the target is transitioning to
    pub status: BackfillStatus,

    /// Status the target had when the transition started
    pub previous_status: BackfillStatus,

    pub run_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub definition: String,
    pub batch_size: u32,
    pub start_id: Option<RecordId>,
    pub finish_id: Option<RecordId>,
    pub processed_count: i64,
    pub total_count: Option<i64>,
    pub error_message: Option<String>,
}

impl HookContext {
    pub fn slot(&self, timing: HookTiming) -> HookSlot {
        HookSlot::new(timing, self.scope, self.status)
    }
}

/// Callback for before/after slots
pub type TransitionCallback = Arc<dyn Fn(&HookContext) -> Result<()> + Send + Sync>;

/// Continuation handed to an around hook
pub struct Proceed<'a> {
    mutation: BoxFuture<'a, Result<()>>,
}

impl<'a> Proceed<'a> {
    pub fn new(mutation: BoxFuture<'a, Result<()>>) -> Self {
        Self { mutation }
    }

    /// Perform the wrapped state mutation
    pub async fn run(self) -> Result<()> {
        self.mutation.await
    }
}

impl fmt::Debug for Proceed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Proceed(..)")
    }
}

/// Hook wrapping a state mutation.
///
/// Implementations call `proceed.run().await` at most once. Not calling it
/// vetoes the transition.
#[async_trait]
pub trait AroundTransition: Send + Sync {
    async fn around(&self, ctx: &HookContext, proceed: Proceed<'_>) -> Result<()>;
}

type SlotKey = (HookScope, BackfillStatus);

/// Callbacks registered for a subset of hook slots
#[derive(Clone, Default)]
pub struct HookSet {
    before: HashMap<SlotKey, TransitionCallback>,
    around: HashMap<SlotKey, Arc<dyn AroundTransition>>,
    after: HashMap<SlotKey, TransitionCallback>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `before_{scope}_{status}` callback
    pub fn before<F>(mut self, scope: HookScope, status: BackfillStatus, callback: F) -> Self
    where
        F: Fn(&HookContext) -> Result<()> + Send + Sync + 'static,
    {
        self.before.insert((scope, status), Arc::new(callback));
        self
    }

    /// Register an `around_{scope}_{status}` hook
    pub fn around<H>(mut self, scope: HookScope, status: BackfillStatus, hook: H) -> Self
    where
        H: AroundTransition + 'static,
    {
        self.around.insert((scope, status), Arc::new(hook));
        self
    }

    /// Register an `after_{scope}_{status}` callback
    pub fn after<F>(mut self, scope: HookScope, status: BackfillStatus, callback: F) -> Self
    where
        F: Fn(&HookContext) -> Result<()> + Send + Sync + 'static,
    {
        self.after.insert((scope, status), Arc::new(callback));
        self
    }

    pub fn before_hook(&self, scope: HookScope, status: BackfillStatus) -> Option<&TransitionCallback> {
        self.before.get(&(scope, status))
    }

    pub fn around_hook(
        &self,
        scope: HookScope,
        status: BackfillStatus,
    ) -> Option<&Arc<dyn AroundTransition>> {
        self.around.get(&(scope, status))
    }

    pub fn after_hook(&self, scope: HookScope, status: BackfillStatus) -> Option<&TransitionCallback> {
        self.after.get(&(scope, status))
    }

    /// Returns true if a callback is registered for `slot`
    pub fn has(&self, slot: HookSlot) -> bool {
        let key = (slot.scope, slot.status);
        match slot.timing {
            HookTiming::Before => self.before.contains_key(&key),
            HookTiming::Around => self.around.contains_key(&key),
            HookTiming::After => self.after.contains_key(&key),
        }
    }

    /// Registered slots, sorted by name
    pub fn slots(&self) -> Vec<HookSlot> {
        let mut slots: Vec<HookSlot> = self
            .before
            .keys()
            .map(|(scope, status)| HookSlot::new(HookTiming::Before, *scope, *status))
            .chain(
                self.around
                    .keys()
                    .map(|(scope, status)| HookSlot::new(HookTiming::Around, *scope, *status)),
            )
            .chain(
                self.after
                    .keys()
                    .map(|(scope, status)| HookSlot::new(HookTiming::After, *scope, *status)),
            )
            .collect();
        slots.sort_by_key(|slot| slot.to_string());
        slots
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.around.is_empty() && self.after.is_empty()
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots: Vec<String> = self.slots().iter().map(ToString::to_string).collect();
        f.debug_struct("HookSet").field("slots", &slots).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use parking_lot::Mutex;

    struct Skip;

    #[async_trait]
    impl AroundTransition for Skip {
        async fn around(&self, _ctx: &HookContext, _proceed: Proceed<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn context() -> HookContext {
        HookContext {
            scope: HookScope::Batch,
            status: BackfillStatus::Running,
            previous_status: BackfillStatus::Enqueued,
            run_id: Uuid::new_v4(),
            batch_id: Some(Uuid::new_v4()),
            definition: "AddRoleToEmployee".to_string(),
            batch_size: 100,
            start_id: Some(1),
            finish_id: Some(100),
            processed_count: 0,
            total_count: Some(100),
            error_message: None,
        }
    }

    #[test]
    fn test_slot_names() {
        let slot = HookSlot::new(HookTiming::Around, HookScope::Batch, BackfillStatus::Running);
        assert_eq!(slot.to_string(), "around_batch_running");

        let slot = HookSlot::new(HookTiming::Before, HookScope::Run, BackfillStatus::Enqueued);
        assert_eq!(slot.to_string(), "before_run_enqueued");
    }

    #[test]
    fn test_registration_and_lookup() {
        let hooks = HookSet::new()
            .before(HookScope::Run, BackfillStatus::Completed, |_| Ok(()))
            .around(HookScope::Batch, BackfillStatus::Running, Skip)
            .after(HookScope::Batch, BackfillStatus::Failed, |_| Ok(()));

        assert!(hooks.before_hook(HookScope::Run, BackfillStatus::Completed).is_some());
        assert!(hooks.before_hook(HookScope::Batch, BackfillStatus::Completed).is_none());
        assert!(hooks.around_hook(HookScope::Batch, BackfillStatus::Running).is_some());
        assert!(hooks.has(HookSlot::new(
            HookTiming::After,
            HookScope::Batch,
            BackfillStatus::Failed
        )));

        let names: Vec<String> = hooks.slots().iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            vec!["after_batch_failed", "around_batch_running", "before_run_completed"]
        );
    }

    #[tokio::test]
    async fn test_proceed_runs_mutation_once() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let proceed = Proceed::new(Box::pin(async move {
            *counter.lock() += 1;
            Ok(())
        }));

        proceed.run().await.unwrap();
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_around_hook_can_skip_continuation() {
        let mutated = Arc::new(Mutex::new(false));
        let flag = mutated.clone();
        let proceed = Proceed::new(Box::pin(async move {
            *flag.lock() = true;
            Ok(())
        }));

        Skip.around(&context(), proceed).await.unwrap();
        assert!(!*mutated.lock());
    }

    #[test]
    fn test_callback_errors_surface() {
        let hooks = HookSet::new().before(HookScope::Run, BackfillStatus::Running, |ctx| {
            Err(Error::Hook(format!("refusing {}", ctx.definition)))
        });
        let callback = hooks
            .before_hook(HookScope::Run, BackfillStatus::Running)
            .unwrap();
        assert!(matches!(callback(&context()), Err(Error::Hook(_))));
    }
}
