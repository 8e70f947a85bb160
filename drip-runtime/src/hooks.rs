//! Hook dispatch around status transitions
//!
//! Every status-setting operation calls [`HookDispatcher::dispatch`] exactly
//! once, handing it the state mutation as a future. The dispatcher runs the
//! `before` hook, then the `around` hook with a continuation that performs the
//! mutation (or the mutation directly when no around hook exists), then the
//! `after` hook. Each slot resolves to the definition's hook when it has one,
//! otherwise to the configured fallback.

use crate::metrics::STATUS_TRANSITION_TOTAL;
use crate::{Error, Result};
use drip_core::{HookContext, HookSet, HookSlot, HookTiming, Proceed};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to the wrapped mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// The mutation ran and succeeded
    Applied,

    /// An around hook returned without running the mutation
    Vetoed,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Vetoed => "vetoed",
        }
    }
}

#[derive(Default)]
struct MutationState {
    ran: bool,
    error: Option<Error>,
}

/// Resolves and runs before/around/after hooks for one transition
#[derive(Clone, Default)]
pub struct HookDispatcher {
    fallback: HookSet,
}

impl HookDispatcher {
    pub fn new(fallback: HookSet) -> Self {
        Self { fallback }
    }

    pub fn fallback(&self) -> &HookSet {
        &self.fallback
    }

    /// Run the hooks for `ctx.status` around `mutation`.
    ///
    /// Errors from the mutation are returned unchanged, even if the around hook
    /// swallowed them. Errors raised by a hook are returned as [`Error::Hook`]
    /// and skip the remaining hooks.
    pub async fn dispatch<'a>(
        &self,
        definition_hooks: Option<&HookSet>,
        ctx: &HookContext,
        mutation: BoxFuture<'a, Result<()>>,
    ) -> Result<TransitionOutcome> {
        let result = self.run_hooks(definition_hooks, ctx, mutation).await;

        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "failure",
        };
        STATUS_TRANSITION_TOTAL
            .with_label_values(&[ctx.scope.prefix(), ctx.status.as_str(), outcome])
            .inc();

        result
    }

    async fn run_hooks<'a>(
        &self,
        definition_hooks: Option<&HookSet>,
        ctx: &HookContext,
        mutation: BoxFuture<'a, Result<()>>,
    ) -> Result<TransitionOutcome> {
        let scope = ctx.scope;
        let status = ctx.status;

        let before = definition_hooks
            .and_then(|hooks| hooks.before_hook(scope, status))
            .or_else(|| self.fallback.before_hook(scope, status));
        if let Some(callback) = before {
            callback(ctx).map_err(|e| hook_error(ctx.slot(HookTiming::Before), e))?;
        }

        let around = definition_hooks
            .and_then(|hooks| hooks.around_hook(scope, status))
            .or_else(|| self.fallback.around_hook(scope, status));

        let outcome = match around {
            None => {
                mutation.await?;
                TransitionOutcome::Applied
            }
            Some(hook) => {
                let state = Arc::new(Mutex::new(MutationState::default()));
                let shared = state.clone();
                let proceed = Proceed::new(Box::pin(async move {
                    shared.lock().ran = true;
                    match mutation.await {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            let message = e.to_string();
                            shared.lock().error = Some(e);
                            Err(drip_core::Error::TransitionAborted(message))
                        }
                    }
                }));

                let hook_result = hook.around(ctx, proceed).await;

                let (ran, mutation_error) = {
                    let mut state = state.lock();
                    (state.ran, state.error.take())
                };
                if let Some(e) = mutation_error {
                    return Err(e);
                }
                hook_result.map_err(|e| hook_error(ctx.slot(HookTiming::Around), e))?;

                if ran {
                    TransitionOutcome::Applied
                } else {
                    warn!(
                        slot = %ctx.slot(HookTiming::Around),
                        run_id = %ctx.run_id,
                        batch_id = ?ctx.batch_id,
                        "Transition vetoed by around hook"
                    );
                    TransitionOutcome::Vetoed
                }
            }
        };

        let after = definition_hooks
            .and_then(|hooks| hooks.after_hook(scope, status))
            .or_else(|| self.fallback.after_hook(scope, status));
        if let Some(callback) = after {
            callback(ctx).map_err(|e| hook_error(ctx.slot(HookTiming::After), e))?;
        }

        debug!(
            target_kind = scope.prefix(),
            status = %status,
            outcome = outcome.label(),
            "Transition dispatched"
        );
        Ok(outcome)
    }
}

fn hook_error(slot: HookSlot, e: drip_core::Error) -> Error {
    warn!(slot = %slot, error = %e, "Hook failed");
    Error::Hook(format!("{}: {}", slot, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use drip_core::{AroundTransition, BackfillStatus, HookScope};
    use uuid::Uuid;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Wrap(Log);

    #[async_trait]
    impl AroundTransition for Wrap {
        async fn around(&self, _ctx: &HookContext, proceed: Proceed<'_>) -> drip_core::Result<()> {
            self.0.lock().push("around_before".to_string());
            let result = proceed.run().await;
            self.0.lock().push("around_after".to_string());
            result
        }
    }

    struct Veto;

    #[async_trait]
    impl AroundTransition for Veto {
        async fn around(&self, _ctx: &HookContext, _proceed: Proceed<'_>) -> drip_core::Result<()> {
            Ok(())
        }
    }

    struct Swallow;

    #[async_trait]
    impl AroundTransition for Swallow {
        async fn around(&self, _ctx: &HookContext, proceed: Proceed<'_>) -> drip_core::Result<()> {
            let _ = proceed.run().await;
            Ok(())
        }
    }

    fn context(status: BackfillStatus) -> HookContext {
        HookContext {
            scope: HookScope::Run,
            status,
            previous_status: BackfillStatus::Enqueued,
            run_id: Uuid::new_v4(),
            batch_id: None,
            definition: "AddRoleToEmployee".to_string(),
            batch_size: 10,
            start_id: None,
            finish_id: None,
            processed_count: 0,
            total_count: None,
            error_message: None,
        }
    }

    fn recording(log: &Log, status: BackfillStatus) -> HookSet {
        let before = log.clone();
        let after = log.clone();
        HookSet::new()
            .before(HookScope::Run, status, move |_| {
                before.lock().push("before".to_string());
                Ok(())
            })
            .around(HookScope::Run, status, Wrap(log.clone()))
            .after(HookScope::Run, status, move |_| {
                after.lock().push("after".to_string());
                Ok(())
            })
    }

    fn mutation<'a>(log: &'a Log) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            log.lock().push("mutation".to_string());
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_hook_order_and_single_invocation() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let hooks = recording(&log, BackfillStatus::Running);
        let dispatcher = HookDispatcher::default();

        let outcome = dispatcher
            .dispatch(Some(&hooks), &context(BackfillStatus::Running), mutation(&log))
            .await
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Applied);
        assert_eq!(
            *log.lock(),
            vec!["before", "around_before", "mutation", "around_after", "after"]
        );
    }

    #[tokio::test]
    async fn test_missing_hooks_run_mutation_directly() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = HookDispatcher::default();

        let outcome = dispatcher
            .dispatch(None, &context(BackfillStatus::Completed), mutation(&log))
            .await
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Applied);
        assert_eq!(*log.lock(), vec!["mutation"]);
    }

    #[tokio::test]
    async fn test_fallback_used_per_slot() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let fallback = recording(&log, BackfillStatus::Running);
        let own_log = log.clone();
        let own = HookSet::new().before(HookScope::Run, BackfillStatus::Running, move |_| {
            own_log.lock().push("definition_before".to_string());
            Ok(())
        });
        let dispatcher = HookDispatcher::new(fallback);

        dispatcher
            .dispatch(Some(&own), &context(BackfillStatus::Running), mutation(&log))
            .await
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["definition_before", "around_before", "mutation", "around_after", "after"]
        );
    }

    #[tokio::test]
    async fn test_veto_skips_mutation_but_runs_after() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let after_log = log.clone();
        let hooks = HookSet::new()
            .around(HookScope::Run, BackfillStatus::Stopped, Veto)
            .after(HookScope::Run, BackfillStatus::Stopped, move |_| {
                after_log.lock().push("after".to_string());
                Ok(())
            });

        let outcome = HookDispatcher::default()
            .dispatch(Some(&hooks), &context(BackfillStatus::Stopped), mutation(&log))
            .await
            .unwrap();

        assert_eq!(outcome, TransitionOutcome::Vetoed);
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[tokio::test]
    async fn test_mutation_error_survives_swallowing_hook() {
        let hooks = HookSet::new().around(HookScope::Run, BackfillStatus::Running, Swallow);
        let failing: BoxFuture<'_, Result<()>> =
            Box::pin(async { Err(Error::InvalidState("boom".to_string())) });

        let result = HookDispatcher::default()
            .dispatch(Some(&hooks), &context(BackfillStatus::Running), failing)
            .await;

        assert!(matches!(result, Err(Error::InvalidState(msg)) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_before_hook_error_skips_mutation() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let hooks = HookSet::new().before(HookScope::Run, BackfillStatus::Running, |_| {
            Err(drip_core::Error::Hook("not today".to_string()))
        });

        let result = HookDispatcher::default()
            .dispatch(Some(&hooks), &context(BackfillStatus::Running), mutation(&log))
            .await;

        assert!(matches!(result, Err(Error::Hook(msg)) if msg.starts_with("before_run_running")));
        assert!(log.lock().is_empty());
    }
}
