//! Call scope propagation.
//!
//! While a handler runs, the `context$` and `meta$` of the request it is
//! serving are bound to the task. `act` reads the bound `context$` and
//! copies it into nested requests that do not set their own. `meta$` is
//! visible to the handler but is never inherited.

use std::future::Future;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::Instrument;

tokio::task_local! {
    static CALL_SCOPE: CallScope;
}

/// Values bound to a handler invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallScope {
    pub context: Option<Value>,
    pub meta: Option<Value>,
}

impl CallScope {
    pub fn new(context: Option<Value>, meta: Option<Value>) -> Self {
        Self { context, meta }
    }
}

/// The scope bound to the current task, if any.
pub fn current_scope() -> Option<CallScope> {
    CALL_SCOPE.try_with(|scope| scope.clone()).ok()
}

/// `context$` of the request being served by the current task.
pub fn current_context() -> Option<Value> {
    CALL_SCOPE
        .try_with(|scope| scope.context.clone())
        .ok()
        .flatten()
}

/// `meta$` of the request being served by the current task.
pub fn current_meta() -> Option<Value> {
    CALL_SCOPE.try_with(|scope| scope.meta.clone()).ok().flatten()
}

/// Run a future with `scope` bound.
pub async fn with_scope<F, T>(scope: CallScope, future: F) -> T
where
    F: Future<Output = T>,
{
    let span = tracing::debug_span!("call_scope", has_context = scope.context.is_some());
    CALL_SCOPE.scope(scope, future.instrument(span)).await
}

/// Run a closure with `scope` bound.
pub fn sync_scope<R>(scope: CallScope, f: impl FnOnce() -> R) -> R {
    CALL_SCOPE.sync_scope(scope, f)
}

/// Spawn a task that keeps the current scope.
pub fn spawn_in_scope<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current_scope() {
        Some(scope) => tokio::spawn(with_scope(scope, future)),
        None => tokio::spawn(future),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_no_scope_outside_handlers() {
        assert!(current_scope().is_none());
        assert!(current_context().is_none());
    }

    #[tokio::test]
    async fn test_scope_is_visible_inside() {
        let scope = CallScope::new(Some(json!({"user": 1})), Some(json!("m")));
        let (context, meta) = with_scope(scope, async {
            tokio::task::yield_now().await;
            (current_context(), current_meta())
        })
        .await;

        assert_eq!(context, Some(json!({"user": 1})));
        assert_eq!(meta, Some(json!("m")));
        assert!(current_context().is_none());
    }

    #[tokio::test]
    async fn test_spawn_in_scope_carries_scope() {
        let scope = CallScope::new(Some(json!("ctx")), None);
        let inner = with_scope(scope, async { spawn_in_scope(async { current_context() }) })
            .await
            .await
            .unwrap();
        assert_eq!(inner, Some(json!("ctx")));
    }

    #[tokio::test]
    async fn test_plain_spawn_loses_scope() {
        let scope = CallScope::new(Some(json!("ctx")), None);
        let inner = with_scope(scope, async { tokio::spawn(async { current_context() }) })
            .await
            .await
            .unwrap();
        assert_eq!(inner, None);
    }

    #[test]
    fn test_sync_scope() {
        let scope = CallScope::new(None, Some(json!(7)));
        assert_eq!(sync_scope(scope, current_meta), Some(json!(7)));
    }
}
