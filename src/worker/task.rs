//! Task handler capability and run outcome types.

use std::any::Any;
use std::future::Future;

use futures::future::BoxFuture;
use serde_json::Value;

/// What a handler produces: a JSON result or a failure.
pub type TaskResult = anyhow::Result<Value>;

/// User-supplied work for one task name.
///
/// `run` is called synchronously and returns the future that does the work.
/// Anything that panics inside `run` itself, before the future is returned,
/// counts as a premature failure; panics while the future is polled count as
/// ordinary run failures.
///
/// Any `Fn(Value) -> impl Future<Output = TaskResult>` closure is a handler.
pub trait TaskHandler: Send + Sync {
    fn run(&self, params: Value) -> BoxFuture<'static, TaskResult>;
}

impl<F, Fut> TaskHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    fn run(&self, params: Value) -> BoxFuture<'static, TaskResult> {
        Box::pin(self(params))
    }
}

/// How one delivery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Handler succeeded; delivery acked.
    Succeeded,
    /// Handler failed; delivery acked and service continues.
    Failed { error: String },
    /// Invoking the handler failed before it produced a future; not acked.
    Premature { error: String },
    /// Handler failed with `exit_on_failure`; delivery acked, process terminated.
    Terminated { error: String, code: i32 },
}

impl RunOutcome {
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::Failed { error } | Self::Premature { error } | Self::Terminated { error, .. } => {
                Some(error)
            }
        }
    }
}

/// Render a handler error for the worklog.
///
/// The `Debug` form carries the cause chain and, when captured, the
/// backtrace; `Display` is the fallback.
pub fn normalize_error(err: &anyhow::Error) -> String {
    let detailed = format!("{err:?}");
    if detailed.trim().is_empty() {
        err.to_string()
    } else {
        detailed
    }
}

/// Render a panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
