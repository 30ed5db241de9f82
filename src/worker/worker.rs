//! Per-task worker: runs deliveries for one registered handler.
//!
//! Lifecycle of a delivery:
//! `created → dispatched → succeeded | failed → logged → acked | terminated`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::bus::{Bus, Delivery, DeliveryHandler, Subscription};
use crate::config::HandleOptions;
use crate::error::BusError;
use crate::pipe::PipeRouter;
use crate::worker::task::{RunOutcome, TaskHandler, normalize_error, panic_message};
use crate::worklog::{PendingWorklog, WorklogRecorder};

/// Exit status for a fatal task failure (`EX_TEMPFAIL`): the operator is
/// expected to restart the process.
pub const EXIT_TEMPFAIL: i32 = 75;

/// Ends the process after a fatal task failure.
pub trait Terminator: Send + Sync {
    fn terminate(&self, code: i32);
}

/// Calls `std::process::exit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTerminator;

impl Terminator for ProcessTerminator {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

/// A handler bound to a task name.
#[derive(Clone)]
pub struct TaskRegistration {
    pub name: String,
    pub handler: Arc<dyn TaskHandler>,
    pub options: HandleOptions,
}

/// Shared dependencies for workers.
#[derive(Clone)]
pub struct WorkerDeps {
    pub recorder: WorklogRecorder,
    pub pipes: Arc<PipeRouter>,
    pub terminator: Arc<dyn Terminator>,
}

/// Worker for one task registration.
#[derive(Clone)]
pub struct Worker {
    registration: Arc<TaskRegistration>,
    deps: WorkerDeps,
}

/// How the handler invocation ended, before acking and logging.
enum Execution {
    Succeeded(Value),
    Failed(String),
    Premature(String),
}

impl Worker {
    pub fn new(registration: TaskRegistration, deps: WorkerDeps) -> Self {
        Self {
            registration: Arc::new(registration),
            deps,
        }
    }

    fn name(&self) -> &str {
        &self.registration.name
    }

    fn options(&self) -> &HandleOptions {
        &self.registration.options
    }

    /// Subscribe this worker to its task on `bus`.
    pub async fn subscribe(self, bus: &dyn Bus) -> Result<Subscription, BusError> {
        let name = self.registration.name.clone();
        let concurrency = self.registration.options.concurrency.max(1);
        let worker = Arc::new(self);
        let handler: DeliveryHandler = Arc::new(move |delivery: Delivery| -> BoxFuture<'static, ()> {
            let worker = Arc::clone(&worker);
            Box::pin(async move {
                worker.process(delivery).await;
            })
        });
        let subscription = bus.subscribe(&name, concurrency, handler).await?;
        info!(task = %name, concurrency, "handler registered");
        Ok(subscription)
    }

    /// Run one delivery through the full lifecycle.
    pub async fn process(&self, delivery: Delivery) -> RunOutcome {
        let Delivery { params, ack } = delivery;
        debug!(task = %self.name(), "running");

        let logged_params = self.options().params_on_create().then(|| params.clone());
        let pending = self.deps.recorder.begin(self.name(), logged_params);

        match self.execute(params.clone()).await {
            Execution::Succeeded(result) => {
                ack.ack();
                debug!(task = %self.name(), "succeeded running");
                // Downstream tasks do not wait on the worklog.
                let worker = self.clone();
                tokio::spawn(async move { worker.finalize(pending, None, None).await });
                if let Err(e) = self.deps.pipes.run(self.name(), &result).await {
                    error!(task = %self.name(), "piping failed: {e}");
                }
                RunOutcome::Succeeded
            }
            Execution::Failed(error) => {
                let failure_params = self.options().params_on_failure().then_some(params);
                self.finalize(pending, Some(error.clone()), failure_params)
                    .await;

                if self.options().exit_on_failure {
                    error!(task = %self.name(), error = %error, "failed running, shutting down");
                    ack.ack();
                    self.deps.terminator.terminate(EXIT_TEMPFAIL);
                    RunOutcome::Terminated {
                        error,
                        code: EXIT_TEMPFAIL,
                    }
                } else {
                    warn!(task = %self.name(), error = %error, "failed running but proceeding further");
                    ack.ack();
                    RunOutcome::Failed { error }
                }
            }
            Execution::Premature(error) => {
                error!(task = %self.name(), error = %error, "prematurely failed running");
                let failure_params = self.options().params_on_failure().then_some(params);
                self.finalize(pending, Some(error.clone()), failure_params)
                    .await;
                // Left unacked; redelivery is up to the bus.
                drop(ack);
                RunOutcome::Premature { error }
            }
        }
    }

    async fn execute(&self, params: Value) -> Execution {
        let handler = Arc::clone(&self.registration.handler);
        let invoked = std::panic::catch_unwind(AssertUnwindSafe(|| handler.run(params)));
        let future = match invoked {
            Ok(future) => future,
            Err(payload) => return Execution::Premature(panic_message(payload)),
        };

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(result)) => Execution::Succeeded(result),
            Ok(Err(err)) => Execution::Failed(normalize_error(&err)),
            Err(payload) => Execution::Failed(panic_message(payload)),
        }
    }

    /// Write the final worklog state. Store failures are logged, never raised.
    async fn finalize(
        &self,
        pending: PendingWorklog,
        error: Option<String>,
        params: Option<Value>,
    ) {
        match self.deps.recorder.finish(pending, error, params).await {
            Ok(item) => debug!(task = %self.name(), worklog_id = %item.id, "worklog finalized"),
            Err(e) => error!(task = %self.name(), "failed to finalize worklog: {e}"),
        }
    }
}
