//! Cron scheduler — turns cron ticks into task starts.
//!
//! Every task name gets one publish chain: a queue drained by a single
//! background task. Ticks append to the chain, so for a given name a publish
//! only begins after the previous one has settled. Handler execution is not
//! serialized here, only the publish calls.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::bus::TaskStarter;
use crate::error::ScheduleError;

/// A registered recurring trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    pub cron_expression: String,
    pub task_name: String,
    pub params: Value,
}

/// Handle to a running cron timer.
#[derive(Debug)]
pub struct ScheduleHandle {
    job: ScheduledJob,
    handle: JoinHandle<()>,
}

impl ScheduleHandle {
    pub fn job(&self) -> &ScheduledJob {
        &self.job
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the timer. Publishes already queued on the chain still run.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

/// Drives task starts from cron schedules.
#[derive(Clone)]
pub struct Scheduler {
    starter: TaskStarter,
    /// Publish chain per task name.
    chains: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>>,
}

impl Scheduler {
    pub fn new(starter: TaskStarter) -> Self {
        Self {
            starter,
            chains: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a timer that ticks `task_name` with `params` on every fire of
    /// `cron_expression`.
    pub fn schedule(
        &self,
        cron_expression: &str,
        task_name: &str,
        params: Value,
    ) -> Result<ScheduleHandle, ScheduleError> {
        let schedule = parse(cron_expression)?;
        let job = ScheduledJob {
            cron_expression: cron_expression.to_string(),
            task_name: task_name.to_string(),
            params,
        };

        let scheduler = self.clone();
        let ticking = job.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    tracing::info!(task = %ticking.task_name, "cron schedule exhausted");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                tracing::debug!(task = %ticking.task_name, "trying to start");
                scheduler
                    .tick(&ticking.task_name, ticking.params.clone())
                    .await;
            }
        });

        tracing::info!(
            task = %job.task_name,
            cron = %job.cron_expression,
            next = ?next_fire(cron_expression).ok().flatten(),
            "scheduled"
        );

        Ok(ScheduleHandle { job, handle })
    }

    /// One tick: queue a publish of `task_name` behind any earlier ones.
    pub async fn tick(&self, task_name: &str, params: Value) {
        let mut chains = self.chains.lock().await;
        let chain = chains
            .entry(task_name.to_string())
            .or_insert_with(|| spawn_chain(self.starter.clone(), task_name.to_string()));

        if let Err(mpsc::error::SendError(params)) = chain.send(params) {
            // The drain task is gone; start a fresh chain.
            let fresh = spawn_chain(self.starter.clone(), task_name.to_string());
            let _ = fresh.send(params);
            *chain = fresh;
        }
    }

    /// Number of task names with a publish chain.
    pub async fn chain_count(&self) -> usize {
        self.chains.lock().await.len()
    }
}

fn spawn_chain(starter: TaskStarter, task_name: String) -> mpsc::UnboundedSender<Value> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    tokio::spawn(async move {
        while let Some(params) = rx.recv().await {
            if let Err(e) = starter.start(&task_name, params).await {
                tracing::warn!(task = %task_name, "scheduled publish failed: {e}");
            }
        }
    });
    tx
}

fn parse(cron_expression: &str) -> Result<cron::Schedule, ScheduleError> {
    cron::Schedule::from_str(cron_expression).map_err(|e| ScheduleError::InvalidCron {
        expression: cron_expression.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a cron expression and compute the next fire time from now.
pub fn next_fire(cron_expression: &str) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    Ok(parse(cron_expression)?.upcoming(Utc).next())
}
