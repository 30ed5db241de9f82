//! Worklog recorder — creates a record when a run begins and finalizes it
//! once the run settles.
//!
//! Creation is spawned rather than awaited, so a handler can start (and even
//! finish) before its record exists. [`WorklogRecorder::finish`] waits for the
//! pending creation before writing the update.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::DatabaseError;
use crate::store::{NewWorklogItem, WorklogItem, WorklogStore, WorklogUpdate};

/// A worklog record whose creation may still be in flight.
#[derive(Debug)]
pub struct PendingWorklog {
    name: String,
    creation: JoinHandle<Result<WorklogItem, DatabaseError>>,
}

impl PendingWorklog {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone)]
pub struct WorklogRecorder {
    store: Arc<dyn WorklogStore>,
}

impl WorklogRecorder {
    pub fn new(store: Arc<dyn WorklogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn WorklogStore> {
        &self.store
    }

    /// Request creation of a record for a run of `name` starting now.
    pub fn begin(&self, name: &str, params: Option<Value>) -> PendingWorklog {
        let store = Arc::clone(&self.store);
        let item = NewWorklogItem {
            name: name.to_string(),
            started_at: Utc::now(),
            params,
        };
        PendingWorklog {
            name: name.to_string(),
            creation: tokio::spawn(async move { store.create_worklog_item(item).await }),
        }
    }

    /// Finalize the record. `params: None` keeps whatever was stored at creation.
    pub async fn finish(
        &self,
        pending: PendingWorklog,
        error: Option<String>,
        params: Option<Value>,
    ) -> Result<WorklogItem, DatabaseError> {
        let item = pending.creation.await.map_err(|e| {
            DatabaseError::Query(format!(
                "worklog creation for {} did not complete: {e}",
                pending.name
            ))
        })??;

        let update = WorklogUpdate {
            finished_at: Utc::now(),
            error,
            params,
        };
        self.store.update_worklog_item(&item, update.clone()).await?;

        Ok(WorklogItem {
            finished_at: Some(update.finished_at),
            params: update.params.or(item.params.clone()),
            error: update.error,
            ..item
        })
    }
}
