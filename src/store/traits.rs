//! `WorklogStore` trait — the persistence capability the orchestrator consumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DatabaseError;

/// A persisted record of one task invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorklogItem {
    pub id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub params: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Fields for a new worklog record.
#[derive(Debug, Clone)]
pub struct NewWorklogItem {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub params: Option<serde_json::Value>,
}

/// Fields written when a run finishes.
///
/// `params: None` leaves any params stored at creation untouched.
#[derive(Debug, Clone)]
pub struct WorklogUpdate {
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
    pub params: Option<serde_json::Value>,
}

/// Backend-agnostic worklog persistence.
#[async_trait]
pub trait WorklogStore: Send + Sync {
    /// Insert a record and return it with its assigned id.
    async fn create_worklog_item(&self, item: NewWorklogItem)
    -> Result<WorklogItem, DatabaseError>;

    /// Finalize a record.
    async fn update_worklog_item(
        &self,
        item: &WorklogItem,
        update: WorklogUpdate,
    ) -> Result<(), DatabaseError>;

    /// Look up a record by id.
    async fn get_worklog_item(&self, id: Uuid) -> Result<Option<WorklogItem>, DatabaseError>;

    /// Records for a task name, most recent first.
    async fn list_worklog_items(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<WorklogItem>, DatabaseError>;
}
