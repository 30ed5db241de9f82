//! libSQL backend — async `WorklogStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{NewWorklogItem, WorklogItem, WorklogStore, WorklogUpdate};

const WORKLOG_COLUMNS: &str = "id, name, started_at, finished_at, params, error";

/// libSQL worklog store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlWorklogStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlWorklogStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Worklog database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn json_to_value(params: &Option<serde_json::Value>) -> Result<libsql::Value, DatabaseError> {
    match params {
        Some(p) => serde_json::to_string(p)
            .map(libsql::Value::Text)
            .map_err(|e| DatabaseError::Serialization(format!("worklog params: {e}"))),
        None => Ok(libsql::Value::Null),
    }
}

fn row_to_worklog_item(row: &libsql::Row) -> Result<WorklogItem, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Serialization(format!("worklog id: {e}")))?;
    let id = id_str
        .parse::<Uuid>()
        .map_err(|e| DatabaseError::Serialization(format!("worklog id {id_str}: {e}")))?;

    let started_str: String = row.get(2).unwrap_or_default();
    let finished_str: Option<String> = row.get::<String>(3).ok();
    let params = match row.get::<String>(4).ok() {
        Some(raw) => Some(
            serde_json::from_str(&raw)
                .map_err(|e| DatabaseError::Serialization(format!("worklog params: {e}")))?,
        ),
        None => None,
    };

    Ok(WorklogItem {
        id,
        name: row.get(1).unwrap_or_default(),
        started_at: parse_datetime(&started_str),
        finished_at: finished_str.map(|s| parse_datetime(&s)),
        params,
        error: row.get::<String>(5).ok(),
    })
}

#[async_trait]
impl WorklogStore for LibSqlWorklogStore {
    async fn create_worklog_item(
        &self,
        item: NewWorklogItem,
    ) -> Result<WorklogItem, DatabaseError> {
        let id = Uuid::new_v4();
        let params_val = json_to_value(&item.params)?;

        self.conn()
            .execute(
                "INSERT INTO worklog (id, name, started_at, params) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.to_string(),
                    item.name.clone(),
                    item.started_at.to_rfc3339(),
                    params_val,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_worklog_item: {e}")))?;

        Ok(WorklogItem {
            id,
            name: item.name,
            started_at: item.started_at,
            finished_at: None,
            params: item.params,
            error: None,
        })
    }

    async fn update_worklog_item(
        &self,
        item: &WorklogItem,
        update: WorklogUpdate,
    ) -> Result<(), DatabaseError> {
        let error_val: libsql::Value = match update.error {
            Some(e) => libsql::Value::Text(e),
            None => libsql::Value::Null,
        };
        let params_val = json_to_value(&update.params)?;

        let count = self
            .conn()
            .execute(
                "UPDATE worklog SET finished_at = ?1, error = ?2, params = COALESCE(?3, params) WHERE id = ?4",
                params![
                    update.finished_at.to_rfc3339(),
                    error_val,
                    params_val,
                    item.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_worklog_item: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "worklog".to_string(),
                id: item.id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_worklog_item(&self, id: Uuid) -> Result<Option<WorklogItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {WORKLOG_COLUMNS} FROM worklog WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_worklog_item: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_worklog_item: {e}")))?
        {
            Some(row) => Ok(Some(row_to_worklog_item(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_worklog_items(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<WorklogItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {WORKLOG_COLUMNS} FROM worklog WHERE name = ?1 ORDER BY started_at DESC LIMIT ?2"
                ),
                params![name.to_string(), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_worklog_items: {e}")))?;

        let mut items = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_worklog_items: {e}")))?
        {
            items.push(row_to_worklog_item(&row)?);
        }
        Ok(items)
    }
}
