//! Persistence layer — worklog storage.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlWorklogStore;
pub use traits::{NewWorklogItem, WorklogItem, WorklogStore, WorklogUpdate};
