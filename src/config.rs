//! Configuration types.

use serde::Deserialize;

/// Default number of concurrent deliveries per handler.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Per-handler options for `Joba::handle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOptions {
    /// Maximum in-flight deliveries, enforced by the bus.
    pub concurrency: usize,
    /// Terminate the process after a failed run instead of continuing.
    pub exit_on_failure: bool,
    /// Whether invocation params are written to the worklog.
    ///
    /// `Some(true)` attaches params when the record is created. `None` attaches
    /// them only when a run fails. `Some(false)` never attaches them.
    pub log_params: Option<bool>,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            exit_on_failure: false,
            log_params: None,
        }
    }
}

impl HandleOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_exit_on_failure(mut self, exit_on_failure: bool) -> Self {
        self.exit_on_failure = exit_on_failure;
        self
    }

    pub fn with_log_params(mut self, log_params: bool) -> Self {
        self.log_params = Some(log_params);
        self
    }

    /// Params to store when the worklog record is created.
    pub(crate) fn params_on_create(&self) -> bool {
        self.log_params == Some(true)
    }

    /// Params to store when a failed run is finalized.
    pub(crate) fn params_on_failure(&self) -> bool {
        self.log_params != Some(false)
    }
}

/// A named provider plus its connection settings, resolved through a
/// `ProviderRegistry`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    #[serde(default)]
    pub connection: serde_json::Value,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, connection: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct JobaConfig {
    /// Bus provider name.
    pub bus: String,
    /// Path of the libSQL worklog database.
    pub db_path: String,
    /// Cron expression for the built-in heartbeat task, if any.
    pub heartbeat_cron: Option<String>,
}

impl Default for JobaConfig {
    fn default() -> Self {
        Self {
            bus: "memory".to_string(),
            db_path: "./data/joba.db".to_string(),
            heartbeat_cron: None,
        }
    }
}

impl JobaConfig {
    /// Load from `JOBA_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bus: std::env::var("JOBA_BUS").unwrap_or(defaults.bus),
            db_path: std::env::var("JOBA_DB_PATH").unwrap_or(defaults.db_path),
            heartbeat_cron: std::env::var("JOBA_HEARTBEAT_CRON")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn bus_descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new(self.bus.clone(), serde_json::Value::Null)
    }

    pub fn persistence_descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor::new("libsql", serde_json::json!({ "path": self.db_path }))
    }
}
