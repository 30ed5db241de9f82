//! Error types for joba.

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Pipe error: {0}")]
    Pipe(#[from] PipeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Unknown {kind} provider: {name}")]
    UnknownProvider { kind: String, name: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Message bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Publish to {name} failed: {reason}")]
    PublishFailed { name: String, reason: String },

    #[error("Subscribe to {name} failed: {reason}")]
    SubscribeFailed { name: String, reason: String },

    #[error("Bus is closed")]
    Closed,
}

/// Cron scheduling errors.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
}

/// Result routing errors.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("{kind} pipe from {task} expects a sequence result")]
    NotASequence { task: String, kind: &'static str },
}

/// Result type alias for the orchestrator.
pub type Result<T> = std::result::Result<T, Error>;
