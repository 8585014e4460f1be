use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapscribeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Job store error: {0}")]
    JobStore(#[from] crate::store::JobStoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Recognition client error: {0}")]
    Client(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Caller errors raised while a batch is still being uploaded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("Unknown or expired ingestion session: {0}")]
    UnknownSession(String),

    #[error("Ingestion session {0} received no images")]
    EmptyBatch(String),

    #[error("Invalid ingestion request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job queue is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SnapscribeError>;
