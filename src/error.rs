//! Error types for the telemetry agent.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading the agent configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read the config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse the config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("store.file.path is empty")]
    EmptyStorePath,
}

/// Errors raised by a persister backend.
///
/// Everything here is transient from the workers' point of view: the writer
/// keeps its staging and retries on the next trigger, the publisher skips the
/// tick and fetches again on the next one.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The bounded in-memory store cannot take another batch.
    #[error("store is full ({capacity} batches)")]
    CapacityExhausted { capacity: usize },

    /// A persisted file held no payload; it has been deleted so that fetches
    /// stop tripping over it. Not a delivery failure.
    #[error("file {path} is empty, hence removed")]
    EmptyEntryRemoved { path: PathBuf },

    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors raised while serving the ingestion RPC. Initialisation failures
/// land on the supervisor's fatal channel and terminate the process.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("could not read TLS material from {path}: {source}")]
    TlsMaterial {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("adapter i/o error: {0}")]
    Io(#[from] std::io::Error),
}
