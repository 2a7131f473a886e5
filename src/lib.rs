//! Telemetry forwarding agent.
//!
//! Sits between the mesh policy plane and an external analytics endpoint:
//! records arrive over a gRPC adapter, are normalised to flat JSON objects
//! and buffered; a writer stages them into JSON-array batches and persists
//! them (memory, filesystem or database); a publisher periodically claims a
//! persisted batch, POSTs it to the analytics endpoint and commits or rolls
//! back the claim based on the HTTP outcome. Batches survive restarts in the
//! durable backends, giving at-least-once delivery.
//!
//! # Pipeline
//!
//! ```text
//! policy plane ──gRPC──▶ Adapter ──bounded channel──▶ Writer ──▶ Persister
//!                                                                   │
//!                         analytics endpoint ◀──HTTP POST── Publisher
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod proto;
pub mod publisher;
pub mod store;
pub mod writer;

pub use adapter::{Adapter, ADAPTER_PORT};
pub use config::Config;
pub use error::{AdapterError, ConfigError, StoreError};
pub use publisher::Publisher;
pub use store::{DatabasePersister, FilePersister, MemoryPersister, Persister, Transaction};
pub use writer::Writer;
