//! Pluggable durable store with transactional fetch.
//!
//! A persister holds opaque batch strings. `write` stores one batch;
//! `fetch` atomically claims one, hiding it from every other fetcher until
//! the returned [`Transaction`] is resolved: `commit` removes the entry for
//! good, `rollback` makes it fetchable again. A fetch that finds nothing
//! returns `Ok(None)` and carries no transaction - backends that had to open
//! an internal transaction to look (the database row lock) finalise it
//! themselves before returning.

mod database;
mod file;
mod memory;

pub use database::DatabasePersister;
pub use file::FilePersister;
pub use memory::MemoryPersister;

use crate::error::StoreError;
use async_trait::async_trait;

/// A fetched batch together with its transaction handle.
pub type Fetched = (String, Box<dyn Transaction>);

/// Durable store of batch strings.
#[async_trait]
pub trait Persister: Send + Sync {
    /// Durably store one batch.
    async fn write(&self, batch: &str) -> Result<(), StoreError>;

    /// Claim one available batch, or `Ok(None)` when the store is empty or
    /// every entry is already owned by another transaction.
    async fn fetch(&self) -> Result<Option<Fetched>, StoreError>;
}

/// Resolution handle for a fetched batch. Exactly one of the two methods is
/// called; a handle dropped unresolved behaves like a rollback where the
/// backend supports it.
#[async_trait]
pub trait Transaction: Send {
    /// Remove the fetched entry permanently.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Restore the fetched entry for a future fetch.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

impl std::fmt::Debug for dyn Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Transaction")
    }
}
