//! In-memory persistence.
//!
//! Batches live in a bounded FIFO deque; nothing survives the process. Used
//! when the configuration selects neither the file nor the database store.

use crate::error::StoreError;
use crate::store::{Fetched, Persister, Transaction};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Bounded in-memory batch store.
pub struct MemoryPersister {
    entries: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl MemoryPersister {
    /// Create a store holding at most `max_records * buffer_size_factor`
    /// batches.
    pub fn new(max_records: usize, buffer_size_factor: usize) -> Self {
        let capacity = max_records * buffer_size_factor;
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }
}

#[async_trait]
impl Persister for MemoryPersister {
    async fn write(&self, batch: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return Err(StoreError::CapacityExhausted {
                capacity: self.capacity,
            });
        }
        entries.push_back(batch.to_owned());
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<Fetched>, StoreError> {
        let mut entries = self.entries.lock();
        let Some(batch) = entries.pop_front() else {
            return Ok(None);
        };
        let txn = MemoryTransaction {
            batch: batch.clone(),
            entries: Arc::clone(&self.entries),
        };
        Ok(Some((batch, Box::new(txn))))
    }
}

/// Popping the batch at fetch time is what hides it from other fetchers, so
/// rollback has to put it back at the head to keep FIFO order.
struct MemoryTransaction {
    batch: String,
    entries: Arc<Mutex<VecDeque<String>>>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.entries.lock().push_front(self.batch);
        Ok(())
    }
}
