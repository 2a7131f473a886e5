//! Buffer-draining batch writer.
//!
//! The writer is the single consumer of the ingestion buffer. Records
//! accumulate in an in-memory staging list until either the list reaches
//! `max_records` or `buffer_timeout` passes with something staged, at which
//! point the staging list is serialised as one JSON array and handed to the
//! persister. Staging is not durable: a write failure keeps the records and
//! retries on the next trigger, and shutdown drains the channel and flushes
//! whatever is left.

use crate::store::Persister;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Background task draining the ingestion buffer into the persister.
pub struct Writer {
    buffer: mpsc::Receiver<String>,
    persister: Arc<dyn Persister>,
    max_records: usize,
    buffer_timeout: Duration,
    staging: Vec<String>,
    last_written: Instant,
    shutdown: CancellationToken,
}

impl Writer {
    pub fn new(
        buffer: mpsc::Receiver<String>,
        persister: Arc<dyn Persister>,
        max_records: usize,
        buffer_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            buffer,
            persister,
            max_records,
            buffer_timeout,
            staging: Vec::with_capacity(max_records),
            last_written: Instant::now(),
            shutdown,
        }
    }

    /// Run until the shutdown token fires or every producer is gone.
    pub async fn run(mut self) {
        loop {
            let deadline = self.last_written + self.buffer_timeout;
            tokio::select! {
                received = self.buffer.recv() => {
                    match received {
                        Some(record) => {
                            self.staging.push(record);
                            if self.staging.len() >= self.max_records {
                                self.flush().await;
                            }
                        }
                        None => {
                            debug!("ingestion buffer closed, flushing staging");
                            self.flush().await;
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if self.staging.is_empty() {
                        // Nothing staged: just restart the window.
                        self.last_written = Instant::now();
                    } else {
                        self.flush().await;
                    }
                }
                _ = self.shutdown.cancelled() => {
                    self.drain();
                    self.flush().await;
                    debug!("writer stopped");
                    return;
                }
            }
        }
    }

    /// Pull everything already sitting in the channel into staging.
    fn drain(&mut self) {
        while let Ok(record) = self.buffer.try_recv() {
            self.staging.push(record);
        }
    }

    /// Persist the staging list as one JSON array batch. An empty staging
    /// list is never written. The timer window restarts on failure too, so a
    /// dead store is retried once per timeout instead of in a hot loop.
    async fn flush(&mut self) {
        if self.staging.is_empty() {
            return;
        }
        let batch = format!("[{}]", self.staging.join(","));
        match self.persister.write(&batch).await {
            Ok(()) => {
                debug!(records = self.staging.len(), "batch persisted");
                self.staging.clear();
            }
            Err(err) => {
                warn!(%err, records = self.staging.len(),
                    "could not persist the batch, keeping it staged");
            }
        }
        self.last_written = Instant::now();
    }
}
