//! Periodic batch publisher.
//!
//! On every tick the publisher claims one persisted batch, POSTs it to the
//! analytics endpoint and resolves the claim from the HTTP outcome: a 2xx
//! commits (the entry is gone for good), anything else rolls back so the
//! batch is re-offered on a later tick. Client errors are not special-cased;
//! the agent never inspects response bodies.

use crate::error::StoreError;
use crate::store::Persister;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Background task shipping persisted batches to the analytics endpoint.
pub struct Publisher {
    persister: Arc<dyn Persister>,
    endpoint_url: String,
    http_client: reqwest::Client,
    send_interval: Duration,
    shutdown: CancellationToken,
}

impl Publisher {
    pub fn new(
        persister: Arc<dyn Persister>,
        endpoint_url: impl Into<String>,
        http_client: reqwest::Client,
        send_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            persister,
            endpoint_url: endpoint_url.into(),
            http_client,
            send_interval,
            shutdown,
        }
    }

    /// Run until the shutdown token fires. The first publish attempt happens
    /// immediately; an in-flight POST and its commit/rollback always finish
    /// before the task exits.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.send_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.publish_pending().await,
                _ = self.shutdown.cancelled() => {
                    debug!("publisher stopped");
                    return;
                }
            }
        }
    }

    /// Claim one batch and try to deliver it.
    async fn publish_pending(&self) {
        let fetched = match self.persister.fetch().await {
            Ok(fetched) => fetched,
            Err(err @ StoreError::EmptyEntryRemoved { .. }) => {
                // Garbage entry skipped, not a delivery failure.
                debug!(%err, "skipped an unusable entry");
                return;
            }
            Err(err) => {
                warn!(%err, "could not fetch a batch from the store");
                return;
            }
        };
        let Some((batch, txn)) = fetched else {
            trace!("nothing to publish");
            return;
        };

        match self.post(&batch).await {
            Ok(status) if status.is_success() => {
                if let Err(err) = txn.commit().await {
                    warn!(%err, "commit failed after publish; the batch may be delivered again");
                }
            }
            Ok(status) => {
                warn!(%status, "analytics endpoint rejected the batch, rolling back");
                if let Err(err) = txn.rollback().await {
                    warn!(%err, "could not roll back the fetched batch");
                }
            }
            Err(err) => {
                warn!(%err, "could not reach the analytics endpoint, rolling back");
                if let Err(err) = txn.rollback().await {
                    warn!(%err, "could not roll back the fetched batch");
                }
            }
        }
    }

    async fn post(&self, batch: &str) -> Result<reqwest::StatusCode, reqwest::Error> {
        let response = self
            .http_client
            .post(&self.endpoint_url)
            .header(CONTENT_TYPE, "application/json")
            .body(batch.to_owned())
            .send()
            .await?;
        Ok(response.status())
    }
}
