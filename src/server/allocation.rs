//! Allocation watcher: waits for the orchestration layer to assign this
//! server process to a match.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::oracle::{AllocationSource, MatchPayload, OracleError};

/// How often the static server config is polled for an allocation id.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Hard deadline on server start-up: give up rather than hang forever.
const ALLOCATION_DEADLINE: Duration = Duration::from_secs(20);

/// Ways awaiting an allocation can fail.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("timed out waiting for a server allocation")]
    Timeout,

    #[error("failed to fetch the allocation payload: {0}")]
    Payload(#[source] OracleError),
}

/// Resolves this process's allocation exactly once.
///
/// Two signal sources race: push notifications from the orchestration layer
/// and a poll of the static server config, which may already carry the
/// allocation id at startup. The first writer wins; later ids are ignored.
pub struct AllocationWatcher {
    source: Arc<dyn AllocationSource>,
    poll_interval: Duration,
    deadline: Duration,
    resolved: Mutex<Option<String>>,
}

impl AllocationWatcher {
    pub fn new(source: Arc<dyn AllocationSource>) -> Self {
        Self::with_timing(source, POLL_INTERVAL, ALLOCATION_DEADLINE)
    }

    pub fn with_timing(
        source: Arc<dyn AllocationSource>,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Self {
        Self {
            source,
            poll_interval,
            deadline,
            resolved: Mutex::new(None),
        }
    }

    /// The allocation id this process resolved to, if any.
    pub fn allocation_id(&self) -> Option<String> {
        self.resolved.lock().clone()
    }

    /// Wait for an allocation and fetch its match payload. Returns
    /// [`AllocationError::Timeout`] once the deadline passes so server
    /// start-up never hangs on a missing allocation.
    pub async fn await_allocation(
        &self,
        notifications: mpsc::UnboundedReceiver<String>,
    ) -> Result<MatchPayload, AllocationError> {
        let allocation_id = tokio::time::timeout(self.deadline, self.resolve(notifications))
            .await
            .map_err(|_| AllocationError::Timeout)?;

        info!(allocation_id = %allocation_id, "Allocation resolved");

        self.source
            .allocation_payload(&allocation_id)
            .await
            .map_err(AllocationError::Payload)
    }

    async fn resolve(&self, mut notifications: mpsc::UnboundedReceiver<String>) -> String {
        if let Some(existing) = self.allocation_id() {
            return existing;
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        let mut push_open = true;

        loop {
            tokio::select! {
                pushed = notifications.recv(), if push_open => {
                    match pushed {
                        Some(id) if !id.is_empty() => return self.store_first(id),
                        Some(_) => {}
                        None => push_open = false,
                    }
                }
                _ = interval.tick() => {
                    match self.source.server_config().await {
                        Ok(config) => {
                            if let Some(id) = config.allocation_id.filter(|id| !id.is_empty()) {
                                info!(allocation_id = %id, "Config carried the allocation id");
                                return self.store_first(id);
                            }
                        }
                        Err(e) => {
                            // Config may simply not be published yet
                            warn!(error = %e, "Server config poll failed");
                        }
                    }
                }
            }
        }
    }

    /// First writer wins; an id arriving after resolution is discarded.
    fn store_first(&self, id: String) -> String {
        let mut slot = self.resolved.lock();
        match slot.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                *slot = Some(id.clone());
                id
            }
        }
    }
}
