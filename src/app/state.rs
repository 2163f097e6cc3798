//! Per-process wiring of the server-role services.
//!
//! Everything is constructed once here and passed by handle; no component
//! reaches for a global instance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::oracle::OracleClient;
use crate::server::{
    AllocationWatcher, PlayerSpawner, ServerCoordinator, ServerListing, SessionDirectory,
    SessionEvent,
};

/// Shared state of a dedicated-server process.
pub struct ServerState {
    pub config: Arc<Config>,
    pub oracle: Arc<OracleClient>,
    pub directory: Arc<SessionDirectory>,
    pub listing: Arc<ServerListing>,
    pub allocation: Arc<AllocationWatcher>,
}

impl ServerState {
    /// Wire up the server services. Returns the session event stream the
    /// coordinator consumes.
    pub fn new(
        config: Config,
        spawner: Arc<dyn PlayerSpawner>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let config = Arc::new(config);

        let oracle = Arc::new(OracleClient::new(&config));

        let (directory, events) =
            SessionDirectory::new(spawner, Duration::from_millis(config.spawn_delay_ms));

        let listing = Arc::new(ServerListing::new(&config));

        let allocation = Arc::new(AllocationWatcher::with_timing(
            oracle.clone(),
            Duration::from_millis(100),
            Duration::from_secs(config.allocation_deadline_secs),
        ));

        let state = Self {
            config,
            oracle,
            directory,
            listing,
            allocation,
        };
        (state, events)
    }

    /// Coordinator for the match this server will host.
    pub fn coordinator(&self) -> ServerCoordinator {
        ServerCoordinator::new(
            self.oracle.clone(),
            self.directory.clone(),
            self.listing.player_count(),
            self.config.connection_string(),
            usize::from(self.config.max_players),
        )
    }
}
