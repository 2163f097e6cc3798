//! Dedicated-server side of the match lifecycle: connection approval,
//! allocation handoff, backfill wiring and the listing heartbeat.

pub mod allocation;
pub mod directory;
pub mod listing;
pub mod manager;

pub use allocation::AllocationWatcher;
pub use directory::{PlayerSpawner, SessionDirectory, SessionEvent};
pub use listing::ServerListing;
pub use manager::ServerCoordinator;
