//! Server-side backfill: keeps a started match topped up with players
//! through a single oracle backfill ticket.

pub mod coordinator;
pub mod roster;

pub use coordinator::BackfillCoordinator;
pub use roster::Roster;

use crate::oracle::OracleError;

/// Errors surfaced by the backfill coordinator.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    /// `stop_backfill` was called while no backfill was running.
    #[error("backfill is not running")]
    NotBackfilling,

    #[error("oracle call failed: {0}")]
    Oracle(#[from] OracleError),
}
