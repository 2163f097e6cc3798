//! Backfill coordinator: Idle -> Backfilling -> Idle state machine around a
//! single oracle backfill ticket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::oracle::{BackfillOptions, MatchProperties, MatchmakerOracle};

use super::{BackfillError, Roster};

/// Delay between backfill ticket syncs.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

struct BackfillState {
    ticket_id: Option<String>,
    roster: Roster,
    /// True when the local roster changed since the last push to the oracle.
    dirty: bool,
}

/// Keeps a running match topped up with players.
///
/// While backfilling, a single-flight loop syncs the local roster with the
/// oracle once per tick: a dirty roster is pushed, otherwise the ticket is
/// approved and the refreshed roster adopted. The loop self-stops once the
/// match no longer needs players, and falls back to Idle on oracle failure
/// instead of retrying a broken ticket forever.
pub struct BackfillCoordinator {
    oracle: Arc<dyn MatchmakerOracle>,
    connection: String,
    queue_name: String,
    max_players: usize,
    tick_interval: Duration,
    backfilling: AtomicBool,
    state: Mutex<BackfillState>,
}

impl BackfillCoordinator {
    pub fn new(
        oracle: Arc<dyn MatchmakerOracle>,
        connection: impl Into<String>,
        queue_name: impl Into<String>,
        payload_properties: MatchProperties,
        max_players: usize,
    ) -> Self {
        Self::with_tick_interval(
            oracle,
            connection,
            queue_name,
            payload_properties,
            max_players,
            TICK_INTERVAL,
        )
    }

    pub fn with_tick_interval(
        oracle: Arc<dyn MatchmakerOracle>,
        connection: impl Into<String>,
        queue_name: impl Into<String>,
        payload_properties: MatchProperties,
        max_players: usize,
        tick_interval: Duration,
    ) -> Self {
        let ticket_id = payload_properties.backfill_ticket_id.clone();
        Self {
            oracle,
            connection: connection.into(),
            queue_name: queue_name.into(),
            max_players,
            tick_interval,
            backfilling: AtomicBool::new(false),
            state: Mutex::new(BackfillState {
                ticket_id,
                roster: Roster::new(payload_properties),
                dirty: false,
            }),
        }
    }

    pub fn is_backfilling(&self) -> bool {
        self.backfilling.load(Ordering::SeqCst)
    }

    pub fn player_count(&self) -> usize {
        self.state.lock().roster.player_count()
    }

    /// True while the match has open slots.
    pub fn needs_players(&self) -> bool {
        self.player_count() < self.max_players
    }

    /// Oracle-issued team id of a rostered player.
    pub fn team_id_of(&self, auth_id: &str) -> Option<String> {
        self.state.lock().roster.team_id_of(auth_id)
    }

    /// Record a player joining the match. No-op if already rostered.
    pub fn player_joined(&self, auth_id: &str, team_id: &str) {
        let mut state = self.state.lock();
        if state.roster.add_player(auth_id, team_id) {
            state.dirty = true;
        } else {
            warn!(auth_id = %auth_id, "Player already in local backfill data, ignoring join");
        }
    }

    /// Record a player leaving the match and return the remaining count.
    /// Unknown ids are a warning-level no-op.
    pub fn remove_player(&self, auth_id: &str) -> usize {
        let mut state = self.state.lock();
        if state.roster.remove_player(auth_id) {
            state.dirty = true;
        } else {
            warn!(auth_id = %auth_id, "No such player in local backfill data");
        }
        state.roster.player_count()
    }

    /// Open the backfill ticket (unless the allocation payload already
    /// carried one) and start the sync loop. No-op while already backfilling.
    pub async fn begin_backfilling(self: &Arc<Self>) -> Result<(), BackfillError> {
        if self.backfilling.swap(true, Ordering::SeqCst) {
            warn!("Already backfilling, no need to start another");
            return Ok(());
        }

        info!(
            players = self.player_count(),
            capacity = self.max_players,
            "Starting backfill"
        );

        let needs_ticket = self.state.lock().ticket_id.is_none();
        if needs_ticket {
            let options = BackfillOptions {
                connection: self.connection.clone(),
                queue_name: self.queue_name.clone(),
                properties: self.state.lock().roster.snapshot(),
            };
            match self.oracle.create_backfill_ticket(options).await {
                Ok(ticket_id) => {
                    self.state.lock().ticket_id = Some(ticket_id);
                }
                Err(e) => {
                    self.backfilling.store(false, Ordering::SeqCst);
                    return Err(e.into());
                }
            }
        }

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.backfill_loop().await;
        });

        Ok(())
    }

    /// Delete the ticket and return to Idle. Errors if not backfilling.
    pub async fn stop_backfill(&self) -> Result<(), BackfillError> {
        if !self.backfilling.swap(false, Ordering::SeqCst) {
            return Err(BackfillError::NotBackfilling);
        }

        let ticket_id = self.state.lock().ticket_id.take();
        if let Some(ticket_id) = ticket_id {
            info!(ticket_id = %ticket_id, "Stopping backfill");
            self.oracle.delete_backfill_ticket(&ticket_id).await?;
        }

        Ok(())
    }

    async fn backfill_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            if !self.is_backfilling() {
                break;
            }

            if let Err(e) = self.sync_once().await {
                // A broken ticket is not worth looping on; fall back to Idle
                error!(error = %e, "Backfill sync failed, stopping backfill");
                self.backfilling.store(false, Ordering::SeqCst);
                break;
            }

            if !self.needs_players() {
                info!("Match is full, stopping backfill");
                if let Err(e) = self.stop_backfill().await {
                    warn!(error = %e, "Failed to delete backfill ticket on stop");
                }
                break;
            }
        }
    }

    /// One sync tick: push local changes, or approve the ticket so the
    /// oracle can inject newly matched players.
    async fn sync_once(&self) -> Result<(), BackfillError> {
        // Snapshot under the roster lock so the oracle never sees a
        // half-applied join or leave
        let (ticket_id, pending) = {
            let mut state = self.state.lock();
            let Some(ticket_id) = state.ticket_id.clone() else {
                return Ok(());
            };
            if state.dirty {
                state.dirty = false;
                (ticket_id, Some(state.roster.snapshot()))
            } else {
                (ticket_id, None)
            }
        };

        match pending {
            Some(properties) => {
                if let Err(e) = self
                    .oracle
                    .update_backfill_ticket(&ticket_id, properties)
                    .await
                {
                    // The snapshot never reached the oracle; mark the roster
                    // dirty again so a restarted loop pushes it instead of
                    // adopting the stale ticket
                    self.state.lock().dirty = true;
                    return Err(e.into());
                }
            }
            None => {
                let refreshed = self.oracle.approve_backfill_ticket(&ticket_id).await?;
                let mut state = self.state.lock();
                // A join or leave that raced with the approve wins; the next
                // tick pushes it
                if !state.dirty {
                    state.roster = Roster::new(refreshed);
                }
            }
        }

        Ok(())
    }
}
