//! Matchmaking session: create a ticket, poll it to a terminal state,
//! surface the connection target.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::oracle::{AssignmentStatus, MatchmakerOracle, TicketOptions, TicketPlayer};
use crate::protocol::{TeamPreference, UserIdentity};

use super::{MatchConnection, MatchResult, MatchmakingError, MatchmakingTicket, TicketState};

/// How long the poll loop waits between ticket status checks.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Drives exactly one matchmaking ticket at a time for a single user.
///
/// `start` is single-flight: a second call while one is running fails with
/// [`MatchmakingError::AlreadyInProgress`] without touching the oracle.
/// Cancellation is cooperative; the flag is observed on the next poll tick.
pub struct MatchmakingSession {
    oracle: Arc<dyn MatchmakerOracle>,
    poll_interval: Duration,
    in_flight: AtomicBool,
    cancel_requested: AtomicBool,
    ticket: Mutex<Option<MatchmakingTicket>>,
}

impl MatchmakingSession {
    pub fn new(oracle: Arc<dyn MatchmakerOracle>) -> Self {
        Self::with_poll_interval(oracle, POLL_INTERVAL)
    }

    pub fn with_poll_interval(oracle: Arc<dyn MatchmakerOracle>, poll_interval: Duration) -> Self {
        Self {
            oracle,
            poll_interval,
            in_flight: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            ticket: Mutex::new(None),
        }
    }

    /// True while a session is polling.
    pub fn is_matchmaking(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// The ticket owned by the current or most recent session.
    pub fn current_ticket(&self) -> Option<MatchmakingTicket> {
        self.ticket.lock().clone()
    }

    /// Request cancellation of the running session. Takes effect on the next
    /// poll tick; the ticket is deleted best-effort and the session returns
    /// [`MatchmakingError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Find a match for `user`. Produces exactly one terminal result per
    /// call: one create, N polls, at most one delete.
    pub async fn start(&self, user: UserIdentity, wants_team_queue: bool) -> MatchResult {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(MatchmakingError::AlreadyInProgress);
        }
        self.cancel_requested.store(false, Ordering::SeqCst);

        let result = self.run(user, wants_team_queue).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run(&self, user: UserIdentity, wants_team_queue: bool) -> MatchResult {
        let preference = if wants_team_queue {
            TeamPreference::TeamQueue
        } else {
            user.team_preference
        };
        let queue_name = preference.queue_name();

        let players = vec![TicketPlayer {
            id: user.auth_id.clone(),
            team_id: None,
        }];

        info!(user = %user.display_name, queue = queue_name, "Creating matchmaking ticket");

        let ticket_id = match self
            .oracle
            .create_ticket(players, TicketOptions::new(queue_name))
            .await
        {
            Ok(id) => id,
            Err(e) => return Err(MatchmakingError::TicketCreation(e.to_string())),
        };

        *self.ticket.lock() = Some(MatchmakingTicket::new(ticket_id.clone()));

        self.poll_until_terminal(&ticket_id).await
    }

    async fn poll_until_terminal(&self, ticket_id: &str) -> MatchResult {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        self.set_state(TicketState::Polling);

        loop {
            interval.tick().await;

            if self.cancel_requested.load(Ordering::SeqCst) {
                self.set_state(TicketState::Cancelled);
                info!(ticket_id = %ticket_id, "Cancelling matchmaking ticket");
                if let Err(e) = self.oracle.delete_ticket(ticket_id).await {
                    // Best effort only; the oracle expires orphaned tickets
                    warn!(ticket_id = %ticket_id, error = %e, "Failed to delete cancelled ticket");
                }
                return Err(MatchmakingError::Cancelled);
            }

            let status = match self.oracle.get_ticket(ticket_id).await {
                Ok(status) => status,
                Err(e) => {
                    self.set_state(TicketState::Failed);
                    return Err(MatchmakingError::TicketRetrieval(e.to_string()));
                }
            };

            match status.status {
                AssignmentStatus::Found => {
                    return match (status.ip, status.port) {
                        (Some(ip), Some(port)) => {
                            let mut ticket = self.ticket.lock();
                            if let Some(ticket) = ticket.as_mut() {
                                ticket.state = TicketState::Assigned;
                                ticket.assigned_ip = Some(ip.clone());
                                ticket.assigned_port = Some(port);
                            }
                            info!(ticket_id = %ticket_id, ip = %ip, port, "Match found");
                            Ok(MatchConnection { ip, port })
                        }
                        _ => {
                            self.set_state(TicketState::Failed);
                            Err(MatchmakingError::Assignment(format!(
                                "ticket {ticket_id}: assignment missing server address"
                            )))
                        }
                    };
                }
                AssignmentStatus::Timeout | AssignmentStatus::Failed => {
                    self.set_state(if status.status == AssignmentStatus::Timeout {
                        TicketState::TimedOut
                    } else {
                        TicketState::Failed
                    });
                    return Err(MatchmakingError::Assignment(format!(
                        "ticket {ticket_id}: {:?} - {}",
                        status.status,
                        status.message.unwrap_or_default()
                    )));
                }
                AssignmentStatus::InProgress => {
                    debug!(ticket_id = %ticket_id, "Ticket still in progress");
                }
            }
        }
    }

    fn set_state(&self, state: TicketState) {
        if let Some(ticket) = self.ticket.lock().as_mut() {
            ticket.state = state;
        }
    }
}
