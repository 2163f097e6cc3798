//! Client-side matchmaking: one ticket per session, polled to a single
//! terminal result.

pub mod session;

pub use session::MatchmakingSession;

/// Lifecycle of a matchmaking ticket as tracked by the session that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Created,
    Polling,
    Assigned,
    Failed,
    TimedOut,
    Cancelled,
}

/// A matchmaking ticket owned by the polling loop that created it.
#[derive(Debug, Clone)]
pub struct MatchmakingTicket {
    pub ticket_id: String,
    pub state: TicketState,
    pub assigned_ip: Option<String>,
    pub assigned_port: Option<u16>,
}

impl MatchmakingTicket {
    fn new(ticket_id: String) -> Self {
        Self {
            ticket_id,
            state: TicketState::Created,
            assigned_ip: None,
            assigned_port: None,
        }
    }
}

/// Connection target produced by a successful matchmaking session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchConnection {
    pub ip: String,
    pub port: u16,
}

/// Terminal result of one matchmaking session.
pub type MatchResult = Result<MatchConnection, MatchmakingError>;

/// Ways a matchmaking session can end without a connection target.
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    /// A session is already in flight for this user; no ticket was created.
    #[error("a matchmaking session is already in progress")]
    AlreadyInProgress,

    /// The oracle refused to create a ticket. Fatal, no automatic retry.
    #[error("ticket creation failed: {0}")]
    TicketCreation(String),

    /// A poll call failed. Terminal for this session; the ticket is left
    /// server-side for external cleanup.
    #[error("ticket retrieval failed: {0}")]
    TicketRetrieval(String),

    /// The oracle explicitly reported the assignment failed or timed out.
    #[error("match assignment failed: {0}")]
    Assignment(String),

    /// The caller cancelled the session.
    #[error("matchmaking cancelled")]
    Cancelled,
}
