//! Matchmaking oracle abstraction.
//!
//! The oracle is the external matchmaking/backfill service this coordinator
//! treats as a black box. Components take it as `Arc<dyn MatchmakerOracle>` so
//! the production HTTP client and test mocks are interchangeable.

pub mod http;

pub use http::OracleClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One player entry on a matchmaking or backfill ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPlayer {
    /// The player's auth id.
    pub id: String,
    /// Oracle-issued team id, absent until the oracle groups the player.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

/// Options for creating a matchmaking ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketOptions {
    pub queue_name: String,
}

impl TicketOptions {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
        }
    }
}

/// Assignment state the oracle reports for a matchmaking ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    InProgress,
    Found,
    Timeout,
    Failed,
}

/// Poll response for a matchmaking ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketStatus {
    pub status: AssignmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TicketStatus {
    pub fn in_progress() -> Self {
        Self {
            status: AssignmentStatus::InProgress,
            ip: None,
            port: None,
            message: None,
        }
    }

    pub fn found(ip: impl Into<String>, port: u16) -> Self {
        Self {
            status: AssignmentStatus::Found,
            ip: Some(ip.into()),
            port: Some(port),
            message: None,
        }
    }
}

/// One team in a match as the oracle sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    /// Opaque unique id, stable for the match's lifetime.
    pub team_id: String,
    #[serde(default)]
    pub team_name: String,
    #[serde(default)]
    pub player_ids: Vec<String>,
}

/// Roster and team layout of a running match, shared between the allocation
/// payload and the backfill ticket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchProperties {
    #[serde(default)]
    pub players: Vec<TicketPlayer>,
    #[serde(default)]
    pub teams: Vec<Team>,
    /// Set when the oracle pre-created a backfill ticket for this match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backfill_ticket_id: Option<String>,
}

/// Options for creating a backfill ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillOptions {
    /// Connection string clients use to reach this server, "ip:port".
    pub connection: String,
    pub queue_name: String,
    pub properties: MatchProperties,
}

/// Match descriptor handed to a server once the orchestration layer
/// allocates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPayload {
    pub queue_name: String,
    pub match_properties: MatchProperties,
}

/// Static server configuration as published by the orchestration layer.
/// The allocation id may already be present at process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub allocation_id: Option<String>,
}

/// Errors from talking to the oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("oracle API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse oracle response: {0}")]
    Parse(reqwest::Error),
}

/// Matchmaking and backfill operations against the oracle.
#[async_trait]
pub trait MatchmakerOracle: Send + Sync {
    /// Create a matchmaking ticket and return its id.
    async fn create_ticket(
        &self,
        players: Vec<TicketPlayer>,
        options: TicketOptions,
    ) -> Result<String, OracleError>;

    /// Fetch the current assignment status of a ticket.
    async fn get_ticket(&self, ticket_id: &str) -> Result<TicketStatus, OracleError>;

    /// Delete a ticket server-side.
    async fn delete_ticket(&self, ticket_id: &str) -> Result<(), OracleError>;

    /// Create a backfill ticket for a running match and return its id.
    async fn create_backfill_ticket(&self, options: BackfillOptions) -> Result<String, OracleError>;

    /// Push a locally changed roster to the oracle.
    async fn update_backfill_ticket(
        &self,
        ticket_id: &str,
        properties: MatchProperties,
    ) -> Result<(), OracleError>;

    /// Keep the ticket alive and let the oracle inject newly matched players;
    /// returns the refreshed roster.
    async fn approve_backfill_ticket(
        &self,
        ticket_id: &str,
    ) -> Result<MatchProperties, OracleError>;

    /// Delete a backfill ticket server-side.
    async fn delete_backfill_ticket(&self, ticket_id: &str) -> Result<(), OracleError>;
}

/// Orchestration-layer operations a dedicated server needs at startup.
#[async_trait]
pub trait AllocationSource: Send + Sync {
    /// Pull the static server configuration, which may already carry an
    /// allocation id.
    async fn server_config(&self) -> Result<ServerConfig, OracleError>;

    /// Fetch the match payload for a resolved allocation.
    async fn allocation_payload(&self, allocation_id: &str) -> Result<MatchPayload, OracleError>;
}
