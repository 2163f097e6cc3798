//! Wire types shared between the client and server processes.
//!
//! The connect payload travels as UTF-8 JSON alongside the transport's
//! connection request; the server decodes it during connection approval and
//! must survive arbitrary garbage without crashing.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Queue name the oracle matches solo players in.
pub const SOLO_QUEUE: &str = "solo-queue";
/// Queue name the oracle matches pre-made teams in.
pub const TEAM_QUEUE: &str = "team-queue";

/// Maps available in the arena rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMap {
    #[default]
    Default,
}

/// Game modes the server can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    #[default]
    Default,
}

/// Which matchmaking queue the player wants to be matched through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamPreference {
    /// No stated preference, matched as a solo player.
    #[default]
    None,
    SoloQueue,
    TeamQueue,
}

impl TeamPreference {
    /// Oracle queue name for this preference. Anything that is not an
    /// explicit team request falls back to the solo queue.
    pub fn queue_name(self) -> &'static str {
        match self {
            TeamPreference::TeamQueue => TEAM_QUEUE,
            _ => SOLO_QUEUE,
        }
    }
}

/// A player's identity as established at authentication time.
/// Immutable after creation; the server mirrors one per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Stable opaque id from the auth provider, permanent across sessions.
    pub auth_id: String,
    pub display_name: String,
    pub team_preference: TeamPreference,
}

impl UserIdentity {
    pub fn new(
        auth_id: impl Into<String>,
        display_name: impl Into<String>,
        team_preference: TeamPreference,
    ) -> Self {
        Self {
            auth_id: auth_id.into(),
            display_name: display_name.into(),
            team_preference,
        }
    }
}

/// Per-player game preferences carried in the connect payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GamePreferences {
    pub map: GameMap,
    pub game_mode: GameMode,
    pub game_queue: TeamPreference,
}

/// Connect-time identity payload, client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectPayload {
    pub user_name: String,
    pub user_auth_id: String,
    /// -1 means unassigned / solo; the server overwrites this once the
    /// backfill roster places the player on a team.
    #[serde(default = "default_team_index")]
    pub team_index: i32,
    #[serde(default)]
    pub user_game_preferences: GamePreferences,
}

fn default_team_index() -> i32 {
    -1
}

impl ConnectPayload {
    pub fn from_identity(identity: &UserIdentity) -> Self {
        Self {
            user_name: identity.display_name.clone(),
            user_auth_id: identity.auth_id.clone(),
            team_index: -1,
            user_game_preferences: GamePreferences {
                game_queue: identity.team_preference,
                ..GamePreferences::default()
            },
        }
    }

    /// Decode the payload bytes received with a connection request.
    pub fn decode(payload: &Bytes) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Encode for transmission with a connection request.
    pub fn encode(&self) -> Bytes {
        // Serializing a struct of plain strings and enums cannot fail
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            auth_id: self.user_auth_id.clone(),
            display_name: self.user_name.clone(),
            team_preference: self.user_game_preferences.game_queue,
        }
    }
}
