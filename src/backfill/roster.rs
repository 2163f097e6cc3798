//! Local view of a match's roster and team membership.

use crate::oracle::{MatchProperties, Team, TicketPlayer};

/// The flat player list and per-team id lists of a running match.
///
/// Invariant: a player present in `players` is present in exactly one team's
/// `player_ids` list, and removal drops them from both.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    properties: MatchProperties,
}

impl Roster {
    pub fn new(properties: MatchProperties) -> Self {
        Self { properties }
    }

    pub fn player_count(&self) -> usize {
        self.properties.players.len()
    }

    pub fn contains(&self, auth_id: &str) -> bool {
        self.properties.players.iter().any(|p| p.id == auth_id)
    }

    /// The team whose id list contains `auth_id`.
    pub fn team_of(&self, auth_id: &str) -> Option<&Team> {
        self.properties
            .teams
            .iter()
            .find(|t| t.player_ids.iter().any(|id| id == auth_id))
    }

    pub fn team_id_of(&self, auth_id: &str) -> Option<String> {
        self.team_of(auth_id).map(|t| t.team_id.clone())
    }

    /// Add a player to the roster and to `team_id`'s id list, creating the
    /// team entry on first sight. Returns false if the player was already
    /// present.
    pub fn add_player(&mut self, auth_id: &str, team_id: &str) -> bool {
        if self.contains(auth_id) {
            return false;
        }

        self.properties.players.push(TicketPlayer {
            id: auth_id.to_string(),
            team_id: Some(team_id.to_string()),
        });

        match self
            .properties
            .teams
            .iter_mut()
            .find(|t| t.team_id == team_id)
        {
            Some(team) => team.player_ids.push(auth_id.to_string()),
            None => self.properties.teams.push(Team {
                team_id: team_id.to_string(),
                team_name: String::new(),
                player_ids: vec![auth_id.to_string()],
            }),
        }

        true
    }

    /// Remove a player from the flat roster and from their team's id list.
    /// Returns false if the player was unknown (roster unchanged).
    pub fn remove_player(&mut self, auth_id: &str) -> bool {
        let Some(index) = self.properties.players.iter().position(|p| p.id == auth_id) else {
            return false;
        };
        self.properties.players.remove(index);

        for team in &mut self.properties.teams {
            team.player_ids.retain(|id| id != auth_id);
        }

        true
    }

    pub fn properties(&self) -> &MatchProperties {
        &self.properties
    }

    /// A consistent copy for serialization to the oracle.
    pub fn snapshot(&self) -> MatchProperties {
        self.properties.clone()
    }
}
