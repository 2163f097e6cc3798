//! Server coordinator: reacts to join/leave events, assigns team indices and
//! drives backfill demand for the lifetime of one match.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backfill::{BackfillCoordinator, BackfillError};
use crate::oracle::{MatchPayload, MatchmakerOracle};
use crate::protocol::UserIdentity;
use crate::server::directory::{SessionDirectory, SessionEvent};
use crate::server::listing::PlayerCountHandle;

/// What the hosting process should do after an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerDirective {
    Continue,
    /// The match emptied out; tear the server down.
    Shutdown,
}

/// Wires the allocation payload, the backfill coordinator and the session
/// directory together for one match.
pub struct ServerCoordinator {
    oracle: Arc<dyn MatchmakerOracle>,
    directory: Arc<SessionDirectory>,
    players: PlayerCountHandle,
    /// Connection string advertised on the backfill ticket, "ip:port".
    connection: String,
    max_players: usize,
    backfiller: Option<Arc<BackfillCoordinator>>,
    /// Oracle team id -> dense local index, in order of first appearance.
    /// Stable for the match's lifetime, never reused.
    team_indices: HashMap<String, i32>,
}

impl ServerCoordinator {
    pub fn new(
        oracle: Arc<dyn MatchmakerOracle>,
        directory: Arc<SessionDirectory>,
        players: PlayerCountHandle,
        connection: impl Into<String>,
        max_players: usize,
    ) -> Self {
        Self {
            oracle,
            directory,
            players,
            connection: connection.into(),
            max_players,
            backfiller: None,
            team_indices: HashMap::new(),
        }
    }

    /// Adopt the allocated match and start backfilling if it has open slots.
    pub async fn start_match(&mut self, payload: MatchPayload) -> Result<(), BackfillError> {
        let backfiller = Arc::new(BackfillCoordinator::new(
            self.oracle.clone(),
            self.connection.clone(),
            payload.queue_name,
            payload.match_properties,
            self.max_players,
        ));

        if backfiller.needs_players() {
            backfiller.begin_backfilling().await?;
        }

        self.backfiller = Some(backfiller);
        Ok(())
    }

    /// Consume directory events until the match empties out or the stream
    /// closes. The caller runs `shutdown` afterwards.
    pub async fn run(&mut self, events: &mut mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            if self.handle_event(event).await == ServerDirective::Shutdown {
                info!("Match is empty, closing server");
                break;
            }
        }
    }

    pub async fn handle_event(&mut self, event: SessionEvent) -> ServerDirective {
        match event {
            SessionEvent::UserJoined { identity, rejoin } => {
                self.user_joined(&identity, rejoin).await;
                ServerDirective::Continue
            }
            SessionEvent::UserLeft {
                identity,
                still_connected,
            } => self.user_left(&identity, still_connected).await,
            SessionEvent::ClientLeft(auth_id) => {
                // Lobby-side cleanup happens outside this process
                debug!(auth_id = %auth_id, "Client left");
                ServerDirective::Continue
            }
        }
    }

    async fn user_joined(&mut self, identity: &UserIdentity, rejoin: bool) {
        let Some(backfiller) = self.backfiller.clone() else {
            warn!(auth_id = %identity.auth_id, "Join before the match payload arrived");
            return;
        };

        if rejoin {
            // The player is already counted and rostered; only their
            // connection changed
            debug!(auth_id = %identity.auth_id, "Reconnect of an already joined player");
            return;
        }

        let team_id = match backfiller.team_id_of(&identity.auth_id) {
            Some(team_id) => team_id,
            None => {
                // Not on the roster yet: joined outside the matchmaker, or
                // ahead of the next approve refresh. Track them on their own
                // team so backfill demand stays accurate.
                backfiller.player_joined(&identity.auth_id, &identity.auth_id);
                identity.auth_id.clone()
            }
        };

        let team_index = self.team_index_for(&team_id);
        self.directory.set_team_index(&identity.auth_id, team_index);
        self.players.add_player();

        info!(
            user = %identity.display_name,
            team_id = %team_id,
            team_index,
            "User joined the match"
        );

        if !backfiller.needs_players() && backfiller.is_backfilling() {
            if let Err(e) = backfiller.stop_backfill().await {
                warn!(error = %e, "Failed to stop backfill on full match");
            }
        }
    }

    async fn user_left(&mut self, identity: &UserIdentity, still_connected: bool) -> ServerDirective {
        let Some(backfiller) = self.backfiller.clone() else {
            return ServerDirective::Continue;
        };

        // After a reconnect the replaced connection's leave still arrives;
        // the player stays counted and rostered on the newer connection
        if still_connected {
            debug!(auth_id = %identity.auth_id, "Stale connection left, player still connected");
            return ServerDirective::Continue;
        }

        let remaining = backfiller.remove_player(&identity.auth_id);
        self.players.remove_player();

        info!(user = %identity.display_name, remaining, "User left the match");

        if remaining == 0 {
            return ServerDirective::Shutdown;
        }

        if backfiller.needs_players() && !backfiller.is_backfilling() {
            if let Err(e) = backfiller.begin_backfilling().await {
                warn!(error = %e, "Failed to restart backfill after a leave");
            }
        }

        ServerDirective::Continue
    }

    /// Dense local index for an oracle team id, assigned on first sight.
    fn team_index_for(&mut self, team_id: &str) -> i32 {
        let next = self.team_indices.len() as i32;
        *self.team_indices.entry(team_id.to_string()).or_insert(next)
    }

    pub async fn shutdown(&self) {
        if let Some(backfiller) = &self.backfiller {
            if backfiller.is_backfilling() {
                if let Err(e) = backfiller.stop_backfill().await {
                    warn!(error = %e, "Failed to stop backfill during shutdown");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::oracle::{
        BackfillOptions, MatchProperties, OracleError, Team, TicketOptions, TicketPlayer,
        TicketStatus,
    };
    use crate::protocol::TeamPreference;
    use crate::server::directory::PlayerSpawner;

    struct QuietOracle {
        backfill_creates: AtomicUsize,
        backfill_deletes: AtomicUsize,
        oracle_roster: Mutex<MatchProperties>,
    }

    impl QuietOracle {
        fn new(roster: MatchProperties) -> Arc<Self> {
            Arc::new(Self {
                backfill_creates: AtomicUsize::new(0),
                backfill_deletes: AtomicUsize::new(0),
                oracle_roster: Mutex::new(roster),
            })
        }
    }

    #[async_trait]
    impl MatchmakerOracle for QuietOracle {
        async fn create_ticket(
            &self,
            _players: Vec<TicketPlayer>,
            _options: TicketOptions,
        ) -> Result<String, OracleError> {
            unreachable!()
        }

        async fn get_ticket(&self, _ticket_id: &str) -> Result<TicketStatus, OracleError> {
            unreachable!()
        }

        async fn delete_ticket(&self, _ticket_id: &str) -> Result<(), OracleError> {
            unreachable!()
        }

        async fn create_backfill_ticket(
            &self,
            _options: BackfillOptions,
        ) -> Result<String, OracleError> {
            self.backfill_creates.fetch_add(1, Ordering::SeqCst);
            Ok("backfill-1".into())
        }

        async fn update_backfill_ticket(
            &self,
            _ticket_id: &str,
            properties: MatchProperties,
        ) -> Result<(), OracleError> {
            *self.oracle_roster.lock() = properties;
            Ok(())
        }

        async fn approve_backfill_ticket(
            &self,
            _ticket_id: &str,
        ) -> Result<MatchProperties, OracleError> {
            Ok(self.oracle_roster.lock().clone())
        }

        async fn delete_backfill_ticket(&self, _ticket_id: &str) -> Result<(), OracleError> {
            self.backfill_deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NoopSpawner;

    #[async_trait]
    impl PlayerSpawner for NoopSpawner {
        async fn spawn_player(&self, _connection_id: u64, _team_index: i32) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn roster(teams: &[(&str, &[&str])]) -> MatchProperties {
        let mut players = Vec::new();
        let mut team_entries = Vec::new();
        for (team_id, members) in teams {
            for member in *members {
                players.push(TicketPlayer {
                    id: member.to_string(),
                    team_id: Some(team_id.to_string()),
                });
            }
            team_entries.push(Team {
                team_id: team_id.to_string(),
                team_name: String::new(),
                player_ids: members.iter().map(|m| m.to_string()).collect(),
            });
        }
        MatchProperties {
            players,
            teams: team_entries,
            backfill_ticket_id: None,
        }
    }

    fn identity(auth_id: &str) -> UserIdentity {
        UserIdentity::new(auth_id, format!("player-{auth_id}"), TeamPreference::None)
    }

    async fn coordinator_with(
        oracle: Arc<QuietOracle>,
        properties: MatchProperties,
        max_players: usize,
    ) -> (ServerCoordinator, PlayerCountHandle) {
        let (directory, _events) = SessionDirectory::new(Arc::new(NoopSpawner), Duration::ZERO);
        let players = PlayerCountHandle::default();
        let mut coordinator = ServerCoordinator::new(
            oracle,
            directory,
            players.clone(),
            "10.0.0.1:7777",
            max_players,
        );
        coordinator
            .start_match(MatchPayload {
                queue_name: "team-queue".into(),
                match_properties: properties,
            })
            .await
            .unwrap();
        (coordinator, players)
    }

    #[tokio::test(start_paused = true)]
    async fn team_indices_are_dense_and_stable() {
        let properties = roster(&[
            ("team-red", &["p0", "p1"] as &[&str]),
            ("team-blue", &["p2"]),
            ("team-green", &["p3"]),
        ]);
        let oracle = QuietOracle::new(properties.clone());
        let (mut coordinator, _players) = coordinator_with(oracle, properties, 20).await;

        coordinator.user_joined(&identity("p0"), false).await;
        coordinator.user_joined(&identity("p2"), false).await;
        coordinator.user_joined(&identity("p1"), false).await;
        coordinator.user_joined(&identity("p3"), false).await;

        // Players sharing an oracle team share a local index; distinct teams
        // get the next unused index in order of first appearance
        assert_eq!(coordinator.team_indices["team-red"], 0);
        assert_eq!(coordinator.team_indices["team-blue"], 1);
        assert_eq!(coordinator.team_indices["team-green"], 2);

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn join_assigns_index_to_directory_record() {
        let properties = roster(&[("team-red", &["p0"] as &[&str])]);
        let oracle = QuietOracle::new(properties.clone());

        let (directory, _events) = SessionDirectory::new(Arc::new(NoopSpawner), Duration::ZERO);
        let players = PlayerCountHandle::default();
        let mut coordinator = ServerCoordinator::new(
            oracle,
            directory.clone(),
            players,
            "10.0.0.1:7777",
            20,
        );
        coordinator
            .start_match(MatchPayload {
                queue_name: "team-queue".into(),
                match_properties: properties,
            })
            .await
            .unwrap();

        directory
            .approve(crate::server::directory::ConnectionRequest {
                connection_id: 1,
                payload: crate::protocol::ConnectPayload::from_identity(&identity("p0")).encode(),
            })
            .unwrap();

        coordinator.user_joined(&identity("p0"), false).await;

        assert_eq!(directory.record_by_auth("p0").unwrap().team_index, 0);
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn join_to_capacity_stops_backfill() {
        let properties = roster(&[("team-red", &["p0"] as &[&str])]);
        let oracle = QuietOracle::new(properties.clone());
        let (mut coordinator, players) = coordinator_with(oracle.clone(), properties, 2).await;

        assert_eq!(oracle.backfill_creates.load(Ordering::SeqCst), 1);

        coordinator.user_joined(&identity("p0"), false).await;
        // A player unknown to the roster joins and fills the last slot
        coordinator.user_joined(&identity("walk-in"), false).await;

        assert_eq!(players.current(), 2);
        assert_eq!(oracle.backfill_deletes.load(Ordering::SeqCst), 1);
        assert!(!coordinator.backfiller.as_ref().unwrap().is_backfilling());
    }

    #[tokio::test(start_paused = true)]
    async fn last_leave_shuts_the_server_down() {
        let properties = roster(&[("team-red", &["p0"] as &[&str])]);
        let oracle = QuietOracle::new(properties.clone());
        let (mut coordinator, _players) = coordinator_with(oracle, properties, 20).await;

        coordinator.user_joined(&identity("p0"), false).await;
        let directive = coordinator
            .handle_event(SessionEvent::UserLeft {
                identity: identity("p0"),
                still_connected: false,
            })
            .await;

        assert_eq!(directive, ServerDirective::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_restarts_backfill_when_slots_reopen() {
        let properties = roster(&[("team-red", &["p0", "p1"] as &[&str])]);
        let oracle = QuietOracle::new(properties.clone());
        let (mut coordinator, _players) = coordinator_with(oracle.clone(), properties, 2).await;

        // Full match: start_match never began backfilling
        assert_eq!(oracle.backfill_creates.load(Ordering::SeqCst), 0);

        let directive = coordinator
            .handle_event(SessionEvent::UserLeft {
                identity: identity("p0"),
                still_connected: false,
            })
            .await;

        assert_eq!(directive, ServerDirective::Continue);
        assert_eq!(oracle.backfill_creates.load(Ordering::SeqCst), 1);
        assert!(coordinator.backfiller.as_ref().unwrap().is_backfilling());

        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_disconnect_after_rejoin_keeps_the_player() {
        let properties = roster(&[("team-red", &["p0"] as &[&str])]);
        let oracle = QuietOracle::new(properties.clone());

        let (directory, mut events) = SessionDirectory::new(Arc::new(NoopSpawner), Duration::ZERO);
        let players = PlayerCountHandle::default();
        let mut coordinator = ServerCoordinator::new(
            oracle,
            directory.clone(),
            players.clone(),
            "10.0.0.1:7777",
            20,
        );
        coordinator
            .start_match(MatchPayload {
                queue_name: "team-queue".into(),
                match_properties: properties,
            })
            .await
            .unwrap();

        let connect = |connection_id| crate::server::directory::ConnectionRequest {
            connection_id,
            payload: crate::protocol::ConnectPayload::from_identity(&identity("p0")).encode(),
        };

        directory.approve(connect(1)).unwrap();
        directory.approve(connect(2)).unwrap();
        coordinator.handle_event(events.try_recv().unwrap()).await;
        coordinator.handle_event(events.try_recv().unwrap()).await;

        // The rejoin is counted once
        assert_eq!(players.current(), 1);

        // The stale connection drops while the player lives on connection 2
        directory.disconnect(1);
        let directive = coordinator.handle_event(events.try_recv().unwrap()).await;

        assert_eq!(directive, ServerDirective::Continue);
        assert_eq!(players.current(), 1);
        assert!(coordinator
            .backfiller
            .as_ref()
            .unwrap()
            .team_id_of("p0")
            .is_some());

        // The owning connection's disconnect still tears the player down
        directory.disconnect(2);
        let directive = coordinator.handle_event(events.try_recv().unwrap()).await;

        assert_eq!(directive, ServerDirective::Shutdown);
        assert_eq!(players.current(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn full_payload_skips_backfilling() {
        let properties = roster(&[("team-red", &["p0", "p1"] as &[&str])]);
        let oracle = QuietOracle::new(properties.clone());
        let (coordinator, _players) = coordinator_with(oracle.clone(), properties, 2).await;

        assert!(coordinator.backfiller.as_ref().unwrap().player_count() == 2);
        assert!(!coordinator.backfiller.as_ref().unwrap().is_backfilling());
        assert_eq!(oracle.backfill_creates.load(Ordering::SeqCst), 0);
    }
}
