//! Session directory: connection approval, identity records and the
//! join/leave event stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::{ConnectPayload, UserIdentity};

/// A connection attempting to join, as handed over by the transport.
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub connection_id: u64,
    /// UTF-8 JSON identity payload sent by the client.
    pub payload: Bytes,
}

/// Live mapping from a transport connection to a user, plus their team slot.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub connection_id: u64,
    pub auth_id: String,
    /// -1 until the match roster places the player on a team.
    pub team_index: i32,
}

/// Events the directory emits, exactly once per connection lifecycle.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    UserJoined {
        identity: UserIdentity,
        /// True when this auth id already had a live connection; the player
        /// swapped connections rather than entering the match.
        rejoin: bool,
    },
    UserLeft {
        identity: UserIdentity,
        /// True when a newer connection kept the auth record; the player is
        /// still in the match on that connection.
        still_connected: bool,
    },
    /// Raised after the user's records are gone, for external cleanup such
    /// as lobby rosters. Carries the auth id only.
    ClientLeft(String),
}

/// External operation that spawns a player avatar; the game-object transport
/// behind it is out of scope here.
#[async_trait]
pub trait PlayerSpawner: Send + Sync {
    async fn spawn_player(&self, connection_id: u64, team_index: i32) -> anyhow::Result<()>;
}

/// Connection approval failures.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The connect payload could not be decoded; only this connection is
    /// rejected, the server keeps running.
    #[error("malformed connect payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),
}

struct DirectoryEntry {
    identity: UserIdentity,
    record: ConnectionRecord,
}

/// Server-exclusive map from connection identity to user identity and team.
///
/// Invariant: while a record is live, every connection id maps to exactly one
/// auth id and vice versa. A rapid reconnect with the same auth id is a
/// distinct connection id; the newer connection owns the auth record.
pub struct SessionDirectory {
    by_connection: DashMap<u64, String>,
    by_auth: DashMap<String, DirectoryEntry>,
    events: mpsc::UnboundedSender<SessionEvent>,
    spawner: Arc<dyn PlayerSpawner>,
    spawn_delay: Duration,
}

impl SessionDirectory {
    /// `spawn_delay` separates connection approval from the player spawn.
    /// It compensates for the transport's join-visibility race: a player
    /// spawned in the same frame as the approval may be invisible to peers.
    /// A transport without that race can set it to zero.
    pub fn new(
        spawner: Arc<dyn PlayerSpawner>,
        spawn_delay: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let directory = Arc::new(Self {
            by_connection: DashMap::new(),
            by_auth: DashMap::new(),
            events: tx,
            spawner,
            spawn_delay,
        });
        (directory, rx)
    }

    /// Decide whether a connection may join. Everyone with a decodable
    /// identity payload is accepted; capacity and ban checks live elsewhere.
    ///
    /// On success the connection is registered, a deferred player spawn is
    /// scheduled and `UserJoined` is emitted.
    pub fn approve(
        self: &Arc<Self>,
        request: ConnectionRequest,
    ) -> Result<UserIdentity, DirectoryError> {
        let payload =
            ConnectPayload::decode(&request.payload).map_err(DirectoryError::MalformedPayload)?;
        let identity = payload.identity();

        info!(
            connection_id = request.connection_id,
            auth_id = %identity.auth_id,
            user = %identity.display_name,
            "Connection approved"
        );

        self.by_connection
            .insert(request.connection_id, identity.auth_id.clone());
        let displaced = self.by_auth.insert(
            identity.auth_id.clone(),
            DirectoryEntry {
                identity: identity.clone(),
                record: ConnectionRecord {
                    connection_id: request.connection_id,
                    auth_id: identity.auth_id.clone(),
                    team_index: payload.team_index,
                },
            },
        );

        self.emit(SessionEvent::UserJoined {
            identity: identity.clone(),
            rejoin: displaced.is_some(),
        });
        self.schedule_spawn(request.connection_id);

        Ok(identity)
    }

    /// Handle a transport disconnect. Emits `UserLeft` while the auth record
    /// is still resolvable, then removes it and emits `ClientLeft`.
    pub fn disconnect(&self, connection_id: u64) {
        let Some((_, auth_id)) = self.by_connection.remove(&connection_id) else {
            debug!(connection_id, "Disconnect for unknown connection");
            return;
        };

        // Read before remove: listeners must be able to resolve the identity
        // at the moment of the leave event
        let (identity, owns_record) = {
            let Some(entry) = self.by_auth.get(&auth_id) else {
                return;
            };
            (
                entry.identity.clone(),
                entry.record.connection_id == connection_id,
            )
        };

        self.emit(SessionEvent::UserLeft {
            identity,
            still_connected: !owns_record,
        });

        if owns_record {
            self.by_auth
                .remove_if(&auth_id, |_, entry| entry.record.connection_id == connection_id);
            self.emit(SessionEvent::ClientLeft(auth_id));
        } else {
            // A newer connection took over this auth id; its record stays
            debug!(connection_id, auth_id = %auth_id, "Stale connection left after reconnect");
        }
    }

    pub fn identity_by_connection(&self, connection_id: u64) -> Option<UserIdentity> {
        let auth_id = self.by_connection.get(&connection_id)?.clone();
        self.by_auth.get(&auth_id).map(|e| e.identity.clone())
    }

    pub fn record_by_auth(&self, auth_id: &str) -> Option<ConnectionRecord> {
        self.by_auth.get(auth_id).map(|e| e.record.clone())
    }

    /// Store the team slot the match roster assigned to this player.
    pub fn set_team_index(&self, auth_id: &str, team_index: i32) {
        if let Some(mut entry) = self.by_auth.get_mut(auth_id) {
            entry.record.team_index = team_index;
        }
    }

    pub fn connection_count(&self) -> usize {
        self.by_connection.len()
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            warn!("Session event receiver dropped");
        }
    }

    /// Spawn the player's avatar after the configured delay. The team index
    /// is read at fire time so a roster assignment made in the meantime is
    /// picked up.
    fn schedule_spawn(self: &Arc<Self>, connection_id: u64) {
        let directory = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(directory.spawn_delay).await;

            let Some(auth_id) = directory
                .by_connection
                .get(&connection_id)
                .map(|a| a.clone())
            else {
                debug!(connection_id, "Player left before the deferred spawn");
                return;
            };
            let team_index = directory
                .record_by_auth(&auth_id)
                .map(|r| r.team_index)
                .unwrap_or(-1);

            if let Err(e) = directory.spawner.spawn_player(connection_id, team_index).await {
                warn!(connection_id, error = %e, "Player spawn failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::protocol::TeamPreference;

    struct RecordingSpawner {
        calls: Mutex<Vec<(u64, i32)>>,
        count: AtomicUsize,
    }

    impl RecordingSpawner {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                count: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PlayerSpawner for RecordingSpawner {
        async fn spawn_player(&self, connection_id: u64, team_index: i32) -> anyhow::Result<()> {
            self.calls.lock().push((connection_id, team_index));
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn request(connection_id: u64, auth_id: &str) -> ConnectionRequest {
        let payload = ConnectPayload {
            user_name: format!("player-{auth_id}"),
            user_auth_id: auth_id.to_string(),
            team_index: -1,
            user_game_preferences: Default::default(),
        };
        ConnectionRequest {
            connection_id,
            payload: payload.encode(),
        }
    }

    fn expect_joined(event: Option<SessionEvent>) -> UserIdentity {
        match event {
            Some(SessionEvent::UserJoined { identity, .. }) => identity,
            other => panic!("expected UserJoined, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_is_rejected_without_side_effects() {
        let (directory, mut events) = SessionDirectory::new(RecordingSpawner::new(), Duration::ZERO);

        let result = directory.approve(ConnectionRequest {
            connection_id: 1,
            payload: Bytes::from_static(b"\xff not json"),
        });

        assert!(matches!(result, Err(DirectoryError::MalformedPayload(_))));
        assert_eq!(directory.connection_count(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn approve_registers_and_emits_joined() {
        let (directory, mut events) = SessionDirectory::new(RecordingSpawner::new(), Duration::ZERO);

        let identity = directory.approve(request(1, "auth-1")).unwrap();
        assert_eq!(identity.auth_id, "auth-1");
        assert_eq!(identity.team_preference, TeamPreference::None);

        let joined = expect_joined(events.try_recv().ok());
        assert_eq!(joined.auth_id, "auth-1");
        assert_eq!(directory.record_by_auth("auth-1").unwrap().team_index, -1);
        assert_eq!(
            directory.identity_by_connection(1).unwrap().auth_id,
            "auth-1"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_emits_left_then_client_left() {
        let (directory, mut events) = SessionDirectory::new(RecordingSpawner::new(), Duration::ZERO);

        directory.approve(request(1, "auth-1")).unwrap();
        let _ = events.try_recv();

        directory.disconnect(1);

        match events.try_recv() {
            Ok(SessionEvent::UserLeft {
                identity,
                still_connected,
            }) => {
                assert_eq!(identity.auth_id, "auth-1");
                assert!(!still_connected);
            }
            other => panic!("expected UserLeft, got {other:?}"),
        }
        match events.try_recv() {
            Ok(SessionEvent::ClientLeft(auth_id)) => assert_eq!(auth_id, "auth-1"),
            other => panic!("expected ClientLeft, got {other:?}"),
        }
        assert_eq!(directory.connection_count(), 0);
        assert!(directory.record_by_auth("auth-1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_of_unknown_connection_is_silent() {
        let (directory, mut events) = SessionDirectory::new(RecordingSpawner::new(), Duration::ZERO);

        directory.disconnect(42);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_reconnect_keeps_the_new_record() {
        let (directory, mut events) = SessionDirectory::new(RecordingSpawner::new(), Duration::ZERO);

        directory.approve(request(1, "auth-1")).unwrap();
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::UserJoined { rejoin: false, .. })
        ));
        directory.approve(request(2, "auth-1")).unwrap();
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::UserJoined { rejoin: true, .. })
        ));

        // The stale connection leaves: one UserLeft flagged still-connected,
        // but the auth record belongs to connection 2 now, so no ClientLeft
        // and no removal
        directory.disconnect(1);

        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::UserLeft {
                still_connected: true,
                ..
            })
        ));
        assert!(events.try_recv().is_err());
        assert_eq!(
            directory.record_by_auth("auth-1").unwrap().connection_id,
            2
        );

        directory.disconnect(2);
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::UserLeft {
                still_connected: false,
                ..
            })
        ));
        assert!(matches!(events.try_recv(), Ok(SessionEvent::ClientLeft(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_is_deferred_and_reads_the_assigned_team() {
        let spawner = RecordingSpawner::new();
        let (directory, _events) =
            SessionDirectory::new(spawner.clone(), Duration::from_secs(1));

        directory.approve(request(1, "auth-1")).unwrap();
        assert_eq!(spawner.count.load(Ordering::SeqCst), 0);

        // Team assigned between approval and the deferred spawn
        directory.set_team_index("auth-1", 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(spawner.calls.lock().as_slice(), &[(1, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_is_skipped_when_player_already_left() {
        let spawner = RecordingSpawner::new();
        let (directory, _events) =
            SessionDirectory::new(spawner.clone(), Duration::from_secs(1));

        directory.approve(request(1, "auth-1")).unwrap();
        directory.disconnect(1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(spawner.count.load(Ordering::SeqCst), 0);
    }
}
