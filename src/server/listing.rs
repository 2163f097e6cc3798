//! Server listing heartbeat: fire-and-forget status reports to an external
//! server directory.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;

/// One heartbeat report as the directory sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHeartbeat {
    pub name: String,
    pub current_players: u16,
    pub max_players: u16,
    pub map: String,
    pub mode: String,
    pub timestamp: DateTime<Utc>,
}

/// Shared player counter the coordinator bumps on join/leave.
#[derive(Clone, Default)]
pub struct PlayerCountHandle {
    count: Arc<AtomicU16>,
}

impl PlayerCountHandle {
    pub fn add_player(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn remove_player(&self) {
        // Saturate at zero; a leave for a player the listing never counted
        // must not wrap around
        let _ = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn current(&self) -> u16 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Periodically announces this server to the listing directory. Failures are
/// logged and skipped; the directory is never allowed to take the match down.
pub struct ServerListing {
    client: Client,
    endpoint: String,
    name: String,
    map: String,
    mode: String,
    max_players: u16,
    interval: Duration,
    players: PlayerCountHandle,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl ServerListing {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.listing_url.clone(),
            name: config.server_name.clone(),
            map: config.map_name.clone(),
            mode: config.game_mode.clone(),
            max_players: config.max_players,
            interval: Duration::from_secs(config.heartbeat_interval_secs),
            players: PlayerCountHandle::default(),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Counter handle for the coordinator to keep current.
    pub fn player_count(&self) -> PlayerCountHandle {
        self.players.clone()
    }

    pub fn heartbeat(&self) -> ServerHeartbeat {
        ServerHeartbeat {
            name: self.name.clone(),
            current_players: self.players.current(),
            max_players: self.max_players,
            map: self.map.clone(),
            mode: self.mode.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Start the heartbeat loop. No-op if already running.
    pub fn begin(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let listing = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(listing.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                if listing.stop_requested.load(Ordering::SeqCst) {
                    listing.running.store(false, Ordering::SeqCst);
                    break;
                }

                let heartbeat = listing.heartbeat();
                debug!(players = heartbeat.current_players, "Publishing server heartbeat");

                let result = listing
                    .client
                    .post(&listing.endpoint)
                    .json(&heartbeat)
                    .send()
                    .await;

                match result {
                    Ok(response) if !response.status().is_success() => {
                        warn!(status = %response.status(), "Listing directory rejected heartbeat");
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to publish heartbeat");
                    }
                    Ok(_) => {}
                }
            }
        });
    }

    /// Stop the loop at its next tick.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_count_saturates_at_zero() {
        let players = PlayerCountHandle::default();

        players.remove_player();
        assert_eq!(players.current(), 0);

        players.add_player();
        players.add_player();
        players.remove_player();
        assert_eq!(players.current(), 1);
    }

    #[test]
    fn heartbeat_serializes_expected_fields() {
        let heartbeat = ServerHeartbeat {
            name: "arena-1".into(),
            current_players: 3,
            max_players: 20,
            map: "default".into(),
            mode: "default".into(),
            timestamp: Utc::now(),
        };

        let value = serde_json::to_value(&heartbeat).unwrap();
        assert_eq!(value["name"], "arena-1");
        assert_eq!(value["currentPlayers"], 3);
        assert_eq!(value["maxPlayers"], 20);
        assert!(value["timestamp"].is_string());
    }
}
