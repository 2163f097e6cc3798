//! Tank Arena match coordinator
//!
//! This binary runs the match lifecycle for a multiplayer tank arena:
//! - Server role: awaits an orchestration allocation, keeps the match
//!   backfilled and announces itself to the server listing directory
//! - Client role: runs one matchmaking session and surfaces the server
//!   address to connect to
//!
//! Physics, rendering and the game-object transport live elsewhere; this
//! process only coordinates tickets, rosters and sessions.

mod app;
mod backfill;
mod config;
mod matchmaking;
mod oracle;
mod protocol;
mod server;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::app::ServerState;
use crate::config::{Config, Role};
use crate::matchmaking::MatchmakingSession;
use crate::oracle::OracleClient;
use crate::protocol::{TeamPreference, UserIdentity};
use crate::server::PlayerSpawner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting Tank Arena match coordinator");

    match config.role {
        Role::Server => run_server(config).await,
        Role::Client => run_client(config).await,
    }
}

/// Dedicated-server role: allocation -> backfill -> session events.
async fn run_server(config: Config) -> anyhow::Result<()> {
    let spawner: Arc<dyn PlayerSpawner> = Arc::new(TransportSpawner);
    let (state, mut events) = ServerState::new(config, spawner);

    // Announce ourselves to the listing directory right away
    state.listing.begin();

    let notifications = state.oracle.subscribe_allocations();
    let mut coordinator = state.coordinator();

    match state.allocation.await_allocation(notifications).await {
        Ok(payload) => {
            info!(
                queue = %payload.queue_name,
                players = payload.match_properties.players.len(),
                "Match payload received"
            );
            if let Err(e) = coordinator.start_match(payload).await {
                error!(error = %e, "Failed to start backfill for the allocated match");
            }
        }
        Err(e) => {
            // The server stays up; the transport may still receive players
            warn!(error = %e, "No allocation resolved");
        }
    }

    info!(
        connection = %state.config.connection_string(),
        "Server open; the transport drives connection approval"
    );

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Starting graceful shutdown");
        }
        _ = coordinator.run(&mut events) => {}
    }

    coordinator.shutdown().await;
    state.listing.stop();

    info!("Server shutdown complete");
    Ok(())
}

/// Client role: one matchmaking session, cancelled by Ctrl+C.
async fn run_client(config: Config) -> anyhow::Result<()> {
    let oracle = Arc::new(OracleClient::new(&config));
    let session = Arc::new(MatchmakingSession::new(oracle));

    let preference = if config.team_queue {
        TeamPreference::TeamQueue
    } else {
        TeamPreference::None
    };
    let user = UserIdentity::new(
        Uuid::new_v4().to_string(),
        config.display_name.clone(),
        preference,
    );

    let canceller = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancelling matchmaking");
            canceller.cancel();
        }
    });

    match session.start(user, config.team_queue).await {
        Ok(connection) => {
            info!(ip = %connection.ip, port = connection.port, "Match found, hand off to the game client");
        }
        Err(e) => {
            warn!(error = %e, "Matchmaking ended without a match");
        }
    }

    Ok(())
}

/// Spawns player avatars through the external game-object transport. The
/// transport itself is outside this coordinator; here we only record the
/// operation.
struct TransportSpawner;

#[async_trait]
impl PlayerSpawner for TransportSpawner {
    async fn spawn_player(&self, connection_id: u64, team_index: i32) -> anyhow::Result<()> {
        info!(connection_id, team_index, "Spawning player avatar");
        Ok(())
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
