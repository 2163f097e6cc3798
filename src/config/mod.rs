//! Configuration module - environment variable parsing

use std::env;

/// Which role this process plays in the match lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dedicated server: awaits an allocation, hosts a match, backfills.
    Server,
    /// Client: runs a matchmaking session and surfaces the connect target.
    Client,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Process role (server, client)
    pub role: Role,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Base URL of the matchmaking oracle / orchestration API
    pub oracle_url: String,
    /// API key for the oracle
    pub oracle_api_key: String,
    /// Endpoint of the external server listing directory
    pub listing_url: String,

    /// Public IP clients use to reach this server
    pub server_ip: String,
    /// Public port clients use to reach this server
    pub server_port: u16,
    /// Name shown in server listings
    pub server_name: String,
    /// Map shown in server listings
    pub map_name: String,
    /// Game mode shown in server listings
    pub game_mode: String,

    /// Target player capacity of a match
    pub max_players: u16,
    /// Delay between connection approval and the player spawn, milliseconds
    pub spawn_delay_ms: u64,
    /// Hard deadline on awaiting an allocation, seconds
    pub allocation_deadline_secs: u64,
    /// Interval between listing heartbeats, seconds
    pub heartbeat_interval_secs: u64,

    /// Display name used by the client role
    pub display_name: String,
    /// Whether the client role queues as a pre-made team
    pub team_queue: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let role = match env::var("ROLE").as_deref() {
            Ok("server") | Err(_) => Role::Server,
            Ok("client") => Role::Client,
            Ok(_) => return Err(ConfigError::InvalidValue("ROLE")),
        };

        Ok(Self {
            role,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            oracle_url: env::var("ORACLE_URL").map_err(|_| ConfigError::Missing("ORACLE_URL"))?,
            oracle_api_key: env::var("ORACLE_API_KEY")
                .map_err(|_| ConfigError::Missing("ORACLE_API_KEY"))?,
            listing_url: env::var("LISTING_URL")
                .map_err(|_| ConfigError::Missing("LISTING_URL"))?,

            server_ip: env::var("SERVER_IP").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parse_or("SERVER_PORT", 7777)?,
            server_name: env::var("SERVER_NAME").unwrap_or_else(|_| "tank-arena".to_string()),
            map_name: env::var("MAP_NAME").unwrap_or_else(|_| "default".to_string()),
            game_mode: env::var("GAME_MODE").unwrap_or_else(|_| "default".to_string()),

            max_players: parse_or("MAX_PLAYERS", 20)?,
            spawn_delay_ms: parse_or("SPAWN_DELAY_MS", 1_000)?,
            allocation_deadline_secs: parse_or("ALLOCATION_DEADLINE_SECS", 20)?,
            heartbeat_interval_secs: parse_or("HEARTBEAT_INTERVAL_SECS", 5)?,

            display_name: env::var("DISPLAY_NAME").unwrap_or_else(|_| "Unknown".to_string()),
            team_queue: env::var("TEAM_QUEUE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }

    /// Connection string advertised on backfill tickets
    pub fn connection_string(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }
}

fn parse_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
