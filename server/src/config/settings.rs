use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub presence: PresenceConfig,
    pub feed: FeedConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// Presence tuning: how long a closed connection may stay silent before the
/// device is marked Offline, and the WebSocket keepalive cadence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PresenceConfig {
    pub offline_grace_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    pub channel: String,
    pub retry_backoff_secs: u64,
}

fn env_u64(key: &str, default: &str) -> Result<u64, AppError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .map_err(|_| AppError::Configuration(format!("{} must be a valid number", key)))
}

impl AppSettings {
    pub fn from_env() -> Result<Self, AppError> {
        // App config
        let app_name = env::var("APP_NAME").unwrap_or_else(|_| "fleetlink".to_string());
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        // Database config
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Configuration("DATABASE_URL must be set".to_string()))?;

        // Server config
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| AppError::Configuration("SERVER_PORT must be a valid port number".to_string()))?;

        // CORS origins
        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        // Presence tuning
        let offline_grace_secs = env_u64("PRESENCE_OFFLINE_GRACE_SECS", "8")?;
        let heartbeat_interval_secs = env_u64("WS_HEARTBEAT_INTERVAL_SECS", "30")?;
        let client_timeout_secs = env_u64("WS_CLIENT_TIMEOUT_SECS", "60")?;

        // Change feed
        let feed_channel =
            env::var("CHANGE_FEED_CHANNEL").unwrap_or_else(|_| "record_changes".to_string());
        let retry_backoff_secs = env_u64("CHANGE_FEED_RETRY_BACKOFF_SECS", "5")?;

        Ok(Self {
            app: AppConfig {
                name: app_name,
                environment,
            },
            database: DatabaseConfig { url: database_url },
            server: ServerConfig {
                host: server_host,
                port: server_port,
                cors_origins,
            },
            presence: PresenceConfig {
                offline_grace_secs,
                heartbeat_interval_secs,
                client_timeout_secs,
            },
            feed: FeedConfig {
                channel: feed_channel,
                retry_backoff_secs,
            },
        })
    }
}
