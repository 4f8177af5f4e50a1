//! Configuration management for the WorkflowGuard service
//!
//! Handles server binding, database location, upstream API credentials,
//! scheduler cadence and version allocation parameters.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Upstream automation platform (HubSpot) configuration
    pub hubspot: HubSpotConfig,
    /// Background job configuration
    pub scheduler: SchedulerConfig,
    /// Version allocation tuning
    pub versioning: VersioningConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// SQLite storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the database file (default: "data")
    pub data_dir: String,
    /// Upper bound for pooled connections
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSpotConfig {
    /// API base URL, without trailing slash
    pub api_base: String,
    /// Private-app or OAuth access token; empty disables authenticated calls
    #[serde(skip_serializing, default)]
    pub access_token: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

/// Cron expressions use the six-field format of tokio-cron-scheduler
/// (seconds first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Periodic change-detecting sync of every active workflow
    pub sync_schedule: String,
    /// Periodic verbatim checkpoint of every active workflow
    pub backup_schedule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Attempts made when two writers race for the same version number
    pub max_retries: u32,
}

impl DatabaseConfig {
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("workflowguard.db")
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("WORKFLOWGUARD_HOST", "0.0.0.0"),
                port: env_parse("WORKFLOWGUARD_PORT", 3004),
            },
            database: DatabaseConfig {
                data_dir: env_or("WORKFLOWGUARD_DATA_DIR", "data"),
                max_connections: env_parse("WORKFLOWGUARD_DB_CONNECTIONS", 8),
            },
            hubspot: HubSpotConfig {
                api_base: env_or("HUBSPOT_API_BASE", "https://api.hubapi.com")
                    .trim_end_matches('/')
                    .to_string(),
                access_token: env_or("HUBSPOT_ACCESS_TOKEN", ""),
                timeout_secs: env_parse("HUBSPOT_TIMEOUT_SECS", 15),
            },
            scheduler: SchedulerConfig {
                enabled: env_parse("WORKFLOWGUARD_SCHEDULER_ENABLED", true),
                sync_schedule: env_or("WORKFLOWGUARD_SYNC_SCHEDULE", "0 0 */4 * * *"),
                backup_schedule: env_or("WORKFLOWGUARD_BACKUP_SCHEDULE", "0 0 3 * * *"),
            },
            versioning: VersioningConfig {
                max_retries: env_parse("WORKFLOWGUARD_VERSION_RETRIES", 5),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_file_lives_in_data_dir() {
        let config = DatabaseConfig {
            data_dir: "/var/lib/guard".to_string(),
            max_connections: 4,
        };
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/guard/workflowguard.db")
        );
    }

    #[test]
    fn unparsable_env_values_fall_back() {
        std::env::set_var("WORKFLOWGUARD_TEST_PORT_GARBAGE", "not-a-port");
        assert_eq!(env_parse("WORKFLOWGUARD_TEST_PORT_GARBAGE", 3004u16), 3004);
        assert_eq!(env_parse("WORKFLOWGUARD_TEST_UNSET_KEY", 7u32), 7);
    }

    #[test]
    fn access_token_is_never_serialized() {
        let mut config = Config::default();
        config.hubspot.access_token = "secret-token".to_string();
        let rendered = serde_json::to_string(&config).unwrap();
        assert!(!rendered.contains("secret-token"));
    }
}
