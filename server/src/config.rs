use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::state::SessionSettings;

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    pub handshake_timeout_secs: u64,
    pub outbound_queue_capacity: usize,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub access_token_ttl_mins: i64,
    pub refresh_token_ttl_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            config: "./collab.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            handshake_timeout_secs: 10,
            outbound_queue_capacity: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
            access_token_ttl_mins: 30,
            refresh_token_ttl_days: 7,
        }
    }
}

/// Sheet collaboration server
///
/// Only flags given on the command line (or through their env var) are
/// serialized, so unset flags never mask values from the TOML file.
/// Defaults live in `Config::default()`.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "collab-server", version, about = "Real-time sheet collaboration server")]
pub struct Cli {
    /// Port to listen on [default: 8000]
    #[arg(long, env = "COLLAB_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "COLLAB_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./collab.toml]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "COLLAB_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key) [default: ./data]
    #[arg(long, env = "COLLAB_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Seconds a WebSocket handshake may take before the upgrade is aborted [default: 10]
    #[arg(long, env = "COLLAB_HANDSHAKE_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_secs: Option<u64>,

    /// Frames queued per connection before a slow peer is dropped [default: 256]
    #[arg(long, env = "COLLAB_OUTBOUND_QUEUE_CAPACITY")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_queue_capacity: Option<usize>,

    /// Seconds between WebSocket pings [default: 30]
    #[arg(long, env = "COLLAB_PING_INTERVAL_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    /// Seconds to wait for a pong before closing the connection [default: 10]
    #[arg(long, env = "COLLAB_PONG_TIMEOUT_SECS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,

    /// Access token lifetime in minutes [default: 30]
    #[arg(long, env = "COLLAB_ACCESS_TOKEN_TTL_MINS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token_ttl_mins: Option<i64>,

    /// Refresh token lifetime in days [default: 7]
    #[arg(long, env = "COLLAB_REFRESH_TOKEN_TTL_DAYS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token_ttl_days: Option<i64>,
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (COLLAB_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_cli(Cli::parse())
    }

    /// Layer already-parsed CLI args over the defaults, TOML file and env.
    pub fn from_cli(cli: Cli) -> Result<Self, figment::Error> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default().config);

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("COLLAB_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            // mpsc::channel panics on zero capacity
            outbound_queue_capacity: self.outbound_queue_capacity.max(1),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Sheet Collaboration Server Configuration
# Place this file at ./collab.toml or specify with --config <path>
# All settings can be overridden via environment variables (COLLAB_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key
# data_dir = "./data"

# ---- Collaboration sessions ----

# Seconds a WebSocket handshake (token, user and sheet checks) may take
# handshake_timeout_secs = 10

# Frames queued per connection; a peer that falls this far behind is dropped
# outbound_queue_capacity = 256

# Seconds between WebSocket pings, and how long to wait for the pong
# ping_interval_secs = 30
# pong_timeout_secs = 10

# ---- Tokens ----
# access_token_ttl_mins = 30
# refresh_token_ttl_days = 7
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_settings_from_defaults() {
        let settings = Config::default().session_settings();
        assert_eq!(settings.handshake_timeout, Duration::from_secs(10));
        assert_eq!(settings.outbound_queue_capacity, 256);
        assert_eq!(settings.ping_interval, Duration::from_secs(30));
        assert_eq!(settings.pong_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_queue_capacity_is_clamped() {
        let config = Config {
            outbound_queue_capacity: 0,
            ..Config::default()
        };
        assert_eq!(config.session_settings().outbound_queue_capacity, 1);
    }

    fn write_toml(dir: &tempfile::TempDir, body: &str) -> String {
        let path = dir.path().join("collab.toml");
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_toml_values_survive_unset_cli_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(&dir, "port = 9000\nhandshake_timeout_secs = 3\njson_logs = true\n");

        let cli = Cli::try_parse_from(["collab-server", "--config", path.as_str()]).unwrap();
        let config = Config::from_cli(cli).unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.handshake_timeout_secs, 3);
        assert!(config.json_logs);
        assert_eq!(config.config, path);
        // Untouched fields keep their defaults
        assert_eq!(config.outbound_queue_capacity, 256);
        assert_eq!(config.data_dir, "./data");
    }

    #[test]
    fn test_cli_flags_override_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_toml(&dir, "port = 9000\nhandshake_timeout_secs = 3\n");

        let cli = Cli::try_parse_from([
            "collab-server",
            "--config",
            path.as_str(),
            "--port",
            "9100",
        ])
        .unwrap();
        let config = Config::from_cli(cli).unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.handshake_timeout_secs, 3);
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let path = path.to_string_lossy().into_owned();

        let cli = Cli::try_parse_from(["collab-server", "--config", path.as_str()]).unwrap();
        let config = Config::from_cli(cli).unwrap();

        assert_eq!(
            config,
            Config {
                config: path,
                ..Config::default()
            }
        );
    }

    #[test]
    fn test_template_parses_as_toml() {
        let parsed: Result<Config, _> = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(&generate_config_template()))
            .extract();
        assert_eq!(parsed.unwrap().port, 8000);
    }
}
