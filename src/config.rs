//! Configuration module for the balancer.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values; routes given on the
//! command line are added to the ones from the file.

use crate::routes::{parse_backend, RouteEntry, RouteError, StaticRouteTable};
use crate::runtime::ListenerSettings;
use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Command-line arguments for the balancer
#[derive(Parser, Debug)]
#[command(name = "tcp-balancer")]
#[command(author = "tcp-balancer authors")]
#[command(version = "0.1.0")]
#[command(about = "Routes client sessions to per-client backends", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Route a client to a backend, as <client_id>=<ip>:<port> (repeatable)
    #[arg(short, long = "route")]
    pub routes: Vec<RouteEntry>,

    /// Maximum number of concurrent sessions
    #[arg(long)]
    pub max_sessions: Option<usize>,

    /// Bytes queued per backend before client reads pause
    #[arg(long)]
    pub max_pending_bytes: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum number of concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Bytes queued per backend before client reads pause
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,
    /// Readiness events handled per poll
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            max_pending_bytes: default_max_pending_bytes(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// A `[[routes]]` table entry
#[derive(Debug, Deserialize)]
pub struct RouteConfig {
    pub client_id: u32,
    /// Backend address as <ip>:<port>
    pub backend: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7000
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_max_pending_bytes() -> usize {
    64 * 1024 // 64 KB
}

fn default_event_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_sessions: usize,
    pub max_pending_bytes: usize,
    pub event_capacity: usize,
    pub log_level: String,
    pub routes: StaticRouteTable,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let host = cli.host.unwrap_or(toml_config.server.host);
        let ip: IpAddr = host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(host.clone()))?;
        let port = cli.port.unwrap_or(toml_config.server.port);

        let mut entries = Vec::with_capacity(toml_config.routes.len() + cli.routes.len());
        for route in &toml_config.routes {
            entries.push(RouteEntry {
                client_id: route.client_id,
                backend: parse_backend(&route.backend)?,
            });
        }
        entries.extend(cli.routes);
        let routes = StaticRouteTable::from_entries(entries)?;

        Ok(Config {
            listen: SocketAddr::new(ip, port),
            max_sessions: cli
                .max_sessions
                .unwrap_or(toml_config.server.max_sessions),
            max_pending_bytes: cli
                .max_pending_bytes
                .unwrap_or(toml_config.server.max_pending_bytes),
            event_capacity: toml_config.server.event_capacity,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
            routes,
        })
    }

    /// Runtime tunables derived from this configuration.
    pub fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings {
            max_sessions: self.max_sessions,
            max_pending_bytes: self.max_pending_bytes,
            event_capacity: self.event_capacity,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidHost(String),
    Route(RouteError),
}

impl From<RouteError> for ConfigError {
    fn from(e: RouteError) -> Self {
        ConfigError::Route(e)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidHost(host) => {
                write!(f, "Invalid listen host '{}': expected an IP address", host)
            }
            ConfigError::Route(e) => write!(f, "Invalid route: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::RouteTable;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.max_pending_bytes, 64 * 1024);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            port = 9100
            max_sessions = 16

            [logging]
            level = "debug"

            [[routes]]
            client_id = 42
            backend = "10.0.0.5:9000"

            [[routes]]
            client_id = 7
            backend = "10.0.0.6:9000"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.max_sessions, 16);
        assert_eq!(config.server.event_capacity, 1024);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].client_id, 42);
    }

    #[test]
    fn test_cli_overrides_and_extends_file() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 9100

            [[routes]]
            client_id = 42
            backend = "10.0.0.5:9000"
            "#,
        )
        .unwrap();
        let cli = CliArgs::parse_from([
            "tcp-balancer",
            "--port",
            "9200",
            "--route",
            "7=127.0.0.1:9001",
            "--log-level",
            "debug",
        ]);

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9200".parse().unwrap());
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes.lookup(42), Some("10.0.0.5:9000".parse().unwrap()));
        assert_eq!(config.routes.lookup(7), Some("127.0.0.1:9001".parse().unwrap()));
        assert_eq!(config.listener_settings().max_sessions, 10_000);
    }

    #[test]
    fn test_duplicate_route_across_sources() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [[routes]]
            client_id = 1
            backend = "10.0.0.5:9000"
            "#,
        )
        .unwrap();
        let cli = CliArgs::parse_from(["tcp-balancer", "-r", "1=10.0.0.6:9000"]);

        match Config::merge(cli, toml_config) {
            Err(ConfigError::Route(RouteError::Duplicate(1))) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_host() {
        let cli = CliArgs::parse_from(["tcp-balancer", "--host", "localhost"]);
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::InvalidHost(_))
        ));
    }
}
