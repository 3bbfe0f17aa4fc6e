//! Configuration for the commlink demo server.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Which bundled handler the demo server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    /// Reply with every received chunk unchanged.
    Echo,
    /// Log every received chunk, reply with nothing.
    Sink,
}

/// Command-line arguments for the demo server
#[derive(Parser, Debug)]
#[command(name = "commlink")]
#[command(version = "0.1.0")]
#[command(about = "A minimal thread-per-connection TCP server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// TCP port to listen on (0 = OS-assigned)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Per-connection receive buffer size in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Pending-connection backlog
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Server name used in logs and thread names
    #[arg(short, long)]
    pub name: Option<String>,

    /// Handler to run (echo, sink)
    #[arg(long, value_enum)]
    pub handler: Option<HandlerKind>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// TCP port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Per-connection receive buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Pending-connection backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Server name used in logs and thread names
    pub name: Option<String>,
    /// Handler to run
    pub handler: Option<HandlerKind>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            buffer_size: default_buffer_size(),
            backlog: default_backlog(),
            name: None,
            handler: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    7070
}

fn default_buffer_size() -> usize {
    16 * 1024
}

fn default_backlog() -> u32 {
    128
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub buffer_size: usize,
    pub backlog: u32,
    pub name: Option<String>,
    pub handler: HandlerKind,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();
        Self::merge(cli)
    }

    fn merge(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        // Merge CLI args with TOML config (CLI takes precedence)
        Ok(Config {
            port: cli.port.unwrap_or(toml_config.server.port),
            buffer_size: cli.buffer_size.unwrap_or(toml_config.server.buffer_size),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            name: cli.name.or(toml_config.server.name),
            handler: cli
                .handler
                .or(toml_config.server.handler)
                .unwrap_or(HandlerKind::Echo),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.server.buffer_size, 16 * 1024);
        assert_eq!(config.server.backlog, 128);
        assert!(config.server.handler.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            port = 9000
            buffer_size = 4096
            backlog = 32
            name = "updater"
            handler = "sink"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.buffer_size, 4096);
        assert_eq!(config.server.backlog, 32);
        assert_eq!(config.server.name.as_deref(), Some("updater"));
        assert_eq!(config.server.handler, Some(HandlerKind::Sink));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_takes_precedence() {
        let dir = std::env::temp_dir().join("commlink-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\nbuffer_size = 4096\n",
        )
        .unwrap();

        let cli = CliArgs {
            config: Some(path),
            port: Some(9100),
            buffer_size: None,
            backlog: None,
            name: None,
            handler: None,
            log_level: "info".to_string(),
        };

        let config = Config::merge(cli).unwrap();
        assert_eq!(config.port, 9100); // CLI wins
        assert_eq!(config.buffer_size, 4096); // TOML fills the rest
        assert_eq!(config.backlog, 128);
        assert_eq!(config.handler, HandlerKind::Echo);
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/commlink.toml")),
            port: None,
            buffer_size: None,
            backlog: None,
            name: None,
            handler: None,
            log_level: "info".to_string(),
        };

        assert!(matches!(
            Config::merge(cli),
            Err(ConfigError::FileRead(_, _))
        ));
    }
}
