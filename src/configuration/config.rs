use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::debug;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Command-line arguments of the server.
///
/// Every argument is optional: without a configuration file the built-in defaults are used,
/// and the network overrides always win over whatever the file says.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "ptzcam")]
#[command(version)]
#[command(about = "PTZ camera control and snapshot server")]
pub struct CliArgs {
    /// Path to a TOML configuration file
    ///
    /// # Command Line
    /// Positional, or through the `PTZCAM_CONFIG` environment variable
    #[arg(env = "PTZCAM_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Network address to bind the HTTP server to.
    ///
    /// # Command Line
    /// Use `--bind-address <ADDRESS>` to set this value from the CLI
    #[arg(long)]
    pub bind_address: Option<String>,

    /// TCP port of the HTTP server.
    ///
    /// # Command Line
    /// Use `--port <PORT>` to set this value from the CLI
    #[arg(long)]
    pub port: Option<u16>,
}

/// Application configuration structure that defines all runtime parameters.
///
/// Loaded from a TOML file with `toml` + `serde`. Every section and field has a default, so an
/// empty file is a valid configuration.
///
/// # Examples
///
/// ```
/// use ptzcam::configuration::config::Config;
///
/// let config = Config::from_toml_str("[server]\nport = 9000\n").unwrap();
/// assert_eq!(config.server.port, 9000);
/// assert_eq!(config.session.idle_timeout_secs, 30);
/// ```
///
/// # Fields Overview
///
/// - `server`: HTTP binding and cookie lifetime
/// - `session`: idle window, task periods, profile switch bound and snapshot quality
/// - `device`: timeout of every request sent to a camera
/// - `decoder`: location of the external decoder binary
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub device: DeviceConfig,
    pub decoder: DecoderConfig,
}

impl Config {
    /// Builds the configuration described by the command line: the file if one was given,
    /// defaults otherwise, then the explicit overrides. The result is validated.
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config_file {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("No configuration file given, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .bind_address
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::BadIPFormatting(self.server.bind_address.clone()))?;

        if self.server.port == 0 {
            return Err(ConfigError::NotInRange(String::from("server.port must not be 0")));
        }

        let session = &self.session;
        let periods = [
            ("session.idle_timeout_secs", session.idle_timeout_secs),
            ("session.idle_check_interval_ms", session.idle_check_interval_ms),
            ("session.sweep_interval_ms", session.sweep_interval_ms),
            ("session.stop_poll_interval_ms", session.stop_poll_interval_ms),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(ConfigError::NotInRange(format!("{} must be greater than 0", name)));
            }
        }

        if !(1..=100).contains(&session.jpeg_quality) {
            return Err(ConfigError::NotInRange(format!(
                "session.jpeg_quality must be within 1..=100, got {}",
                session.jpeg_quality
            )));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self
            .server
            .bind_address
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::BadIPFormatting(self.server.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}
