//! Configuration management for the ttyweb daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/ttyweb/config.toml`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::session::PtyConfig;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("command must not be empty")]
    EmptyCommand,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("prefix_path must start with '/', got {0}")]
    InvalidPrefixPath(String),

    #[error("extra_env entries must look like KEY=VALUE, got {0}")]
    InvalidEnvEntry(String),

    #[error("workdir is not a directory: {0}")]
    InvalidWorkdir(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the ttyweb daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// HTTP listener configuration.
    pub server: ServerConfig,

    /// The command every session runs.
    pub command: CommandConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or address to bind.
    pub host: String,

    /// TCP port to bind. 0 picks a free port.
    pub port: u16,

    /// Path prefix for every route.
    pub prefix_path: String,

    /// Page served at the prefix root, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_file: Option<PathBuf>,
}

/// Command configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    /// Command line, split on whitespace.
    pub command: String,

    /// Working directory for spawned processes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,

    /// Extra `KEY=VALUE` environment entries.
    pub extra_env: Vec<String>,

    /// Whether processes inherit the daemon's environment.
    pub inherit_env: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            prefix_path: "/".to_string(),
            index_file: None,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: default_shell(),
            workdir: None,
            extra_env: Vec::new(),
            inherit_env: true,
        }
    }
}

impl CommandConfig {
    /// Builds the spawn options for session processes.
    pub fn pty_config(&self, cancellation_scope: Option<CancellationToken>) -> PtyConfig {
        PtyConfig {
            working_directory: self.workdir.clone(),
            extra_environment: self.extra_env.clone(),
            inherit_parent_environment: self.inherit_env,
            cancellation_scope,
            ..PtyConfig::default()
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ttyweb")
        .join("config.toml")
}

/// Returns the user's shell, falling back to `/bin/sh`.
fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TTYWEB_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - TTYWEB_COMMAND: Override the session command
    /// - TTYWEB_PORT: Override the listening port
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("TTYWEB_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(command) = std::env::var("TTYWEB_COMMAND") {
            if !command.trim().is_empty() {
                tracing::info!("Overriding command from environment: {}", command);
                self.command.command = command;
            }
        }

        if let Ok(port) = std::env::var("TTYWEB_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Overriding port from environment: {}", port);
                    self.server.port = port;
                }
                Err(_) if port.is_empty() => {}
                Err(e) => tracing::warn!("Ignoring TTYWEB_PORT={}: {}", port, e),
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.command.split_whitespace().next().is_none() {
            return Err(ConfigError::EmptyCommand);
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        if !self.server.prefix_path.starts_with('/') {
            return Err(ConfigError::InvalidPrefixPath(
                self.server.prefix_path.clone(),
            ));
        }

        if let Some(entry) = self
            .command
            .extra_env
            .iter()
            .find(|e| !matches!(e.split_once('='), Some((key, _)) if !key.is_empty()))
        {
            return Err(ConfigError::InvalidEnvEntry(entry.clone()));
        }

        if let Some(dir) = &self.command.workdir {
            if !dir.is_dir() {
                return Err(ConfigError::InvalidWorkdir(dir.display().to_string()));
            }
        }

        Ok(())
    }

    /// Reads `path`, falling back to defaults when the file is absent.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents)
                .with_context(|| format!("Invalid config file {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Cannot read {}", path.display())),
        }
    }

    /// Reads [`default_config_path`].
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| anyhow::anyhow!(describe_toml_error(text, &e)))
    }

    /// Writes the configuration as TOML, creating missing parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
        }
        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Cannot write {}", path.display()))?;

        tracing::info!(path = %path.display(), "Wrote configuration");
        Ok(())
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Cannot serialize configuration")
    }
}

/// Names the offending line of a TOML document alongside the parser message.
fn describe_toml_error(text: &str, error: &toml::de::Error) -> String {
    let message = error.message().trim_end();
    match error.span() {
        Some(span) => {
            let line = text[..span.start.min(text.len())].matches('\n').count() + 1;
            format!("TOML error on line {line}: {message}")
        }
        None => format!("TOML error: {message}"),
    }
}
