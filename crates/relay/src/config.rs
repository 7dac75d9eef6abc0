//! Configuration management for tmux-relay.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/tmux-relay/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8765;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(u16),

    #[error("client_buffer must be greater than 0")]
    InvalidClientBuffer,

    #[error("tick_interval_ms must be greater than 0")]
    InvalidTickInterval,

    #[error("debounce_ms must be greater than 0")]
    InvalidDebounce,

    #[error("max_silence_ms ({max_silence}) must not be shorter than debounce_ms ({debounce})")]
    InvalidMaxSilence { max_silence: u64, debounce: u64 },

    #[error("scrollback_lines must be greater than 0")]
    InvalidScrollback,

    #[error("tmux_binary must not be empty")]
    EmptyTmuxBinary,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for tmux-relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Process-level settings.
    pub daemon: DaemonConfig,

    /// Listener settings.
    pub server: ServerConfig,

    /// Capture loop timing.
    pub capture: CaptureConfig,

    /// tmux backend settings.
    pub session: SessionConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub host: String,

    /// Port to bind.
    pub port: u16,

    /// Outbound queue depth per client. Messages beyond it are dropped.
    pub client_buffer: usize,
}

/// Capture loop timing, in milliseconds unless noted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Period between screen captures.
    pub tick_interval_ms: u64,

    /// Quiet time after the last change before the screen is broadcast.
    pub debounce_ms: u64,

    /// Longest a changed screen may be withheld while it keeps changing.
    pub max_silence_ms: u64,

    /// Pause after a failed capture before retrying.
    pub error_backoff_ms: u64,

    /// Number of scrollback lines included in each capture.
    pub scrollback_lines: u32,

    /// Delay between typed text and the Enter key that follows it.
    pub enter_delay_ms: u64,
}

/// tmux backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// tmux executable name or path.
    pub tmux_binary: String,

    /// Session name used by `create` when the client gives none.
    pub default_name: String,

    /// Command used by `create` when the client gives none.
    pub default_command: String,
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
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            client_buffer: 256,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 150,
            debounce_ms: 500,
            max_silence_ms: 5000,
            error_backoff_ms: 500,
            scrollback_lines: 100,
            enter_delay_ms: 50,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tmux_binary: "tmux".to_string(),
            default_name: "main".to_string(),
            default_command: "bash".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tmux-relay")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Empty values are ignored. Supported variables:
    /// - TMUX_RELAY_HOST: Override listen host
    /// - TMUX_RELAY_PORT: Override listen port
    /// - TMUX_RELAY_LOG_LEVEL: Override log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("TMUX_RELAY_HOST") {
            if !host.is_empty() {
                tracing::info!("Overriding host from environment: {}", host);
                self.server.host = host;
            }
        }

        if let Ok(port) = std::env::var("TMUX_RELAY_PORT") {
            if !port.is_empty() {
                match port.parse::<u16>() {
                    Ok(port) => {
                        tracing::info!("Overriding port from environment: {}", port);
                        self.server.port = port;
                    }
                    Err(e) => {
                        tracing::warn!(value = %port, error = %e, "Ignoring invalid TMUX_RELAY_PORT");
                    }
                }
            }
        }

        if let Some(level) = env_log_level() {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.daemon.log_level = level;
        }
    }

    /// The log level to start with, before overrides are applied.
    ///
    /// `TMUX_RELAY_LOG_LEVEL` wins over the configured level.
    pub fn startup_log_level(&self) -> String {
        env_log_level().unwrap_or_else(|| self.daemon.log_level.clone())
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        if self.server.client_buffer == 0 {
            return Err(ConfigError::InvalidClientBuffer);
        }

        let capture = &self.capture;
        if capture.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval);
        }
        if capture.debounce_ms == 0 {
            return Err(ConfigError::InvalidDebounce);
        }
        if capture.max_silence_ms < capture.debounce_ms {
            return Err(ConfigError::InvalidMaxSilence {
                max_silence: capture.max_silence_ms,
                debounce: capture.debounce_ms,
            });
        }
        if capture.scrollback_lines == 0 {
            return Err(ConfigError::InvalidScrollback);
        }

        if self.session.tmux_binary.trim().is_empty() {
            return Err(ConfigError::EmptyTmuxBinary);
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    /// `host:port` string for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn env_log_level() -> Option<String> {
    std::env::var("TMUX_RELAY_LOG_LEVEL")
        .ok()
        .filter(|level| !level.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
