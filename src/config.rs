//! Server and client configuration.
//!
//! Defaults are built in. A JSON document in the `REMOTE_EXEC_CONFIG`
//! environment variable overrides them, and CLI flags override both.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::protocol::frame::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_READ_CHUNK};

/// Environment variable holding the JSON configuration.
pub const CONFIG_ENV: &str = "REMOTE_EXEC_CONFIG";

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 25587;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Address to bind (server) or connect to (client).
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port. `0` lets the OS pick one when serving.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bytes requested per socket read.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Largest frame accepted before the connection is dropped.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_chunk_size: default_read_chunk_size(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Config {
    /// Load from `REMOTE_EXEC_CONFIG`, falling back to defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) => Self::from_json(&json)
                .with_context(|| format!("Failed to parse {CONFIG_ENV}")),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Cannot read {CONFIG_ENV}")),
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        anyhow::ensure!(config.read_chunk_size > 0, "read_chunk_size must be positive");
        anyhow::ensure!(config.max_frame_bytes > 0, "max_frame_bytes must be positive");
        Ok(config)
    }

    /// Apply CLI overrides.
    #[must_use]
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_read_chunk_size() -> usize {
    DEFAULT_READ_CHUNK
}

const fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
