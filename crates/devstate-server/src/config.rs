// ABOUTME: Configuration loading and validation for the devstate server.
// ABOUTME: Reads DEVSTATE_* environment variables for the storage root, bind address, and codec.

use std::net::SocketAddr;
use std::path::PathBuf;

use devstate_store::codec::DEFAULT_DEFLATE_LEVEL;
use devstate_store::{Codec, EngineConfig};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DEVSTATE_BIND is not a valid socket address: {0}")]
    InvalidBind(String),

    #[error("DEVSTATE_CODEC must be \"deflate\" or \"null\", got {0:?}")]
    InvalidCodec(String),

    #[error("DEVSTATE_DEFLATE_LEVEL must be an integer from 0 to 9, got {0:?}")]
    InvalidDeflateLevel(String),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DevstateConfig {
    pub root: PathBuf,
    pub bind: SocketAddr,
    pub codec: Codec,
}

impl DevstateConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - DEVSTATE_ROOT: storage root for partition logs (default: ~/.devstate/data)
    /// - DEVSTATE_BIND: socket address to bind (default: 127.0.0.1:50054)
    /// - DEVSTATE_CODEC: block codec for new files, deflate or null (default: deflate)
    /// - DEVSTATE_DEFLATE_LEVEL: deflate level 0-9 (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let root = var("DEVSTATE_ROOT").map(PathBuf::from).unwrap_or_else(|| {
            var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".devstate")
                .join("data")
        });

        let bind_str = var("DEVSTATE_BIND").unwrap_or_else(|| "127.0.0.1:50054".to_string());
        let bind: SocketAddr = bind_str
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_str))?;

        let level = match var("DEVSTATE_DEFLATE_LEVEL") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|l| *l <= 9)
                .ok_or(ConfigError::InvalidDeflateLevel(raw))?,
            None => DEFAULT_DEFLATE_LEVEL,
        };

        let codec_name = var("DEVSTATE_CODEC").unwrap_or_else(|| "deflate".to_string());
        let codec = Codec::from_name(codec_name.trim(), level)
            .map_err(|_| ConfigError::InvalidCodec(codec_name))?;

        Ok(Self { root, bind, codec })
    }

    /// The engine configuration derived from this server configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(self.root.clone()).with_codec(self.codec)
    }
}
