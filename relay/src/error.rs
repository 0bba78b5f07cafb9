use std::path::PathBuf;
use std::time::Duration;

use internals::TransportError;
use thiserror::Error;

/// Problems with the configuration. All of them are fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    InvalidPath(PathBuf),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Required setting '{0}' is missing or empty")]
    MissingSetting(&'static str),

    #[error("Settings '{first}' and '{second}' must differ (both are '{value}')")]
    Conflict {
        first: &'static str,
        second: &'static str,
        value: String,
    },

    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Unsupported content type: '{0}'")]
    UnsupportedContentType(String),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Broker did not confirm the publish within {0:?}")]
    ConfirmTimeout(Duration),
}

#[derive(Error, Debug)]
pub enum SubscribeError {
    #[error("Failed to start consumer on '{queue_name}': {source}")]
    Transport {
        queue_name: String,
        #[source]
        source: TransportError,
    },
}

/// Anything that prevents the relay from starting.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Subscribe(#[from] SubscribeError),
}
