use std::path::PathBuf;
use thiserror::Error;

/// An error on the connection to the server. Always fatal to the current connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Could not resolve {0}: {1}")]
    Resolve(String, std::io::Error),
    #[error("No addresses found for {0}")]
    NoAddresses(String),
    #[error("Could not connect: {0}")]
    Connect(std::io::Error),
    #[error("Connection attempt timed out")]
    ConnectTimeout,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed by peer")]
    Closed,
    #[error("Not connected")]
    NotConnected,
}

/// A line received from the server that could not be turned into an [`Event`](crate::Event)
#[derive(Debug, Error)]
#[error("{message} (line: {line:?})")]
pub struct ParseError {
    pub message: String,
    pub line: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: line.into(),
        }
    }
}

/// A failure inside a plugin hook or deferred continuation
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Message(String),
    #[error("Invalid settings: {0}")]
    Settings(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<&str> for PluginError {
    fn from(msg: &str) -> Self {
        Self::Message(msg.to_string())
    }
}

impl From<String> for PluginError {
    fn from(msg: String) -> Self {
        Self::Message(msg)
    }
}

pub type PluginResult = Result<(), PluginError>;

/// Errors that could happen when loading or saving a config
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error on {1}: {0}")]
    IoError(std::io::Error, PathBuf),
    #[error("JSON parse error in {1}: {0}")]
    Json5Error(json5::Error, PathBuf),
    #[error("JSON serialisation error for {1}: {0}")]
    JsonError(serde_json::Error, PathBuf),
    #[error("Invalid configuration in {1}: {0}")]
    Invalid(String, PathBuf),
}
