//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode of the flag channel.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Transport setup or delivery failure on the local socket.
    Ipc(String),
    /// Operation attempted before connecting or after the connection was lost.
    NotConnected(String),
    /// No response arrived within the request timeout.
    Timeout(String),
    /// Malformed frame, unexpected token count, or invalid flag name/value.
    Protocol(String),
    /// The server answered with an `ERROR` status.
    Command(String),
    /// The request named a command the server does not understand.
    UnknownCommand(String),
    /// File-system or stream I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::NotConnected(msg) => write!(f, "not connected: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Command(msg) => write!(f, "command: {msg}"),
            Self::UnknownCommand(msg) => write!(f, "unknown command: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
