//! Protocol errors

use std::time::Duration;
use thiserror::Error;

/// Bad command data supplied by the caller. Never changes connection state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} {value} out of range ({min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("Invalid channel id: {0:?}")]
    InvalidChannelId(String),
}

/// Errors opening a serial port
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Port unavailable: {port} ({reason})")]
    PortUnavailable { port: String, reason: String },
}

/// Errors releasing a serial port. The link is considered released regardless.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisconnectError {
    #[error("Failed to close {port}: {reason}")]
    CloseFailed { port: String, reason: String },
}

/// Errors sending a servo command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Not connected to servo controller")]
    NotConnected,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Serial write failed: {0}")]
    WriteFailed(String),
}

/// Errors surfaced by the background link worker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Disconnect(#[from] DisconnectError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error("Link operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Link worker is not running")]
    WorkerStopped,
}
