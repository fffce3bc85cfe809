//! Connection management
//!
//! Owns the single serial handle and drives the connection state machine:
//!
//! ```text
//! Disconnected --connect ok--> Connected --disconnect--> Disconnected
//!      |                          |  ^
//!      +--connect err--> Failed <-+  |  (write fault)
//!                          |         |
//!                          +--connect ok
//! ```
//!
//! Every operation runs under one lock, so a disconnect can never race a
//! send and two sends can never interleave bytes on the wire.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::backend::{PortBackend, PortDescriptor, SerialSettings, ServoLink};
use super::serial::SystemBackend;
use super::{codec, ConnectError, DisconnectError, SendError, ValidationError};
use crate::config::LinkConfig;

/// Connection state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// No port open
    Disconnected,
    /// Port open and writable
    Connected {
        /// Name of the open port
        port: String,
    },
    /// Last open or write failed; stays here until the caller connects again
    Failed {
        /// Error text from the failed open or write
        reason: String,
    },
}

impl ConnectionState {
    /// True only in the `Connected` state
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// Port name while connected
    pub fn port(&self) -> Option<&str> {
        match self {
            ConnectionState::Connected { port } => Some(port),
            _ => None,
        }
    }
}

/// Cumulative traffic since the last successful connect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCounters {
    /// Complete command lines written
    pub lines_sent: u64,
    /// Bytes accepted by the port
    pub bytes_sent: u64,
}

struct Inner {
    backend: Box<dyn PortBackend>,
    /// Present exactly when `state` is `Connected`
    link: Option<Box<dyn ServoLink>>,
    state: ConnectionState,
    counters: LinkCounters,
}

impl Inner {
    /// Release the current handle, if any. Returns the port name and close result.
    fn release(&mut self) -> Option<(String, std::io::Result<()>)> {
        let link = self.link.take()?;
        let port = link.name().to_string();
        let result = link.close();
        match &result {
            Ok(()) => info!(port = %port, "Closed serial port"),
            Err(e) => warn!(port = %port, error = %e, "Serial port close failed (released anyway)"),
        }
        Some((port, result))
    }
}

/// Servo controller connection
pub struct ConnectionManager {
    config: LinkConfig,
    settings: SerialSettings,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    /// Create a manager over an arbitrary backend (not yet connected)
    pub fn new(config: LinkConfig, backend: impl PortBackend + 'static) -> Self {
        Self {
            config,
            settings: SerialSettings::default(),
            inner: Mutex::new(Inner {
                backend: Box::new(backend),
                link: None,
                state: ConnectionState::Disconnected,
                counters: LinkCounters::default(),
            }),
        }
    }

    /// Create a manager over the OS serial ports
    pub fn system(config: LinkConfig) -> Self {
        Self::new(config, SystemBackend)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configuration this manager validates against
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// List available serial ports. Never fails; enumeration errors yield an empty list.
    pub fn list_ports(&self) -> Vec<PortDescriptor> {
        let inner = self.lock();
        match inner.backend.enumerate() {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "Port enumeration failed");
                Vec::new()
            }
        }
    }

    /// Get current connection state
    pub fn current_state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    /// Traffic counters for the current connection
    pub fn counters(&self) -> LinkCounters {
        self.lock().counters
    }

    /// Open `port` at the fixed line settings.
    ///
    /// Any handle already open is released first. On failure the state becomes
    /// `Failed`; the manager never retries on its own.
    pub fn connect(&self, port: &str) -> Result<(), ConnectError> {
        let mut inner = self.lock();

        if let Some((old, _)) = inner.release() {
            debug!(old = %old, new = %port, "Released previous port before reconnect");
        }
        inner.state = ConnectionState::Disconnected;

        match inner.backend.open(port, &self.settings) {
            Ok(link) => {
                info!(
                    port = %port,
                    baud = self.settings.baud_rate,
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "Connected to servo controller"
                );
                inner.link = Some(link);
                inner.state = ConnectionState::Connected {
                    port: port.to_string(),
                };
                inner.counters = LinkCounters::default();
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(port = %port, error = %reason, "Failed to open serial port");
                inner.state = ConnectionState::Failed {
                    reason: format!("{}: {}", port, reason),
                };
                Err(ConnectError::PortUnavailable {
                    port: port.to_string(),
                    reason,
                })
            }
        }
    }

    /// Release the port. Idempotent; the state is `Disconnected` afterwards even if close fails.
    pub fn disconnect(&self) -> Result<(), DisconnectError> {
        let mut inner = self.lock();
        let released = inner.release();
        inner.state = ConnectionState::Disconnected;

        match released {
            Some((port, Err(e))) => Err(DisconnectError::CloseFailed {
                port,
                reason: e.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Encode and write one servo command.
    ///
    /// Fire-and-forget: success means the serial layer accepted the bytes.
    /// A write fault moves the connection to `Failed`.
    pub fn send(&self, channel_id: &str, angle: i32, speed: i32) -> Result<(), SendError> {
        let mut inner = self.lock();
        if inner.link.is_none() {
            return Err(SendError::NotConnected);
        }

        let line = codec::encode(channel_id, angle, speed)?;
        if !self.config.has_channel(channel_id) {
            return Err(ValidationError::InvalidChannelId(channel_id.to_string()).into());
        }

        let written = match inner.link.as_mut() {
            Some(link) => link.write_all(&line).and_then(|()| link.flush()),
            None => return Err(SendError::NotConnected),
        };

        match written {
            Ok(()) => {
                inner.counters.lines_sent += 1;
                inner.counters.bytes_sent += line.len() as u64;
                debug!(channel = channel_id, angle, speed, "Sent servo command");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(channel = channel_id, error = %reason, "Serial write failed, dropping link");
                let port = inner.release().map(|(port, _)| port).unwrap_or_default();
                inner.state = ConnectionState::Failed {
                    reason: format!("{}: write failed: {}", port, reason),
                };
                Err(SendError::WriteFailed(reason))
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}
