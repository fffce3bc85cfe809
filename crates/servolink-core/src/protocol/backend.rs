//! Port backend abstraction
//!
//! The connection manager only talks to these traits, so the OS serial layer
//! can be swapped for the in-memory simulator.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::time::Duration;

use super::{BAUD_RATE, READ_TIMEOUT_MS};

/// A serial device visible to the system, not yet opened
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
}

impl PortDescriptor {
    /// Descriptor for the named port
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Line settings applied when a port is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    /// Line speed in baud
    pub baud_rate: u32,
    /// Read/write timeout on the open port
    pub timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: BAUD_RATE,
            timeout: Duration::from_millis(READ_TIMEOUT_MS),
        }
    }
}

/// An open, writable link to the servo controller
pub trait ServoLink: Write + Send {
    /// Name of the port this link was opened on
    fn name(&self) -> &str;

    /// Release the underlying device.
    ///
    /// Close is best-effort: an error here still leaves the link released.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Source of ports and links
pub trait PortBackend: Send {
    /// Enumerate currently visible ports
    fn enumerate(&self) -> Result<Vec<PortDescriptor>, serialport::Error>;

    /// Open the named port with the given settings
    fn open(&mut self, name: &str, settings: &SerialSettings) -> io::Result<Box<dyn ServoLink>>;
}
