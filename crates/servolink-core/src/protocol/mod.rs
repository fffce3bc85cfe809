//! Servo line protocol and serial link management
//!
//! Commands are fire-and-forget ASCII lines (`A:90:5\n`) written to a single
//! serial port at 9600 8N1. The controller never answers.

pub mod backend;
pub mod codec;
mod connection;
mod error;
pub mod serial;
pub mod sim;
mod worker;

pub use backend::{PortBackend, PortDescriptor, SerialSettings, ServoLink};
pub use codec::{encode, validate, validate_channel_id, ServoCommand};
pub use connection::{ConnectionManager, ConnectionState, LinkCounters};
pub use error::{ConnectError, DisconnectError, LinkError, SendError, ValidationError};
pub use serial::{list_ports, SystemBackend};
pub use sim::SimulatedBackend;
pub use worker::{Delivery, LinkHandle, LinkWorker, SendPolicy};

/// Baud rate the controller firmware listens at
pub const BAUD_RATE: u32 = 9600;

/// Serial read/write timeout in milliseconds
pub const READ_TIMEOUT_MS: u64 = 1000;
