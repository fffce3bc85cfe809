//! # ServoLink Core Library
//!
//! Connection and command protocol manager for a four-channel serial servo
//! controller.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Servo command validation and line encoding
//! - Serial port enumeration and connection lifecycle
//! - Serialized, fire-and-forget command delivery
//! - A background worker for UI-driven callers
//! - A simulated controller for tests and demos
//!
//! ## Example
//!
//! ```rust,no_run
//! use servolink_core::config::LinkConfig;
//! use servolink_core::protocol::ConnectionManager;
//!
//! let manager = ConnectionManager::system(LinkConfig::default());
//! for port in manager.list_ports() {
//!     println!("{}", port.name);
//! }
//!
//! manager.connect("/dev/ttyACM0")?;
//! manager.send("A", 90, 5)?;
//! manager.disconnect()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod channels;
pub mod config;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::channels::ChannelSpec;
    pub use crate::config::LinkConfig;
    pub use crate::protocol::{
        ConnectError, ConnectionManager, ConnectionState, Delivery, DisconnectError, LinkError,
        LinkHandle, LinkWorker, PortDescriptor, SendError, SendPolicy, ServoCommand,
        SimulatedBackend, ValidationError,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
