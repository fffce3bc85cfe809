//! Servo channel layout
//!
//! A channel is one addressable servo output on the controller board. The
//! board is wired with four outputs named `A` through `D`.

use serde::{Deserialize, Serialize};

use crate::protocol::codec::{self, ServoCommand};
use crate::protocol::ValidationError;

/// Channel ids of the stock four-output board
pub const DEFAULT_CHANNEL_IDS: [&str; 4] = ["A", "B", "C", "D"];

/// One channel as shown on a control panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Wire id, fixed by the physical wiring
    pub id: String,
    /// Human readable label
    pub title: String,
}

impl ChannelSpec {
    /// Channel with the given wire id and label
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }

    /// The stock board: A..D titled "Servo 1".."Servo 4"
    pub fn default_panel() -> Vec<ChannelSpec> {
        DEFAULT_CHANNEL_IDS
            .iter()
            .enumerate()
            .map(|(i, id)| ChannelSpec::new(*id, format!("Servo {}", i + 1)))
            .collect()
    }

    /// Check the id can be put on the wire
    pub fn validate(&self) -> Result<(), ValidationError> {
        codec::validate_channel_id(&self.id)
    }

    /// Command the panel starts this channel at
    pub fn initial_command(&self) -> Result<ServoCommand, ValidationError> {
        ServoCommand::initial(self.id.clone())
    }
}
