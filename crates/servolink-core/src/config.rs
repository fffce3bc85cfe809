//! Link configuration
//!
//! Static settings read once at startup. Baud rate and timeout are fixed by
//! the firmware, see [`crate::protocol::BAUD_RATE`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::channels::ChannelSpec;
use crate::protocol::SendPolicy;

/// Default bound on how long a worker round trip may take
pub const DEFAULT_OP_TIMEOUT_MS: u64 = 3000;

/// Errors loading a [`LinkConfig`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Connection manager and worker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Channels the board exposes
    pub channels: Vec<ChannelSpec>,
    /// How the worker treats bursts of sends
    pub send_policy: SendPolicy,
    /// Worker round-trip bound in milliseconds
    pub op_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            channels: ChannelSpec::default_panel(),
            send_policy: SendPolicy::SendAll,
            op_timeout_ms: DEFAULT_OP_TIMEOUT_MS,
        }
    }
}

impl LinkConfig {
    /// Parse and validate JSON text
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Reject channel sets the wire format cannot carry
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(ConfigError::Invalid("no channels configured".to_string()));
        }
        let mut seen = HashSet::new();
        for channel in &self.channels {
            channel
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if !seen.insert(channel.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate channel id {:?}",
                    channel.id
                )));
            }
        }
        if self.op_timeout_ms == 0 {
            return Err(ConfigError::Invalid("op_timeout_ms must be > 0".to_string()));
        }
        Ok(())
    }

    /// Whether `id` names a configured channel
    pub fn has_channel(&self, id: &str) -> bool {
        self.channels.iter().any(|c| c.id == id)
    }

    /// Worker round-trip bound
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.channels.len(), 4);
        assert_eq!(config.send_policy, SendPolicy::SendAll);
        assert_eq!(config.op_timeout(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
        assert!(config.has_channel("D"));
        assert!(!config.has_channel("E"));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = LinkConfig::from_json_str(r#"{ "send_policy": "latest_wins" }"#).unwrap();
        assert_eq!(config.send_policy, SendPolicy::LatestWins);
        assert_eq!(config.channels, ChannelSpec::default_panel());
    }

    #[test]
    fn test_rejects_bad_channel_ids() {
        let err = LinkConfig::from_json_str(
            r#"{ "channels": [ { "id": "A:1", "title": "bad" } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = LinkConfig::from_json_str(
            r#"{ "channels": [ { "id": "A", "title": "one" }, { "id": "A", "title": "two" } ] }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let err = LinkConfig::from_json_str(r#"{ "channels": [] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "channels": [ {{ "id": "X", "title": "Pan" }}, {{ "id": "Y", "title": "Tilt" }} ], "op_timeout_ms": 500 }}"#
        )
        .unwrap();
        let config = LinkConfig::from_file(file.path()).unwrap();
        assert!(config.has_channel("Y"));
        assert_eq!(config.op_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_missing_file() {
        let err = LinkConfig::from_file("/nonexistent/servolink.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
