//! Servo command line codec
//!
//! Every command is one ASCII line:
//!
//! ```text
//! <channel_id>:<angle>:<speed>\n
//! ```
//!
//! The firmware splits on `:` and `\n`, so the channel id may never contain
//! either, and the numbers are plain decimal without sign or padding.

use serde::{Deserialize, Serialize};

use super::ValidationError;

/// Lowest accepted servo angle in degrees
pub const ANGLE_MIN: i32 = 0;
/// Highest accepted servo angle in degrees
pub const ANGLE_MAX: i32 = 180;
/// Lowest accepted step delay in milliseconds (fastest)
pub const SPEED_MIN: i32 = 1;
/// Highest accepted step delay in milliseconds (slowest)
pub const SPEED_MAX: i32 = 20;

/// Angle a freshly shown channel starts at
pub const INITIAL_ANGLE: i32 = 90;
/// Step delay a freshly shown channel starts at
pub const INITIAL_SPEED: i32 = 5;

/// Field separator
const SEPARATOR: u8 = b':';
/// Line terminator
const TERMINATOR: u8 = b'\n';

/// Check angle and speed against the accepted ranges
pub fn validate(angle: i32, speed: i32) -> Result<(), ValidationError> {
    check_range("angle", angle, ANGLE_MIN, ANGLE_MAX)?;
    check_range("speed", speed, SPEED_MIN, SPEED_MAX)
}

fn check_range(field: &'static str, value: i32, min: i32, max: i32) -> Result<(), ValidationError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

/// Check that a channel id can be placed on the wire unambiguously.
///
/// The id must be non-empty printable ASCII without the field separator.
/// Printable ASCII already excludes `\n` and `\r`.
pub fn validate_channel_id(channel_id: &str) -> Result<(), ValidationError> {
    let ok = !channel_id.is_empty()
        && channel_id
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != SEPARATOR);
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidChannelId(channel_id.to_string()))
    }
}

/// Validate and encode one command line
pub fn encode(channel_id: &str, angle: i32, speed: i32) -> Result<Vec<u8>, ValidationError> {
    validate_channel_id(channel_id)?;
    validate(angle, speed)?;
    // i32 Display never pads or adds a '+' sign
    Ok(format!("{}:{}:{}\n", channel_id, angle, speed).into_bytes())
}

/// A single validated servo command.
///
/// Only built by [`ServoCommand::new`] and the deserializer, which both
/// apply the checks of [`encode`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawServoCommand")]
pub struct ServoCommand {
    channel_id: String,
    angle: i32,
    speed: i32,
}

#[derive(Deserialize)]
struct RawServoCommand {
    channel_id: String,
    angle: i32,
    speed: i32,
}

impl TryFrom<RawServoCommand> for ServoCommand {
    type Error = ValidationError;

    fn try_from(raw: RawServoCommand) -> Result<Self, Self::Error> {
        Self::new(raw.channel_id, raw.angle, raw.speed)
    }
}

impl ServoCommand {
    /// Build a command, rejecting anything [`encode`] would reject
    pub fn new(
        channel_id: impl Into<String>,
        angle: i32,
        speed: i32,
    ) -> Result<Self, ValidationError> {
        let channel_id = channel_id.into();
        validate_channel_id(&channel_id)?;
        validate(angle, speed)?;
        Ok(Self {
            channel_id,
            angle,
            speed,
        })
    }

    /// Channel the command addresses
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Target angle in degrees
    pub fn angle(&self) -> i32 {
        self.angle
    }

    /// Step delay in milliseconds
    pub fn speed(&self) -> i32 {
        self.speed
    }

    /// The command a channel shows before the user touches it
    pub fn initial(channel_id: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(channel_id, INITIAL_ANGLE, INITIAL_SPEED)
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        format!("{}:{}:{}\n", self.channel_id, self.angle, self.speed).into_bytes()
    }

    /// Parse one complete line as produced by [`encode`].
    ///
    /// Returns `None` for anything that is not exactly one well-formed,
    /// in-range command terminated by a single `\n`.
    pub fn parse_line(line: &[u8]) -> Option<Self> {
        let body = line.strip_suffix(&[TERMINATOR])?;
        if body.contains(&TERMINATOR) {
            return None;
        }
        let text = std::str::from_utf8(body).ok()?;
        let mut fields = text.split(SEPARATOR as char);
        let channel_id = fields.next()?;
        let angle = parse_decimal(fields.next()?)?;
        let speed = parse_decimal(fields.next()?)?;
        if fields.next().is_some() {
            return None;
        }
        Self::new(channel_id, angle, speed).ok()
    }
}

/// Strict decimal: digits only, no leading zeros except a bare "0"
fn parse_decimal(field: &str) -> Option<i32> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if field.len() > 1 && field.starts_with('0') {
        return None;
    }
    field.parse().ok()
}
