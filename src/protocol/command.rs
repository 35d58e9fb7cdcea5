//! Command frame encoding.
//!
//! Frame format (7 bytes, written to the command characteristic):
//! - Opcode(1) = `0x02`
//! - Subcode(1) = `0x05`
//! - Length(1) = `0x08`
//! - Value(1)
//! - Reserved(2) = `0x00 0x00`
//! - Terminator(1) = `0x01`

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::utils::{format_hex, parse_hex};

/// Length of an encoded command frame.
pub const COMMAND_FRAME_LEN: usize = 7;

/// Fixed opcode byte.
pub const COMMAND_OPCODE: u8 = 0x02;
/// Fixed subcode byte.
pub const COMMAND_SUBCODE: u8 = 0x05;
/// Fixed length byte.
pub const COMMAND_LENGTH: u8 = 0x08;
/// Fixed terminator byte.
pub const COMMAND_TERMINATOR: u8 = 0x01;

/// An outbound command frame. Only the value byte varies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandFrame {
    value: u8,
}

impl CommandFrame {
    /// Value sent by [`CommandFrame::default`].
    pub const DEFAULT_VALUE: u8 = 0x10;

    /// Create a frame carrying `value`.
    pub const fn new(value: u8) -> Self {
        Self { value }
    }

    /// The variable value byte.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Encode the frame.
    pub fn to_bytes(&self) -> [u8; COMMAND_FRAME_LEN] {
        [
            COMMAND_OPCODE,
            COMMAND_SUBCODE,
            COMMAND_LENGTH,
            self.value,
            0x00,
            0x00,
            COMMAND_TERMINATOR,
        ]
    }

    /// Decode a frame, checking every fixed byte.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let frame: &[u8; COMMAND_FRAME_LEN] =
            data.try_into().map_err(|_| Error::InvalidData {
                context: format!(
                    "Command frame must be {} bytes, got {}",
                    COMMAND_FRAME_LEN,
                    data.len()
                ),
            })?;

        let candidate = Self::new(frame[3]);
        if *frame != candidate.to_bytes() {
            return Err(Error::InvalidData {
                context: format!("Malformed command frame: {}", format_hex(data)),
            });
        }

        Ok(candidate)
    }
}

impl Default for CommandFrame {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VALUE)
    }
}

impl From<u8> for CommandFrame {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl From<CommandFrame> for Bytes {
    fn from(frame: CommandFrame) -> Self {
        Bytes::copy_from_slice(&frame.to_bytes())
    }
}

impl TryFrom<&[u8]> for CommandFrame {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self> {
        Self::parse(data)
    }
}

/// Parses the dash-separated hex form, e.g. `02-05-08-20-00-00-01`.
impl std::str::FromStr for CommandFrame {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        Self::parse(&parse_hex(text)?)
    }
}

impl std::fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_hex(&self.to_bytes()))
    }
}
