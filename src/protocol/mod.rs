//! Protocol module for constructing messages sent to the device.
//!
//! This module contains the command frame encoding used on the command
//! characteristic.

pub mod command;

pub use command::{CommandFrame, COMMAND_FRAME_LEN};
