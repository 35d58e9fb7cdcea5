//! Error types for the muse-ble-link crate.

use std::time::Duration;

use thiserror::Error;

use crate::ble::platform::GattStatus;
use crate::ble::uuids::CharacteristicRole;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The platform could not start scanning, or the advertisement stream ended.
    #[error("Scan failed: {reason}")]
    ScanFailed {
        /// Description of why scanning failed.
        reason: String,
    },

    /// No matching advertisement was seen before the configured scan timeout.
    #[error("No matching device found within {after:?}")]
    ScanTimeout {
        /// The configured timeout.
        after: Duration,
    },

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The platform connect did not complete within the configured timeout.
    #[error("Connection attempt timed out after {after:?}")]
    ConnectTimeout {
        /// The configured timeout.
        after: Duration,
    },

    /// Another connection attempt is still outstanding.
    #[error("Connection already in progress")]
    ConnectionInProgress,

    /// A device is already connected.
    #[error("Already connected")]
    AlreadyConnected,

    /// Operation requires a connection but no device is connected.
    #[error("Device not connected")]
    NotConnected,

    /// The target service was not among the enumerated services.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// A role characteristic was not found in the target service.
    #[error("{role} characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The role of the missing characteristic.
        role: CharacteristicRole,
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Service or characteristic enumeration failed.
    #[error("Discovery failed: {reason}")]
    DiscoveryFailed {
        /// Description of why discovery failed.
        reason: String,
    },

    /// The characteristic advertises neither Notify nor Indicate.
    #[error("Cannot subscribe: {role} characteristic does not support Notify or Indicate")]
    NotificationsUnsupported {
        /// The role of the characteristic.
        role: CharacteristicRole,
    },

    /// Writing the client configuration descriptor failed.
    #[error("Failed to subscribe to {role} characteristic: {reason}")]
    SubscriptionFailed {
        /// The role of the characteristic.
        role: CharacteristicRole,
        /// Description of the failure.
        reason: String,
    },

    /// Writing to the command characteristic failed.
    #[error("Failed to write to command characteristic: {reason}")]
    WriteFailed {
        /// Description of the failure.
        reason: String,
    },

    /// A characteristic handle was used after its connection was torn down.
    #[error("{role} characteristic handle is no longer valid")]
    HandleInvalidated {
        /// The role of the characteristic.
        role: CharacteristicRole,
    },

    /// Invalid data was received or supplied.
    #[error("Invalid data: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {name} = {value}")]
    InvalidConfig {
        /// The name of the setting.
        name: String,
        /// The rejected value.
        value: String,
    },
}

impl Error {
    /// Classify the error by the stage of the link lifecycle it belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bluetooth(_) | Self::BluetoothUnavailable => ErrorKind::Platform,
            Self::ScanFailed { .. } | Self::ScanTimeout { .. } => ErrorKind::Scan,
            Self::ConnectionFailed { .. } | Self::ConnectTimeout { .. } => ErrorKind::Connect,
            Self::ServiceNotFound { .. }
            | Self::CharacteristicNotFound { .. }
            | Self::DiscoveryFailed { .. } => ErrorKind::Discovery,
            Self::NotificationsUnsupported { .. } | Self::SubscriptionFailed { .. } => {
                ErrorKind::Subscription
            }
            Self::WriteFailed { .. } => ErrorKind::Write,
            Self::ConnectionInProgress
            | Self::AlreadyConnected
            | Self::NotConnected
            | Self::HandleInvalidated { .. }
            | Self::InvalidData { .. }
            | Self::InvalidConfig { .. } => ErrorKind::Usage,
        }
    }

    /// Build a [`Error::WriteFailed`] from a non-success GATT status.
    pub(crate) fn write_status(status: GattStatus) -> Self {
        Self::WriteFailed {
            reason: format!("status {status}"),
        }
    }
}

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The BLE stack itself failed or is unavailable.
    Platform,
    /// Advertisement scanning failed or timed out.
    Scan,
    /// The device was unreachable.
    Connect,
    /// The target service or a characteristic was missing.
    Discovery,
    /// A notification subscription could not be set up.
    Subscription,
    /// A command write failed.
    Write,
    /// The operation was not valid in the current state.
    Usage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Platform => write!(f, "platform"),
            Self::Scan => write!(f, "scan"),
            Self::Connect => write!(f, "connect"),
            Self::Discovery => write!(f, "discovery"),
            Self::Subscription => write!(f, "subscription"),
            Self::Write => write!(f, "write"),
            Self::Usage => write!(f, "usage"),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
