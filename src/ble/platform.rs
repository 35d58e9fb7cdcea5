//! Platform BLE backend abstraction.
//!
//! The connection state machine is written once against [`BlePlatform`] and
//! [`GattLink`]. [`BtleplugPlatform`](crate::ble::btleplug_backend::BtleplugPlatform)
//! is the concrete backend for desktop targets; tests supply in-process fakes.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;

/// Opaque platform address of a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Wrap a platform address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A single advertisement received while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Address of the advertising peripheral.
    pub address: DeviceAddress,
    /// Advertised local name, if the packet carried one.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// A device selected for connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    /// Platform address.
    pub address: DeviceAddress,
    /// Advertised local name at the time of the match.
    pub local_name: String,
}

impl DeviceIdentity {
    /// Create an identity from an address and local name.
    pub fn new(address: impl Into<DeviceAddress>, local_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            local_name: local_name.into(),
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.local_name, self.address)
    }
}

/// A GATT service as enumerated by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
}

/// Properties advertised by a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    /// Supports reads.
    pub read: bool,
    /// Supports writes with response.
    pub write: bool,
    /// Supports writes without response.
    pub write_without_response: bool,
    /// Supports notifications.
    pub notify: bool,
    /// Supports indications.
    pub indicate: bool,
}

/// A GATT characteristic as enumerated by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the owning service.
    pub service_uuid: Uuid,
    /// Advertised properties.
    pub properties: CharacteristicProperties,
}

/// Client Characteristic Configuration Descriptor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CccdValue {
    /// Value-change delivery disabled.
    None,
    /// Unacknowledged notifications.
    Notify,
    /// Acknowledged indications.
    Indicate,
}

impl CccdValue {
    /// The little-endian descriptor bytes for this value.
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            Self::None => [0x00, 0x00],
            Self::Notify => [0x01, 0x00],
            Self::Indicate => [0x02, 0x00],
        }
    }
}

impl std::fmt::Display for CccdValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Notify => write!(f, "Notify"),
            Self::Indicate => write!(f, "Indicate"),
        }
    }
}

/// Completion status of a GATT request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattStatus {
    /// The request completed.
    Success,
    /// The device could not be reached.
    Unreachable,
    /// The device answered with an ATT protocol error code.
    ProtocolError(u8),
    /// The request was rejected for lack of permission.
    AccessDenied,
}

impl GattStatus {
    /// Check if the request completed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for GattStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Unreachable => write!(f, "Unreachable"),
            Self::ProtocolError(code) => write!(f, "ProtocolError({code:#04x})"),
            Self::AccessDenied => write!(f, "AccessDenied"),
        }
    }
}

/// Platform BLE stack: scanning and connection establishment.
#[async_trait]
pub trait BlePlatform: Send + Sync + 'static {
    /// Live GATT session type returned by [`BlePlatform::connect`].
    type Link: GattLink;

    /// Start scanning and return the stream of received advertisements.
    async fn scan(&self) -> Result<BoxStream<'static, Advertisement>>;

    /// Stop scanning. Must tolerate being called when not scanning.
    async fn stop_scan(&self) -> Result<()>;

    /// Open a GATT connection to the peripheral at `address`.
    async fn connect(&self, address: &DeviceAddress) -> Result<Self::Link>;
}

/// A live GATT session with one peripheral.
#[async_trait]
pub trait GattLink: Send + Sync + 'static {
    /// Enumerate all services of the peripheral.
    async fn services(&self) -> Result<Vec<ServiceInfo>>;

    /// Enumerate the characteristics of one service.
    async fn characteristics(&self, service: &ServiceInfo) -> Result<Vec<CharacteristicInfo>>;

    /// Write the client configuration descriptor of a characteristic.
    async fn write_descriptor(
        &self,
        characteristic: &CharacteristicInfo,
        value: CccdValue,
    ) -> Result<GattStatus>;

    /// Stream of value changes delivered for a characteristic, in arrival order.
    async fn value_changes(
        &self,
        characteristic: &CharacteristicInfo,
    ) -> Result<BoxStream<'static, Bytes>>;

    /// Write a value to a characteristic and wait for the completion status.
    async fn write_value(&self, characteristic: &CharacteristicInfo, data: &[u8])
        -> Result<GattStatus>;

    /// Close the session.
    async fn disconnect(&self) -> Result<()>;

    /// Resolves once the platform reports that the link dropped.
    ///
    /// Losses that happened any time after `connect` returned, including
    /// before this is called, must still resolve the future.
    fn link_lost(&self) -> BoxFuture<'static, ()>;
}
