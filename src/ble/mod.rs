//! BLE communication module.
//!
//! This module provides the link to a single Muse sensor: scanning,
//! connecting, subscribing to characteristics and writing commands.

pub mod btleplug_backend;
pub mod characteristics;
pub mod connection;
pub mod platform;
pub mod scanner;
pub mod status;
pub mod uuids;
pub mod writer;

pub use btleplug_backend::{BtleplugLink, BtleplugPlatform};
pub use characteristics::{CharacteristicHandle, LinkSession, Notification, SubscriptionController};
pub use connection::ConnectionManager;
pub use platform::{
    Advertisement, BlePlatform, CccdValue, CharacteristicInfo, CharacteristicProperties,
    DeviceAddress, DeviceIdentity, GattLink, GattStatus, ServiceInfo,
};
pub use scanner::AdvertisementScanner;
pub use status::{ConnectionState, StatusRegister};
pub use uuids::*;
pub use writer::CommandWriter;
