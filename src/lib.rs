// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # muse-ble-link
//!
//! A cross-platform Rust library that finds a Muse v3 sensor over Bluetooth
//! Low Energy, connects to it, subscribes to its characteristics and sends
//! it command frames.
//!
//! Only one sensor is handled at a time. The first advertisement whose local
//! name contains `muse_v3` is connected automatically.
//!
//! ## Features
//!
//! - **Discovery**: Scan for the sensor by advertised name
//! - **Connection**: Discover the Muse service and its command and data characteristics
//! - **Notifications**: Indicate or notify subscriptions, delivered per characteristic
//! - **Commands**: Write 7-byte command frames with response
//! - **Status**: Observe Disconnected / Connected / Streaming transitions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use muse_ble_link::{DeviceManager, LinkConfig, LinkEvent, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = DeviceManager::with_default_adapter(LinkConfig::default()).await?;
//!     let mut events = manager.subscribe_events();
//!
//!     manager.start_scan().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let LinkEvent::DeviceConnected(identity) = event {
//!             println!("Connected to {}", identity);
//!             manager.send_default_command().await?;
//!             break;
//!         }
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Custom Backends
//!
//! The link logic runs against the [`BlePlatform`] and [`GattLink`] traits.
//! [`BtleplugPlatform`] is the default backend; any other BLE stack can be
//! plugged in by implementing those two traits.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod callback;
pub mod config;
pub mod device_manager;
pub mod error;
pub mod events;
pub mod protocol;
pub mod utils;

// Re-exports for convenience
pub use callback::CallbackHandle;
pub use config::LinkConfig;
pub use device_manager::DeviceManager;
pub use error::{Error, ErrorKind, Result};
pub use events::{DisconnectReason, LinkEvent};
pub use protocol::{CommandFrame, COMMAND_FRAME_LEN};
pub use utils::{format_hex, parse_hex};

// Re-export commonly used types from submodules
pub use ble::btleplug_backend::BtleplugPlatform;
pub use ble::characteristics::{CharacteristicHandle, Notification};
pub use ble::platform::{
    Advertisement, BlePlatform, CccdValue, CharacteristicInfo, CharacteristicProperties,
    DeviceAddress, DeviceIdentity, GattLink, GattStatus, ServiceInfo,
};
pub use ble::status::ConnectionState;
pub use ble::uuids::{
    CharacteristicRole, COMMAND_CHARACTERISTIC_UUID, DATA_CHARACTERISTIC_UUID, SERVICE_UUID,
};
