//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants used for Muse v3 communication and the
//! role each characteristic plays.

use uuid::Uuid;

/// Muse v3 GATT service UUID.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xc8c0_a708_e361_4b5e_a365_98fa6b0a836f);
/// Command characteristic UUID (write, notify). Carries command frames and their status replies.
pub const COMMAND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xd591_3036_2d8a_41ee_85b9_4e361aa5c8a7);
/// Data characteristic UUID (notify/indicate). Carries streamed telemetry.
pub const DATA_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x09bf_2c52_d1d9_c0b7_4145_475964544307);

/// The role a characteristic plays within the Muse service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CharacteristicRole {
    /// Command channel: host writes frames, device replies with status.
    Command,
    /// Data channel: device streams telemetry.
    Data,
}

impl CharacteristicRole {
    /// All roles, in the order they are reported.
    pub const ALL: [CharacteristicRole; 2] = [Self::Command, Self::Data];

    /// The characteristic UUID bound to this role.
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Command => COMMAND_CHARACTERISTIC_UUID,
            Self::Data => DATA_CHARACTERISTIC_UUID,
        }
    }

    /// Look up the role for a characteristic UUID (exact match).
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.uuid() == *uuid)
    }
}

impl std::fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command => write!(f, "Command"),
            Self::Data => write!(f, "Data"),
        }
    }
}

/// Check if a service UUID is the Muse service.
pub fn is_muse_service(uuid: &Uuid) -> bool {
    *uuid == SERVICE_UUID
}
