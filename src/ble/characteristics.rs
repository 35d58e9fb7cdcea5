//! GATT characteristic handling.
//!
//! Provides characteristic handles and the subscription controller that
//! negotiates Notify/Indicate and routes value changes to per-role receivers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ble::platform::{
    CccdValue, CharacteristicInfo, CharacteristicProperties, DeviceIdentity, GattLink, GattStatus,
};
use crate::ble::uuids::CharacteristicRole;
use crate::error::{Error, Result};
use crate::utils::format_hex;

/// A live GATT session, owned by the connection manager.
///
/// Characteristic handles only hold a weak reference; once the session is
/// invalidated (or dropped) every handle operation fails.
pub struct LinkSession<L> {
    link: L,
    identity: DeviceIdentity,
    generation: u64,
    valid: AtomicBool,
}

impl<L: GattLink> LinkSession<L> {
    pub(crate) fn new(link: L, identity: DeviceIdentity, generation: u64) -> Self {
        Self {
            link,
            identity,
            generation,
            valid: AtomicBool::new(true),
        }
    }

    /// The platform link.
    pub(crate) fn link(&self) -> &L {
        &self.link
    }

    /// The connected device.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Monotonic connection counter, used to discard stale link-loss signals.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Check if the session is still usable.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }
}

/// Non-owning handle to one role characteristic of the current connection.
pub struct CharacteristicHandle<L> {
    role: CharacteristicRole,
    info: CharacteristicInfo,
    session: Weak<LinkSession<L>>,
}

impl<L> Clone for CharacteristicHandle<L> {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            info: self.info.clone(),
            session: self.session.clone(),
        }
    }
}

impl<L> std::fmt::Debug for CharacteristicHandle<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CharacteristicHandle")
            .field("role", &self.role)
            .field("uuid", &self.info.uuid)
            .finish()
    }
}

impl<L: GattLink> CharacteristicHandle<L> {
    pub(crate) fn new(
        role: CharacteristicRole,
        info: CharacteristicInfo,
        session: Weak<LinkSession<L>>,
    ) -> Self {
        Self {
            role,
            info,
            session,
        }
    }

    /// The role of this characteristic.
    pub fn role(&self) -> CharacteristicRole {
        self.role
    }

    /// The characteristic UUID.
    pub fn uuid(&self) -> Uuid {
        self.info.uuid
    }

    /// The advertised properties.
    pub fn properties(&self) -> CharacteristicProperties {
        self.info.properties
    }

    /// Check if the owning connection is still alive.
    pub fn is_valid(&self) -> bool {
        self.session().is_ok()
    }

    fn session(&self) -> Result<Arc<LinkSession<L>>> {
        self.session
            .upgrade()
            .filter(|session| session.is_valid())
            .ok_or(Error::HandleInvalidated { role: self.role })
    }

    /// Write a value and return the platform completion status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandleInvalidated`] once the connection is gone.
    pub async fn write(&self, data: &[u8]) -> Result<GattStatus> {
        let session = self.session()?;
        session.link().write_value(&self.info, data).await
    }

    pub(crate) async fn write_descriptor(&self, value: CccdValue) -> Result<GattStatus> {
        let session = self.session()?;
        session.link().write_descriptor(&self.info, value).await
    }

    pub(crate) async fn value_changes(&self) -> Result<BoxStream<'static, Bytes>> {
        let session = self.session()?;
        session.link().value_changes(&self.info).await
    }
}

/// A value change received from a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The role of the characteristic that changed.
    pub role: CharacteristicRole,
    /// Raw payload bytes.
    pub payload: Bytes,
    /// When the notification was received.
    pub received_at: DateTime<Utc>,
}

impl Notification {
    /// The payload formatted as dash-separated hex.
    pub fn hex(&self) -> String {
        format_hex(&self.payload)
    }

    /// Check if this is a status reply from the command characteristic.
    pub fn is_status(&self) -> bool {
        self.role == CharacteristicRole::Command
    }

    /// Check if this is telemetry from the data characteristic.
    pub fn is_telemetry(&self) -> bool {
        self.role == CharacteristicRole::Data
    }
}

/// Negotiates notifications on role characteristics and dispatches value changes.
pub struct SubscriptionController {
    notification_tx: broadcast::Sender<Notification>,
}

impl SubscriptionController {
    /// Create a controller whose notification channel holds `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let (notification_tx, _) = broadcast::channel(capacity);
        Self { notification_tx }
    }

    /// Choose the CCCD value for a characteristic. Indicate is preferred over Notify.
    pub fn select_mode(properties: &CharacteristicProperties) -> Option<CccdValue> {
        if properties.indicate {
            Some(CccdValue::Indicate)
        } else if properties.notify {
            Some(CccdValue::Notify)
        } else {
            None
        }
    }

    /// Enable value-change delivery for `handle` and start dispatching.
    ///
    /// Returns the dispatcher task; aborting it stops delivery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotificationsUnsupported`] when the characteristic
    /// supports neither mode, and [`Error::SubscriptionFailed`] when the
    /// descriptor write fails.
    pub async fn subscribe<L: GattLink>(
        &self,
        handle: &CharacteristicHandle<L>,
    ) -> Result<JoinHandle<()>> {
        let role = handle.role();
        let mode = Self::select_mode(&handle.properties())
            .ok_or(Error::NotificationsUnsupported { role })?;

        debug!("Subscribing to {} characteristic with {}", role, mode);

        // Open the stream first so nothing sent right after the descriptor write is missed.
        let values = handle
            .value_changes()
            .await
            .map_err(|e| Error::SubscriptionFailed {
                role,
                reason: e.to_string(),
            })?;

        match handle.write_descriptor(mode).await {
            Ok(GattStatus::Success) => {}
            Ok(status) => {
                return Err(Error::SubscriptionFailed {
                    role,
                    reason: format!("status {status}"),
                })
            }
            Err(e) => {
                return Err(Error::SubscriptionFailed {
                    role,
                    reason: e.to_string(),
                })
            }
        }

        info!("Subscribed to {} characteristic ({})", role, mode);

        Ok(self.spawn_dispatcher(role, values))
    }

    fn spawn_dispatcher(
        &self,
        role: CharacteristicRole,
        mut values: BoxStream<'static, Bytes>,
    ) -> JoinHandle<()> {
        let notification_tx = self.notification_tx.clone();

        tokio::spawn(async move {
            while let Some(payload) = values.next().await {
                let notification = Notification {
                    role,
                    payload,
                    received_at: Utc::now(),
                };

                match role {
                    CharacteristicRole::Command => {
                        debug!("Command characteristic value changed: {}", notification.hex())
                    }
                    CharacteristicRole::Data => {
                        debug!("Data characteristic value changed: {}", notification.hex())
                    }
                }

                // broadcast::send never waits; slow receivers lag instead.
                let _ = notification_tx.send(notification);
            }

            debug!("{} value-change stream ended", role);
        })
    }

    /// Get a receiver for notifications from both characteristics.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notification_tx.subscribe()
    }
}
