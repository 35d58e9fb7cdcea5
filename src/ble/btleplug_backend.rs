//! btleplug implementation of the platform BLE backend.
//!
//! Works on Windows (WinRT), macOS (CoreBluetooth) and Linux (BlueZ).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ble::platform::{
    Advertisement, BlePlatform, CccdValue, CharacteristicInfo, CharacteristicProperties,
    DeviceAddress, GattLink, GattStatus, ServiceInfo,
};
use crate::error::{Error, Result};
use crate::utils::format_hex;

/// BLE backend over the first available btleplug adapter.
pub struct BtleplugPlatform {
    /// The BLE adapter to use.
    adapter: Adapter,
    /// Peripherals seen while scanning, by address.
    discovered: Arc<RwLock<HashMap<DeviceAddress, Peripheral>>>,
}

impl BtleplugPlatform {
    /// Open the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Use a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            discovered: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn find_peripheral(&self, address: &DeviceAddress) -> Result<Peripheral> {
        if let Some(peripheral) = self.discovered.read().get(address).cloned() {
            return Ok(peripheral);
        }

        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == address.as_str())
            .ok_or_else(|| Error::ConnectionFailed {
                reason: format!("unknown device {address}"),
            })
    }
}

/// Turn a central event into an advertisement, if it carries one.
async fn advertisement_from_event(
    event: CentralEvent,
    adapter: &Adapter,
    discovered: &RwLock<HashMap<DeviceAddress, Peripheral>>,
) -> Option<Advertisement> {
    let id = match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
        _ => return None,
    };

    let peripheral = match adapter.peripheral(&id).await {
        Ok(p) => p,
        Err(e) => {
            trace!("Failed to get peripheral: {}", e);
            return None;
        }
    };

    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        _ => return None,
    };

    let address = DeviceAddress::new(id.to_string());
    discovered.write().insert(address.clone(), peripheral);

    Some(Advertisement {
        address,
        local_name: properties.local_name,
        rssi: properties.rssi,
    })
}

#[async_trait]
impl BlePlatform for BtleplugPlatform {
    type Link = BtleplugLink;

    async fn scan(&self) -> Result<BoxStream<'static, Advertisement>> {
        // Subscribe before starting so the first advertisements are not missed.
        let events = self.adapter.events().await?;

        self.adapter.start_scan(ScanFilter::default()).await?;

        let adapter = self.adapter.clone();
        let discovered = self.discovered.clone();

        let advertisements = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let discovered = discovered.clone();
            async move { advertisement_from_event(event, &adapter, &discovered).await }
        });

        Ok(advertisements.boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<BtleplugLink> {
        let peripheral = self.find_peripheral(address).await?;

        // Subscribe before connecting so a disconnect during discovery is seen.
        let events = self.adapter.events().await?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral.connect().await?;
        } else {
            info!("Peripheral {} already connected at BLE level", address);
        }

        let (lost_tx, lost_rx) = watch::channel(false);
        let watcher = tokio::spawn(watch_disconnect(events, peripheral.id(), lost_tx));

        Ok(BtleplugLink {
            peripheral,
            lost: lost_rx,
            watcher,
        })
    }
}

/// Flag the link as lost once the adapter reports the peripheral disconnected.
async fn watch_disconnect(
    mut events: BoxStream<'static, CentralEvent>,
    id: PeripheralId,
    lost_tx: watch::Sender<bool>,
) {
    while let Some(event) = events.next().await {
        if let CentralEvent::DeviceDisconnected(lost) = event {
            if lost == id {
                debug!("Adapter reported {:?} disconnected", id);
                let _ = lost_tx.send(true);
                return;
            }
        }
    }

    warn!("Adapter event stream ended, link loss can no longer be detected");
}

/// A connected btleplug peripheral.
pub struct BtleplugLink {
    peripheral: Peripheral,
    /// Set once the adapter reports the peripheral gone.
    lost: watch::Receiver<bool>,
    /// Adapter event watcher feeding `lost`.
    watcher: JoinHandle<()>,
}

impl BtleplugLink {
    /// Get the peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn find_characteristic(&self, info: &CharacteristicInfo) -> Result<Characteristic> {
        select_characteristic(self.peripheral.characteristics(), info)
    }
}

/// Pick the btleplug characteristic behind `info` from a discovered set.
pub(crate) fn select_characteristic(
    characteristics: impl IntoIterator<Item = Characteristic>,
    info: &CharacteristicInfo,
) -> Result<Characteristic> {
    characteristics
        .into_iter()
        .find(|c| c.uuid == info.uuid && c.service_uuid == info.service_uuid)
        .ok_or_else(|| Error::DiscoveryFailed {
            reason: format!("characteristic {} is not known to the peripheral", info.uuid),
        })
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Check whether the platform will enable Notify where Indicate was requested.
///
/// BlueZ and CoreBluetooth always choose Notify when a characteristic supports
/// both; only WinRT honours the Indicate preference.
#[cfg_attr(target_os = "windows", allow(dead_code))]
pub(crate) fn indicate_downgraded(value: CccdValue, flags: CharPropFlags) -> bool {
    value == CccdValue::Indicate && flags.contains(CharPropFlags::NOTIFY)
}

#[cfg(not(target_os = "windows"))]
fn warn_if_downgraded(value: CccdValue, c: &Characteristic) {
    if indicate_downgraded(value, c.properties) {
        warn!(
            "Platform enables Notify instead of Indicate on {}; values arrive unacknowledged",
            c.uuid
        );
    }
}

#[cfg(target_os = "windows")]
fn warn_if_downgraded(_value: CccdValue, _c: &Characteristic) {}

/// Map btleplug property flags onto the platform-neutral properties.
pub(crate) fn properties_from_flags(flags: CharPropFlags) -> CharacteristicProperties {
    CharacteristicProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}

/// Map request failures that have a GATT status equivalent; pass the rest through.
fn status_from_result(result: std::result::Result<(), btleplug::Error>) -> Result<GattStatus> {
    match result {
        Ok(()) => Ok(GattStatus::Success),
        Err(btleplug::Error::NotConnected) => Ok(GattStatus::Unreachable),
        Err(btleplug::Error::PermissionDenied) => Ok(GattStatus::AccessDenied),
        Err(e) => Err(Error::Bluetooth(e)),
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    async fn services(&self) -> Result<Vec<ServiceInfo>> {
        self.peripheral.discover_services().await?;

        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                primary: service.primary,
            })
            .collect())
    }

    async fn characteristics(&self, service: &ServiceInfo) -> Result<Vec<CharacteristicInfo>> {
        let service = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service.uuid)
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: service.uuid.to_string(),
            })?;

        Ok(service
            .characteristics
            .into_iter()
            .map(|c| CharacteristicInfo {
                uuid: c.uuid,
                service_uuid: c.service_uuid,
                properties: properties_from_flags(c.properties),
            })
            .collect())
    }

    async fn write_descriptor(
        &self,
        characteristic: &CharacteristicInfo,
        value: CccdValue,
    ) -> Result<GattStatus> {
        let c = self.find_characteristic(characteristic)?;

        // btleplug writes the CCCD itself and cannot be told which mode to use.
        warn_if_downgraded(value, &c);

        let result = match value {
            CccdValue::Notify | CccdValue::Indicate => self.peripheral.subscribe(&c).await,
            CccdValue::None => self.peripheral.unsubscribe(&c).await,
        };

        debug!(
            "CCCD write {} ({}) on {}: {:?}",
            value,
            format_hex(&value.to_bytes()),
            c.uuid,
            result.is_ok()
        );
        status_from_result(result)
    }

    async fn value_changes(
        &self,
        characteristic: &CharacteristicInfo,
    ) -> Result<BoxStream<'static, Bytes>> {
        let uuid = characteristic.uuid;
        let notifications = self.peripheral.notifications().await?;

        Ok(notifications
            .filter_map(move |n| {
                futures::future::ready((n.uuid == uuid).then(|| Bytes::from(n.value)))
            })
            .boxed())
    }

    async fn write_value(
        &self,
        characteristic: &CharacteristicInfo,
        data: &[u8],
    ) -> Result<GattStatus> {
        let c = self.find_characteristic(characteristic)?;
        let result = self
            .peripheral
            .write(&c, data, WriteType::WithResponse)
            .await;

        trace!("Wrote {} bytes to characteristic {}", data.len(), c.uuid);
        status_from_result(result)
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    fn link_lost(&self) -> BoxFuture<'static, ()> {
        let mut lost = self.lost.clone();
        let peripheral = self.peripheral.clone();

        Box::pin(async move {
            if !peripheral.is_connected().await.unwrap_or(true) {
                return;
            }

            // A closed channel means the watcher ended without seeing a disconnect.
            let seen = lost.wait_for(|lost| *lost).await.is_ok();
            if !seen {
                futures::future::pending::<()>().await;
            }
        })
    }
}
