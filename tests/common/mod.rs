//! In-process BLE platform for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use uuid::Uuid;

use muse_ble_link::{
    Advertisement, BlePlatform, CccdValue, CharacteristicInfo, CharacteristicProperties,
    DeviceAddress, Error, GattLink, GattStatus, LinkEvent, Result, ServiceInfo,
    COMMAND_CHARACTERISTIC_UUID, DATA_CHARACTERISTIC_UUID, SERVICE_UUID,
};

/// How long helpers wait for something to happen before failing the test.
pub const WAIT: Duration = Duration::from_secs(2);

/// GATT layout and behaviour of the simulated sensor.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub services: Vec<ServiceInfo>,
    pub characteristics: Vec<CharacteristicInfo>,
    pub descriptor_status: HashMap<Uuid, GattStatus>,
    pub write_status: GattStatus,
}

impl FakeDevice {
    /// A sensor with the Muse service, a notify command characteristic and
    /// a notify + indicate data characteristic.
    pub fn muse() -> Self {
        Self {
            services: vec![
                ServiceInfo {
                    uuid: Uuid::from_u128(0x1800),
                    primary: true,
                },
                ServiceInfo {
                    uuid: SERVICE_UUID,
                    primary: true,
                },
            ],
            characteristics: vec![
                characteristic(
                    COMMAND_CHARACTERISTIC_UUID,
                    CharacteristicProperties {
                        write: true,
                        notify: true,
                        ..Default::default()
                    },
                ),
                characteristic(
                    DATA_CHARACTERISTIC_UUID,
                    CharacteristicProperties {
                        notify: true,
                        indicate: true,
                        ..Default::default()
                    },
                ),
            ],
            descriptor_status: HashMap::new(),
            write_status: GattStatus::Success,
        }
    }

    pub fn without_service(mut self) -> Self {
        self.services.retain(|s| s.uuid != SERVICE_UUID);
        self
    }

    pub fn without_characteristic(mut self, uuid: Uuid) -> Self {
        self.characteristics.retain(|c| c.uuid != uuid);
        self
    }

    pub fn with_properties(mut self, uuid: Uuid, properties: CharacteristicProperties) -> Self {
        for c in self.characteristics.iter_mut().filter(|c| c.uuid == uuid) {
            c.properties = properties;
        }
        self
    }

    pub fn with_descriptor_status(mut self, uuid: Uuid, status: GattStatus) -> Self {
        self.descriptor_status.insert(uuid, status);
        self
    }

    pub fn with_write_status(mut self, status: GattStatus) -> Self {
        self.write_status = status;
        self
    }
}

fn characteristic(uuid: Uuid, properties: CharacteristicProperties) -> CharacteristicInfo {
    CharacteristicInfo {
        uuid,
        service_uuid: SERVICE_UUID,
        properties,
    }
}

/// Turn an unbounded receiver into a boxed stream.
fn receiver_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

/// Platform backend driven by the test.
pub struct FakePlatform {
    device: FakeDevice,
    advertisements: Mutex<Option<mpsc::UnboundedSender<Advertisement>>>,
    scan_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    connect_error: Mutex<Option<String>>,
    links: Mutex<Vec<FakeLink>>,
    drop_on_connect: AtomicBool,
}

impl FakePlatform {
    pub fn new(device: FakeDevice) -> Arc<Self> {
        Arc::new(Self {
            device,
            advertisements: Mutex::new(None),
            scan_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            connect_gate: Mutex::new(None),
            connect_error: Mutex::new(None),
            links: Mutex::new(Vec::new()),
            drop_on_connect: AtomicBool::new(false),
        })
    }

    /// Deliver an advertisement to the running scan.
    pub fn advertise(&self, address: &str, local_name: Option<&str>) {
        let advertisement = Advertisement {
            address: DeviceAddress::new(address),
            local_name: local_name.map(str::to_string),
            rssi: Some(-60),
        };
        if let Some(tx) = self.advertisements.lock().as_ref() {
            let _ = tx.send(advertisement);
        }
    }

    /// End the advertisement stream as if the radio went away.
    pub fn end_advertisements(&self) {
        self.advertisements.lock().take();
    }

    /// Make connect calls block until [`FakePlatform::release_connect`].
    pub fn hold_connect(&self) {
        *self.connect_gate.lock() = Some(Arc::new(Notify::new()));
    }

    pub fn release_connect(&self) {
        if let Some(gate) = self.connect_gate.lock().take() {
            gate.notify_one();
        }
    }

    /// Drop every new link as soon as it is established, before any watcher exists.
    pub fn drop_links_on_connect(&self) {
        self.drop_on_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_connect(&self, reason: &str) {
        *self.connect_error.lock() = Some(reason.to_string());
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// The most recently established link.
    pub fn link(&self) -> FakeLink {
        self.links
            .lock()
            .last()
            .cloned()
            .expect("no link was established")
    }
}

#[async_trait]
impl BlePlatform for FakePlatform {
    type Link = FakeLink;

    async fn scan(&self) -> Result<BoxStream<'static, Advertisement>> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        // Real stacks suspend here; let overlapping callers interleave.
        tokio::task::yield_now().await;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.advertisements.lock() = Some(tx);
        Ok(receiver_stream(rx))
    }

    async fn stop_scan(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, address: &DeviceAddress) -> Result<FakeLink> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.connect_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failure = self.connect_error.lock().clone();
        if let Some(reason) = failure {
            return Err(Error::ConnectionFailed {
                reason: format!("{address}: {reason}"),
            });
        }

        let link = FakeLink::new(self.device.clone());
        if self.drop_on_connect.load(Ordering::SeqCst) {
            link.drop_link();
        }
        self.links.lock().push(link.clone());
        Ok(link)
    }
}

struct LinkRecord {
    descriptor_writes: Mutex<Vec<(Uuid, CccdValue)>>,
    value_writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    notifiers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Bytes>>>,
    disconnects: AtomicUsize,
    /// Latched: every watcher sees a drop, whenever it subscribes.
    lost: watch::Sender<bool>,
}

impl Default for LinkRecord {
    fn default() -> Self {
        Self {
            descriptor_writes: Mutex::default(),
            value_writes: Mutex::default(),
            notifiers: Mutex::default(),
            disconnects: AtomicUsize::new(0),
            lost: watch::channel(false).0,
        }
    }
}

/// A simulated connection. Clones share the same recorded state.
#[derive(Clone)]
pub struct FakeLink {
    device: FakeDevice,
    record: Arc<LinkRecord>,
}

impl FakeLink {
    fn new(device: FakeDevice) -> Self {
        Self {
            device,
            record: Arc::new(LinkRecord::default()),
        }
    }

    pub fn descriptor_writes(&self) -> Vec<(Uuid, CccdValue)> {
        self.record.descriptor_writes.lock().clone()
    }

    pub fn value_writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.record.value_writes.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.record.disconnects.load(Ordering::SeqCst)
    }

    /// Push a value change from the device.
    pub fn notify(&self, uuid: Uuid, payload: &[u8]) {
        if let Some(tx) = self.record.notifiers.lock().get(&uuid) {
            let _ = tx.send(Bytes::copy_from_slice(payload));
        }
    }

    /// Drop the link from the device side.
    pub fn drop_link(&self) {
        self.record.lost.send_replace(true);
    }
}

#[async_trait]
impl GattLink for FakeLink {
    async fn services(&self) -> Result<Vec<ServiceInfo>> {
        Ok(self.device.services.clone())
    }

    async fn characteristics(&self, service: &ServiceInfo) -> Result<Vec<CharacteristicInfo>> {
        Ok(self
            .device
            .characteristics
            .iter()
            .filter(|c| c.service_uuid == service.uuid)
            .cloned()
            .collect())
    }

    async fn write_descriptor(
        &self,
        characteristic: &CharacteristicInfo,
        value: CccdValue,
    ) -> Result<GattStatus> {
        self.record
            .descriptor_writes
            .lock()
            .push((characteristic.uuid, value));
        Ok(self
            .device
            .descriptor_status
            .get(&characteristic.uuid)
            .copied()
            .unwrap_or(GattStatus::Success))
    }

    async fn value_changes(
        &self,
        characteristic: &CharacteristicInfo,
    ) -> Result<BoxStream<'static, Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.record.notifiers.lock().insert(characteristic.uuid, tx);
        Ok(receiver_stream(rx))
    }

    async fn write_value(
        &self,
        characteristic: &CharacteristicInfo,
        data: &[u8],
    ) -> Result<GattStatus> {
        self.record
            .value_writes
            .lock()
            .push((characteristic.uuid, data.to_vec()));
        Ok(self.device.write_status)
    }

    async fn disconnect(&self) -> Result<()> {
        self.record.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn link_lost(&self) -> BoxFuture<'static, ()> {
        let mut lost = self.record.lost.subscribe();
        Box::pin(async move {
            let seen = lost.wait_for(|lost| *lost).await.is_ok();
            if !seen {
                futures::future::pending::<()>().await;
            }
        })
    }
}

/// Wait for the first event matching `predicate`, skipping others.
pub async fn wait_for<F>(events: &mut broadcast::Receiver<LinkEvent>, predicate: F) -> LinkEvent
where
    F: Fn(&LinkEvent) -> bool,
{
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;

    found.expect("timed out waiting for event")
}

/// Drain events already queued, without waiting.
pub fn drain(events: &mut broadcast::Receiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => return drained,
        }
    }
}

/// Poll `condition` until it holds or the wait runs out.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let reached = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(reached.is_ok(), "condition not reached in time");
}
