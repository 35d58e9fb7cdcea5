//! BLE scanning functionality.
//!
//! Provides the scanner that watches advertisements for a Muse sensor and
//! hands the first match to the connection manager.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ble::connection::DriverMessage;
use crate::ble::platform::{Advertisement, BlePlatform, DeviceIdentity};
use crate::error::{Error, Result};
use crate::events::{EventBus, LinkEvent};

/// How often the scan loop re-checks the scanning flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Check whether an advertised local name matches the target token.
pub fn matches_target(local_name: &str, token: &str) -> bool {
    local_name.contains(token)
}

/// Scanner for discovering the target device by advertised name.
pub struct AdvertisementScanner<P: BlePlatform> {
    /// Platform backend.
    platform: Arc<P>,
    /// Substring the local name must contain.
    name_token: String,
    /// Optional bound on how long to scan.
    scan_timeout: Option<Duration>,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
    /// Handle to the scanning task.
    scan_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
    /// Host event channel.
    events: EventBus,
    /// Where matches are handed to the connection manager.
    driver_tx: mpsc::UnboundedSender<DriverMessage>,
}

impl<P: BlePlatform> AdvertisementScanner<P> {
    pub(crate) fn new(
        platform: Arc<P>,
        name_token: String,
        scan_timeout: Option<Duration>,
        events: EventBus,
        driver_tx: mpsc::UnboundedSender<DriverMessage>,
    ) -> Self {
        Self {
            platform,
            name_token,
            scan_timeout,
            is_scanning: Arc::new(RwLock::new(false)),
            scan_handle: RwLock::new(None),
            events,
            driver_tx,
        }
    }

    /// Start scanning for the target device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScanFailed`] if the platform cannot start scanning.
    pub async fn start_scanning(&self) -> Result<()> {
        if !claim_start(&self.is_scanning) {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!("Starting BLE scan for devices named '{}*'", self.name_token);

        let advertisements = match self.platform.scan().await {
            Ok(stream) => stream,
            Err(e) => {
                *self.is_scanning.write() = false;
                let err = Error::ScanFailed {
                    reason: e.to_string(),
                };
                self.events.report(&err);
                return Err(err);
            }
        };

        if !*self.is_scanning.read() {
            debug!("Scan stopped while starting");
            stop_platform_scan(self.platform.as_ref()).await;
            return Ok(());
        }

        let handle = tokio::spawn(Self::scan_loop(
            advertisements,
            self.platform.clone(),
            self.name_token.clone(),
            self.scan_timeout,
            self.is_scanning.clone(),
            self.events.clone(),
            self.driver_tx.clone(),
        ));

        *self.scan_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop scanning. Idempotent; does not affect a connection attempt.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !claim_stop(&self.is_scanning) {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        let stopped = self.platform.stop_scan().await;

        // Wait for the scan task to complete
        let handle = self.scan_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        stopped.map_err(|e| Error::ScanFailed {
            reason: e.to_string(),
        })
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    async fn scan_loop(
        mut advertisements: BoxStream<'static, Advertisement>,
        platform: Arc<P>,
        name_token: String,
        scan_timeout: Option<Duration>,
        is_scanning: Arc<RwLock<bool>>,
        events: EventBus,
        driver_tx: mpsc::UnboundedSender<DriverMessage>,
    ) {
        let deadline = scan_timeout.map(|after| Instant::now() + after);

        while *is_scanning.read() {
            tokio::select! {
                next = advertisements.next() => {
                    let Some(advertisement) = next else {
                        if claim_stop(&is_scanning) {
                            events.report(&Error::ScanFailed {
                                reason: "advertisement stream ended".to_string(),
                            });
                        }
                        break;
                    };

                    let Some(identity) = handle_advertisement(advertisement, &name_token, &events) else {
                        continue;
                    };

                    // At most one match per scan; a concurrent stop wins.
                    if !claim_stop(&is_scanning) {
                        break;
                    }
                    stop_platform_scan(platform.as_ref()).await;

                    info!("Matched {}, stopped scanning", identity);
                    events.emit(LinkEvent::DeviceMatched(identity.clone()));
                    if driver_tx.send(DriverMessage::Connect(identity)).is_err() {
                        warn!("Device manager is gone, dropping match");
                    }
                    break;
                }
                _ = wait_until(deadline) => {
                    if claim_stop(&is_scanning) {
                        stop_platform_scan(platform.as_ref()).await;
                        if let Some(after) = scan_timeout {
                            events.report(&Error::ScanTimeout { after });
                        }
                    }
                    break;
                }
                _ = tokio::time::sleep(STOP_POLL_INTERVAL) => {
                    // Check if we should stop scanning
                    if !*is_scanning.read() {
                        break;
                    }
                }
            }
        }

        debug!("Scan event loop ended");
    }
}

impl<P: BlePlatform> Drop for AdvertisementScanner<P> {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}

/// Log an advertisement and return its identity if it matches.
fn handle_advertisement(
    advertisement: Advertisement,
    name_token: &str,
    events: &EventBus,
) -> Option<DeviceIdentity> {
    debug!(
        "Found device: {} ({}, rssi {:?})",
        advertisement.local_name.as_deref().unwrap_or("<unnamed>"),
        advertisement.address,
        advertisement.rssi
    );

    let identity = advertisement
        .local_name
        .as_deref()
        .filter(|name| matches_target(name, name_token))
        .map(|name| DeviceIdentity::new(advertisement.address.clone(), name));

    events.emit(LinkEvent::AdvertisementSeen(advertisement));

    identity
}

/// Flip the scanning flag on. Returns false if a scan is already running.
fn claim_start(is_scanning: &RwLock<bool>) -> bool {
    let mut scanning = is_scanning.write();
    let was_scanning = *scanning;
    *scanning = true;
    !was_scanning
}

/// Flip the scanning flag off. Returns false if someone else already did.
fn claim_stop(is_scanning: &RwLock<bool>) -> bool {
    let mut scanning = is_scanning.write();
    let was_scanning = *scanning;
    *scanning = false;
    was_scanning
}

async fn stop_platform_scan<P: BlePlatform>(platform: &P) {
    if let Err(e) = platform.stop_scan().await {
        warn!("Failed to stop platform scan: {}", e);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}
