//! Device manager for finding and talking to a single Muse sensor.
//!
//! This is the host-facing entry point. It owns the scanner, the connection
//! manager and the command writer, and runs the driver task that turns scan
//! matches and link-loss signals into connection work.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ble::btleplug_backend::BtleplugPlatform;
use crate::ble::characteristics::Notification;
use crate::ble::connection::{ConnectionManager, DriverMessage};
use crate::ble::platform::{BlePlatform, DeviceIdentity};
use crate::ble::scanner::AdvertisementScanner;
use crate::ble::status::{ConnectionState, StatusRegister};
use crate::ble::uuids::CharacteristicRole;
use crate::ble::writer::CommandWriter;
use crate::callback::CallbackHandle;
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, LinkEvent};
use crate::protocol::CommandFrame;

/// Central manager for the link to a Muse sensor.
pub struct DeviceManager<P: BlePlatform> {
    /// Advertisement scanner.
    scanner: AdvertisementScanner<P>,
    /// The single connection.
    connection: Arc<ConnectionManager<P>>,
    /// Command characteristic writer.
    writer: CommandWriter<P>,
    /// Shared connection state.
    status: Arc<StatusRegister>,
    /// Host event channel.
    events: EventBus,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Driver task handle.
    driver_handle: RwLock<Option<JoinHandle<()>>>,
}

impl<P: BlePlatform> DeviceManager<P> {
    /// Create a new DeviceManager on top of a platform backend.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub async fn new(platform: Arc<P>, config: LinkConfig) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_capacity);
        let status = Arc::new(StatusRegister::new());
        let (driver_tx, driver_rx) = mpsc::unbounded_channel();

        let scanner = AdvertisementScanner::new(
            platform.clone(),
            config.name_token.clone(),
            config.scan_timeout,
            events.clone(),
            driver_tx.clone(),
        );

        let connection = Arc::new(ConnectionManager::new(
            platform,
            config,
            status.clone(),
            events.clone(),
            driver_tx,
        ));

        let writer = CommandWriter::new(connection.clone(), events.clone());

        let driver = tokio::spawn(Self::drive(connection.clone(), events.clone(), driver_rx));

        Ok(Self {
            scanner,
            connection,
            writer,
            status,
            events,
            callback_counter: AtomicU64::new(0),
            driver_handle: RwLock::new(Some(driver)),
        })
    }

    /// Process driver messages one at a time.
    async fn drive(
        connection: Arc<ConnectionManager<P>>,
        events: EventBus,
        mut driver_rx: mpsc::UnboundedReceiver<DriverMessage>,
    ) {
        while let Some(message) = driver_rx.recv().await {
            match message {
                DriverMessage::Connect(identity) => match connection.connect(identity).await {
                    Ok(()) => {}
                    // Rejected before any attempt started, so nothing reported it yet.
                    Err(e @ (Error::ConnectionInProgress | Error::AlreadyConnected)) => {
                        events.report(&e);
                    }
                    Err(e) => debug!("Connection attempt ended: {}", e),
                },
                DriverMessage::LinkLost { generation } => {
                    connection.handle_link_lost(generation).await;
                }
            }
        }

        debug!("Device manager driver task ended");
    }

    // === Scanning ===

    /// Start scanning for the sensor. The first match is connected automatically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScanFailed`] if the platform cannot start scanning.
    pub async fn start_scan(&self) -> Result<()> {
        self.scanner.start_scanning().await
    }

    /// Stop scanning. Idempotent.
    pub async fn stop_scan(&self) -> Result<()> {
        self.scanner.stop_scanning().await
    }

    /// Check if scanning is active.
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    // === Connection ===

    /// Connect to a specific device without scanning.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::connect`].
    pub async fn connect(&self, identity: DeviceIdentity) -> Result<()> {
        self.connection.connect(identity).await
    }

    /// Disconnect from the current device. No-op when disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    /// The connected device, if any.
    pub fn connected_device(&self) -> Option<DeviceIdentity> {
        self.connection.connected_device()
    }

    /// Access the connection manager.
    pub fn connection(&self) -> &Arc<ConnectionManager<P>> {
        &self.connection
    }

    /// Enter the streaming state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a connection.
    pub fn begin_streaming(&self) -> Result<()> {
        self.connection.begin_streaming()
    }

    /// Leave the streaming state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a connection.
    pub fn end_streaming(&self) -> Result<()> {
        self.connection.end_streaming()
    }

    // === Commands ===

    /// Send a command frame to the sensor.
    ///
    /// Does nothing when no command characteristic is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteFailed`] if the write is rejected.
    pub async fn send_command(&self, frame: CommandFrame) -> Result<()> {
        self.writer.send_command(&frame).await
    }

    /// Send the default command frame.
    pub async fn send_default_command(&self) -> Result<()> {
        self.send_command(CommandFrame::default()).await
    }

    // === Status ===

    /// Get the current connection state.
    pub fn status(&self) -> ConnectionState {
        self.status.get()
    }

    /// Subscribe to connection state transitions.
    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    // === Events ===

    /// Subscribe to link events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Register a callback for when a device finishes connecting.
    pub fn on_device_connected<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&DeviceIdentity) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.events.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(LinkEvent::DeviceConnected(identity)) => callback(&identity),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Device connected callback lagged by {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    // === Notifications ===

    /// Subscribe to notifications from both characteristics.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.connection.subscribe_notifications()
    }

    /// Register a callback for notifications from one characteristic.
    pub fn on_notification<F>(&self, role: CharacteristicRole, callback: F) -> CallbackHandle
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.connection.subscribe_notifications();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) if notification.role == role => callback(&notification),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("{} notification callback lagged by {}", role, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Clean shutdown of scanning, the connection and the driver task.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down device manager");

        if let Err(e) = self.stop_scan().await {
            warn!("Error stopping scan: {}", e);
        }

        let result = self.disconnect().await;

        if let Some(handle) = self.driver_handle.write().take() {
            handle.abort();
        }

        result
    }
}

impl DeviceManager<BtleplugPlatform> {
    /// Create a DeviceManager on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if there is no adapter.
    pub async fn with_default_adapter(config: LinkConfig) -> Result<Self> {
        let platform = BtleplugPlatform::new().await?;
        Self::new(Arc::new(platform), config).await
    }
}

impl<P: BlePlatform> Drop for DeviceManager<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.driver_handle.write().take() {
            handle.abort();
        }
    }
}
