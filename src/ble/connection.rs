//! BLE connection management.
//!
//! Handles connecting to the Muse sensor, discovering its service and
//! characteristics, and tearing the connection down again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ble::characteristics::{
    CharacteristicHandle, LinkSession, Notification, SubscriptionController,
};
use crate::ble::platform::{BlePlatform, CharacteristicInfo, DeviceIdentity, GattLink};
use crate::ble::status::{ConnectionState, StatusRegister};
use crate::ble::uuids::{is_muse_service, CharacteristicRole, SERVICE_UUID};
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::events::{DisconnectReason, EventBus, LinkEvent};

/// Work items processed sequentially by the device manager's driver task.
#[derive(Debug)]
pub(crate) enum DriverMessage {
    /// The scanner matched a device.
    Connect(DeviceIdentity),
    /// The platform reported that the link of this generation dropped.
    LinkLost { generation: u64 },
}

/// The connection currently held by the manager.
struct ActiveConnection<L: GattLink> {
    session: Arc<LinkSession<L>>,
    command: Option<CharacteristicHandle<L>>,
    data: Option<CharacteristicHandle<L>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<L: GattLink> Drop for ActiveConnection<L> {
    fn drop(&mut self) {
        self.session.invalidate();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Clears the in-flight flag when an attempt finishes or is cancelled.
struct AttemptGuard<'a>(&'a AtomicBool);

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Manages the single GATT connection to a Muse sensor.
pub struct ConnectionManager<P: BlePlatform> {
    /// Platform backend.
    platform: Arc<P>,
    /// Link settings.
    config: LinkConfig,
    /// Shared status register; only this manager writes it.
    status: Arc<StatusRegister>,
    /// Notify/indicate negotiation and dispatch.
    subscriptions: SubscriptionController,
    /// Host event channel.
    events: EventBus,
    /// The current connection, if any.
    active: RwLock<Option<ActiveConnection<P::Link>>>,
    /// Whether a connection attempt is outstanding.
    attempt_in_flight: AtomicBool,
    /// Connection counter.
    generation: AtomicU64,
    /// Channel back into the driver task.
    driver_tx: mpsc::UnboundedSender<DriverMessage>,
}

impl<P: BlePlatform> ConnectionManager<P> {
    pub(crate) fn new(
        platform: Arc<P>,
        config: LinkConfig,
        status: Arc<StatusRegister>,
        events: EventBus,
        driver_tx: mpsc::UnboundedSender<DriverMessage>,
    ) -> Self {
        let subscriptions = SubscriptionController::new(config.notification_capacity);

        Self {
            platform,
            config,
            status,
            subscriptions,
            events,
            active: RwLock::new(None),
            attempt_in_flight: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            driver_tx,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.status.get()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Check if a connection attempt is outstanding.
    pub fn is_attempting(&self) -> bool {
        self.attempt_in_flight.load(Ordering::SeqCst)
    }

    /// The connected device, if any.
    pub fn connected_device(&self) -> Option<DeviceIdentity> {
        self.active
            .read()
            .as_ref()
            .map(|active| active.session.identity().clone())
    }

    /// Borrow a handle to the command characteristic of the current connection.
    pub fn command_handle(&self) -> Option<CharacteristicHandle<P::Link>> {
        self.active
            .read()
            .as_ref()
            .and_then(|active| active.command.clone())
    }

    /// Borrow a handle to the data characteristic of the current connection.
    pub fn data_handle(&self) -> Option<CharacteristicHandle<P::Link>> {
        self.active
            .read()
            .as_ref()
            .and_then(|active| active.data.clone())
    }

    /// Get a receiver for characteristic notifications.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.subscriptions.subscribe_notifications()
    }

    /// Connect to a device, discover its characteristics and subscribe to them.
    ///
    /// Emits [`LinkEvent::DeviceConnected`] once everything is set up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionInProgress`] if another attempt is
    /// outstanding, [`Error::AlreadyConnected`] if a device is connected, and
    /// the attempt's failure otherwise. Attempt failures are also reported as
    /// [`LinkEvent::Failure`].
    pub async fn connect(&self, identity: DeviceIdentity) -> Result<()> {
        if self
            .attempt_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Ignoring connection request for {}: attempt in progress", identity);
            return Err(Error::ConnectionInProgress);
        }
        let _guard = AttemptGuard(&self.attempt_in_flight);

        if self.active.read().is_some() {
            debug!("Already connected, ignoring request for {}", identity);
            return Err(Error::AlreadyConnected);
        }

        info!("Connecting to {}", identity);

        match self.attempt(identity).await {
            Ok((identity, generation, link_lost)) => {
                info!("Connected to {}", identity);
                self.events.emit(LinkEvent::DeviceConnected(identity));
                self.watch_link(generation, link_lost);
                Ok(())
            }
            Err(e) => {
                self.events.report(&e);
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        identity: DeviceIdentity,
    ) -> Result<(DeviceIdentity, u64, BoxFuture<'static, ()>)> {
        let connecting = self.platform.connect(&identity.address);
        let link = match self.config.connect_timeout {
            Some(after) => tokio::time::timeout(after, connecting)
                .await
                .map_err(|_| Error::ConnectTimeout { after })?,
            None => connecting.await,
        }
        .map_err(|e| Error::ConnectionFailed {
            reason: e.to_string(),
        })?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(LinkSession::new(link, identity.clone(), generation));
        // Taken before discovery so a drop during discovery is not missed.
        let link_lost = session.link().link_lost();

        let active = match self.discover(&session).await {
            Ok(active) => active,
            Err(e) => {
                session.invalidate();
                if let Err(disconnect_err) = session.link().disconnect().await {
                    debug!("Disconnect after failed attempt: {}", disconnect_err);
                }
                return Err(e);
            }
        };

        *self.active.write() = Some(active);
        self.status.set(ConnectionState::Connected);

        Ok((identity, generation, link_lost))
    }

    /// Forward link loss of `generation` to the driver task.
    fn watch_link(&self, generation: u64, link_lost: BoxFuture<'static, ()>) {
        let driver_tx = self.driver_tx.clone();
        let task = tokio::spawn(async move {
            link_lost.await;
            let _ = driver_tx.send(DriverMessage::LinkLost { generation });
        });

        let mut guard = self.active.write();
        match guard.as_mut() {
            Some(active) if active.session.generation() == generation => active.tasks.push(task),
            // Torn down in the meantime.
            _ => task.abort(),
        }
    }

    /// Resolve the service, then subscribe each role characteristic.
    async fn discover(
        &self,
        session: &Arc<LinkSession<P::Link>>,
    ) -> Result<ActiveConnection<P::Link>> {
        let services = session
            .link()
            .services()
            .await
            .map_err(|e| Error::DiscoveryFailed {
                reason: e.to_string(),
            })?;

        for service in &services {
            debug!("Found service: {}", service.uuid);
        }

        let service = services
            .into_iter()
            .find(|service| is_muse_service(&service.uuid))
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: SERVICE_UUID.to_string(),
            })?;

        let characteristics = session
            .link()
            .characteristics(&service)
            .await
            .map_err(|e| Error::DiscoveryFailed {
                reason: e.to_string(),
            })?;

        // Dropping `active` on an error path aborts the dispatchers started so far.
        let mut active = ActiveConnection {
            session: session.clone(),
            command: None,
            data: None,
            tasks: Vec::new(),
        };

        for info in characteristics {
            debug!("Found characteristic: {}", info.uuid);
            self.bind_characteristic(session, info, &mut active).await?;
        }

        let missing = match (&active.command, &active.data) {
            (None, _) => Some(CharacteristicRole::Command),
            (_, None) => Some(CharacteristicRole::Data),
            _ => None,
        };

        if let Some(role) = missing {
            let err = Error::CharacteristicNotFound {
                role,
                uuid: role.uuid().to_string(),
            };
            let none_found = active.command.is_none() && active.data.is_none();
            if none_found || self.config.require_all_subscriptions {
                return Err(err);
            }
            self.events.report(&err);
        }

        Ok(active)
    }

    async fn bind_characteristic(
        &self,
        session: &Arc<LinkSession<P::Link>>,
        info: CharacteristicInfo,
        active: &mut ActiveConnection<P::Link>,
    ) -> Result<()> {
        let Some(role) = CharacteristicRole::from_uuid(&info.uuid) else {
            return Ok(());
        };

        let slot = match role {
            CharacteristicRole::Command => &mut active.command,
            CharacteristicRole::Data => &mut active.data,
        };
        if slot.is_some() {
            warn!("Duplicate {} characteristic {}, ignoring", role, info.uuid);
            return Ok(());
        }

        let handle = CharacteristicHandle::new(role, info, Arc::downgrade(session));

        match self.subscriptions.subscribe(&handle).await {
            Ok(task) => active.tasks.push(task),
            Err(e) if self.config.require_all_subscriptions => return Err(e),
            // The handle stays usable for writes even without notifications.
            Err(e) => self.events.report(&e),
        }

        *slot = Some(handle);
        Ok(())
    }

    /// Tear the connection down at the host's request. No-op when disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        self.teardown(None, DisconnectReason::Requested).await
    }

    /// Handle a link-loss signal from the platform.
    pub(crate) async fn handle_link_lost(&self, generation: u64) {
        // Link already gone, nothing to report.
        let _ = self
            .teardown(Some(generation), DisconnectReason::LinkLost)
            .await;
    }

    async fn teardown(&self, generation: Option<u64>, reason: DisconnectReason) -> Result<()> {
        let active = {
            let mut guard = self.active.write();
            let current = guard.as_ref().map(|active| active.session.generation());
            match (current, generation) {
                (None, _) => return Ok(()),
                (Some(current), Some(expected)) if current != expected => {
                    debug!("Ignoring stale link loss for generation {}", expected);
                    return Ok(());
                }
                _ => guard.take(),
            }
        };
        let Some(active) = active else {
            return Ok(());
        };

        active.session.invalidate();
        for task in &active.tasks {
            task.abort();
        }
        self.status.set(ConnectionState::Disconnected);

        let identity = active.session.identity().clone();
        let result = match reason {
            DisconnectReason::Requested => active.session.link().disconnect().await,
            DisconnectReason::LinkLost => {
                warn!("Connection to {} lost", identity);
                Ok(())
            }
        };

        info!("Disconnected from {}", identity);
        self.events
            .emit(LinkEvent::Disconnected { identity, reason });

        result
    }

    /// Enter the streaming state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a connection.
    pub fn begin_streaming(&self) -> Result<()> {
        let active = self.active.read();
        if active.is_none() {
            return Err(Error::NotConnected);
        }
        self.status.set(ConnectionState::Streaming);
        Ok(())
    }

    /// Leave the streaming state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] without a connection.
    pub fn end_streaming(&self) -> Result<()> {
        let active = self.active.read();
        if active.is_none() {
            return Err(Error::NotConnected);
        }
        self.status.set(ConnectionState::Connected);
        Ok(())
    }
}
