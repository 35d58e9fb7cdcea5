//! Host-observable link events.

use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::ble::platform::{Advertisement, DeviceIdentity};
use crate::error::{Error, ErrorKind};

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The host asked for the teardown.
    Requested,
    /// The platform reported that the link dropped.
    LinkLost,
}

/// Event published to the host application.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// An advertisement was received while scanning.
    AdvertisementSeen(Advertisement),
    /// An advertisement matched the name token; scanning stopped.
    DeviceMatched(DeviceIdentity),
    /// The device is connected and its characteristics are subscribed.
    /// Fired exactly once per successful connection.
    DeviceConnected(DeviceIdentity),
    /// The connection ended.
    Disconnected {
        /// The device that was connected.
        identity: DeviceIdentity,
        /// Why it ended.
        reason: DisconnectReason,
    },
    /// A failure was reported. Nothing is retried automatically.
    Failure {
        /// Lifecycle stage the failure belongs to.
        kind: ErrorKind,
        /// Human-readable description.
        message: String,
    },
}

/// Broadcast channel of [`LinkEvent`]s shared by all components.
#[derive(Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<LinkEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: LinkEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }

    /// Log a failure and publish it as [`LinkEvent::Failure`].
    pub(crate) fn report(&self, err: &Error) {
        let kind = err.kind();
        match kind {
            ErrorKind::Subscription | ErrorKind::Usage => warn!("{}", err),
            _ => error!("{}", err),
        }
        self.emit(LinkEvent::Failure {
            kind,
            message: err.to_string(),
        });
    }
}
