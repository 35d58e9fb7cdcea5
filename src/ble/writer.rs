//! Command characteristic writes.

use std::sync::Arc;

use tracing::{debug, info};

use crate::ble::connection::ConnectionManager;
use crate::ble::platform::{BlePlatform, GattStatus};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::protocol::CommandFrame;

/// Writes command frames to the command characteristic of the current connection.
pub struct CommandWriter<P: BlePlatform> {
    connection: Arc<ConnectionManager<P>>,
    events: EventBus,
}

impl<P: BlePlatform> CommandWriter<P> {
    pub(crate) fn new(connection: Arc<ConnectionManager<P>>, events: EventBus) -> Self {
        Self { connection, events }
    }

    /// Send a command frame.
    ///
    /// Without a valid command characteristic this silently does nothing.
    /// A failed write is reported and returned; it never changes the
    /// connection state and is not retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteFailed`] if the platform rejects the write.
    pub async fn send_command(&self, frame: &CommandFrame) -> Result<()> {
        let Some(handle) = self.connection.command_handle() else {
            debug!("No command characteristic, dropping frame {}", frame);
            return Ok(());
        };

        debug!("Writing frame {} to command characteristic", frame);

        let err = match handle.write(&frame.to_bytes()).await {
            Ok(GattStatus::Success) => {
                info!("Write succeeded to command characteristic");
                return Ok(());
            }
            Ok(status) => Error::write_status(status),
            Err(Error::HandleInvalidated { .. }) => {
                debug!("Connection went away, dropping frame {}", frame);
                return Ok(());
            }
            Err(e) => Error::WriteFailed {
                reason: e.to_string(),
            },
        };

        self.events.report(&err);
        Err(err)
    }
}
