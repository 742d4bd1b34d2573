//! Radio Adapter port
//! The platform BLE stack implements [`RadioAdapter`]. Every request returns
//! immediately; outcomes come back later as [`RadioEvent`]s pushed through a
//! [`RadioEventSink`], possibly from another thread.

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::error::RadioError;
use crate::core::bluetooth::runtime::Input;
use crate::core::bluetooth::types::{
    Address, DiscoveredDevice, GattService, LinkId, SessionId, WriteId, WriteMode,
};

/// Requests the controller issues to the platform stack.
///
/// `link` and `session` tokens are chosen by the controller and must be
/// echoed back on every event that refers to them.
pub trait RadioAdapter: Send {
    fn start_scan(&mut self, session: SessionId) -> Result<(), RadioError>;

    fn stop_scan(&mut self);

    /// Opens a new platform link. Completion is reported as
    /// [`RadioEvent::LinkUp`] or [`RadioEvent::LinkDown`].
    fn open_connection(&mut self, address: &Address, link: LinkId) -> Result<(), RadioError>;

    /// Asks the peripheral to drop the link. Completion is a [`RadioEvent::LinkDown`].
    fn disconnect(&mut self, link: LinkId);

    /// Releases every platform resource held for `link`. No further events
    /// are expected for it.
    fn close_connection(&mut self, link: LinkId);

    fn discover_services(&mut self, link: LinkId) -> Result<(), RadioError>;

    fn set_notification(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), RadioError>;

    fn write_descriptor(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), RadioError>;

    fn write_characteristic(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
        write: WriteId,
    ) -> Result<(), RadioError>;
}

/// Callbacks from the platform stack
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    DeviceFound {
        session: SessionId,
        device: DiscoveredDevice,
    },
    ScanFailed {
        session: SessionId,
        reason: String,
    },
    LinkUp {
        link: LinkId,
        /// Name reported by the connected peripheral, if any
        name: Option<String>,
    },
    LinkDown {
        link: LinkId,
        reason: Option<String>,
    },
    ServicesDiscovered {
        link: LinkId,
        result: Result<Vec<GattService>, RadioError>,
    },
    DescriptorWritten {
        link: LinkId,
        result: Result<(), RadioError>,
    },
    CharacteristicWritten {
        link: LinkId,
        write: WriteId,
        result: Result<(), RadioError>,
    },
    Notification {
        link: LinkId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Thread-safe entry point for platform callbacks into the owner queue
#[derive(Clone)]
pub struct RadioEventSink {
    inputs: mpsc::UnboundedSender<Input>,
}

impl RadioEventSink {
    pub(crate) fn new(inputs: mpsc::UnboundedSender<Input>) -> Self {
        Self { inputs }
    }

    pub fn send(&self, event: RadioEvent) {
        if self.inputs.send(Input::Radio(event)).is_err() {
            debug!("Controller task gone, dropping radio event");
        }
    }
}
