//! GATT connection state machine
//! A [`GattConnection`] drives one platform link through
//! `Connecting → ServicesDiscovering → ConfiguringNotifications → Ready`.
//! Any failure along the way tears the link down; there is no partial
//! `Ready` and no automatic retry.

use log::{debug, error, info, warn};

use crate::core::bluetooth::constants::ENABLE_NOTIFICATION_VALUE;
use crate::core::bluetooth::error::{BleError, RadioError};
use crate::core::bluetooth::radio::RadioAdapter;
use crate::core::bluetooth::registry::{CharacteristicRegistry, ResolvedCharacteristics};
use crate::core::bluetooth::types::{Address, ConnectionState, GattService, LinkId};

#[derive(Debug)]
pub struct GattConnection {
    address: Address,
    link: LinkId,
    state: ConnectionState,
    /// Name of the peripheral, persisted once the connection is ready
    name: Option<String>,
    characteristics: Option<ResolvedCharacteristics>,
    disconnect_requested: bool,
}

impl GattConnection {
    /// Opens a new platform link to `address` and enters `Connecting`.
    pub fn open(
        address: Address,
        link: LinkId,
        name: Option<String>,
        radio: &mut dyn RadioAdapter,
    ) -> Result<Self, BleError> {
        info!("Initiating connection to {} ({:?})...", address, link);
        radio.open_connection(&address, link)?;

        Ok(Self {
            address,
            link,
            state: ConnectionState::Connecting,
            name,
            characteristics: None,
            disconnect_requested: false,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn link(&self) -> LinkId {
        self.link
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Characteristic handles; only present once services were resolved.
    pub fn characteristics(&self) -> Option<&ResolvedCharacteristics> {
        self.characteristics.as_ref()
    }

    /// True while the platform link can still be used.
    pub fn is_live(&self) -> bool {
        self.state != ConnectionState::Disconnected && !self.disconnect_requested
    }

    pub fn on_link_up(
        &mut self,
        name: Option<String>,
        radio: &mut dyn RadioAdapter,
    ) -> Result<(), BleError> {
        if self.state != ConnectionState::Connecting {
            debug!("Ignoring link up for {} in state {}", self.address, self.state);
            return Ok(());
        }

        // The advertised name wins over what the link reports
        if self.name.is_none() {
            self.name = name;
        }
        info!("Connection to {} successful, discovering services...", self.address);
        self.state = ConnectionState::ServicesDiscovering;

        if let Err(e) = radio.discover_services(self.link) {
            return Err(self.fail(e.into(), radio));
        }
        Ok(())
    }

    pub fn on_services_discovered(
        &mut self,
        result: Result<Vec<GattService>, RadioError>,
        registry: &CharacteristicRegistry,
        radio: &mut dyn RadioAdapter,
    ) -> Result<(), BleError> {
        if self.state != ConnectionState::ServicesDiscovering {
            debug!(
                "Ignoring service discovery result for {} in state {}",
                self.address, self.state
            );
            return Ok(());
        }

        let services = match result {
            Ok(services) => services,
            Err(e) => return Err(self.fail(e.into(), radio)),
        };

        match registry.resolve(&services) {
            Ok(characteristics) => {
                info!(
                    "Found service {} (read {}, write {})",
                    characteristics.service, characteristics.read, characteristics.write
                );
                self.characteristics = Some(characteristics);
                self.arm_notifications(radio)
            }
            Err(e) => Err(self.fail(e, radio)),
        }
    }

    pub fn on_descriptor_written(
        &mut self,
        result: Result<(), RadioError>,
        radio: &mut dyn RadioAdapter,
    ) -> Result<(), BleError> {
        if self.state != ConnectionState::ConfiguringNotifications {
            debug!("Ignoring descriptor write for {} in state {}", self.address, self.state);
            return Ok(());
        }

        match result {
            Ok(()) => {
                info!("Notifications enabled, connection to {} is ready", self.address);
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => Err(self.fail(e.into(), radio)),
        }
    }

    /// Re-verifies a live link instead of opening a new one. A ready link
    /// re-arms its notifications; a link still being set up is left alone.
    pub fn resume(&mut self, radio: &mut dyn RadioAdapter) -> Result<(), BleError> {
        match self.state {
            ConnectionState::Ready => {
                info!("Reactivating connection to {}", self.address);
                self.arm_notifications(radio)
            }
            state => {
                debug!("Connection to {} already in progress ({})", self.address, state);
                Ok(())
            }
        }
    }

    /// Requests a platform disconnect. The connection is finalized when the
    /// link-down event arrives.
    pub fn request_disconnect(&mut self, radio: &mut dyn RadioAdapter) {
        if !self.is_live() {
            debug!("Disconnect of {} already requested or done", self.address);
            return;
        }
        info!("Disconnecting from device {}", self.address);
        self.disconnect_requested = true;
        radio.disconnect(self.link);
    }

    /// The link went down. Returns `LinkLost` unless the drop was requested.
    pub fn on_link_down(
        &mut self,
        reason: Option<&str>,
        radio: &mut dyn RadioAdapter,
    ) -> Option<BleError> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }

        let unsolicited = !self.disconnect_requested;
        if unsolicited {
            warn!("Link to {} lost: {}", self.address, reason.unwrap_or("no reason given"));
        } else {
            info!("Successfully disconnected from {}", self.address);
        }
        self.release(radio);
        unsolicited.then_some(BleError::LinkLost)
    }

    /// Drops the link immediately without waiting for the platform.
    pub fn teardown(&mut self, radio: &mut dyn RadioAdapter) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        if !self.disconnect_requested {
            radio.disconnect(self.link);
        }
        self.release(radio);
    }

    fn arm_notifications(&mut self, radio: &mut dyn RadioAdapter) -> Result<(), BleError> {
        let Some(characteristics) = self.characteristics else {
            return Err(self.fail(BleError::NotReady(self.state), radio));
        };

        info!("Setting up notifications...");
        self.state = ConnectionState::ConfiguringNotifications;
        let result = radio
            .set_notification(self.link, characteristics.read, true)
            .and_then(|_| {
                radio.write_descriptor(
                    self.link,
                    characteristics.read,
                    characteristics.notify_descriptor,
                    &ENABLE_NOTIFICATION_VALUE,
                )
            });

        if let Err(e) = result {
            return Err(self.fail(e.into(), radio));
        }
        Ok(())
    }

    fn fail(&mut self, err: BleError, radio: &mut dyn RadioAdapter) -> BleError {
        error!("Connection to {} failed: {}", self.address, err);
        self.teardown(radio);
        err
    }

    fn release(&mut self, radio: &mut dyn RadioAdapter) {
        self.characteristics = None;
        radio.close_connection(self.link);
        self.state = ConnectionState::Disconnected;
    }
}
