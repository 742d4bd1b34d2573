//! Controller façade
//! [`Controller`] owns the scan session, the single active connection and the
//! data channel. It is not thread-safe on purpose: every method runs on the
//! owner task (see [`runtime`](crate::core::bluetooth::runtime)), and every
//! platform callback is matched against the session or link token it carries.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::core::bluetooth::channel::{DataChannel, WriteResponder};
use crate::core::bluetooth::connection::GattConnection;
use crate::core::bluetooth::error::{BleError, ConfigError};
use crate::core::bluetooth::events::EventSink;
use crate::core::bluetooth::precondition::{Environment, Precondition, PreconditionGate};
use crate::core::bluetooth::radio::{RadioAdapter, RadioEvent};
use crate::core::bluetooth::registry::CharacteristicRegistry;
use crate::core::bluetooth::scanner::ScanSession;
use crate::core::bluetooth::timer::{Timer, TimerEvent};
use crate::core::bluetooth::types::{
    Address, ConnectionState, ControllerEvent, ControllerSnapshot, LinkId, SessionId, WriteId,
};
use crate::storage::DeviceNameStore;

pub struct Controller {
    radio: Box<dyn RadioAdapter>,
    gate: PreconditionGate,
    timer: Box<dyn Timer>,
    store: Box<dyn DeviceNameStore>,
    events: EventSink,
    registry: CharacteristicRegistry,
    scan: ScanSession,
    connection: Option<GattConnection>,
    channel: DataChannel,
    /// Advertised names seen while scanning, used when the link reports none
    known_names: HashMap<Address, String>,
    /// Set by `start`, cleared by `stop`
    started: bool,
    next_generation: u64,
}

impl Controller {
    /// Creates a controller from a validated configuration.
    pub fn new(
        config: ControllerConfig,
        radio: Box<dyn RadioAdapter>,
        env: Box<dyn Environment>,
        timer: Box<dyn Timer>,
        store: Box<dyn DeviceNameStore>,
        events: EventSink,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            radio,
            gate: PreconditionGate::new(env),
            timer,
            store,
            events,
            registry: CharacteristicRegistry::new(config.profile.clone()),
            scan: ScanSession::new(&config),
            connection: None,
            channel: DataChannel::new(config.write_mode),
            known_names: HashMap::new(),
            started: false,
            next_generation: 0,
        })
    }

    /// Host became visible: check preconditions and start scanning.
    pub fn start(&mut self) -> Result<(), BleError> {
        self.started = true;
        if self.scan.is_running() {
            debug!("Scan already running");
            return Ok(());
        }
        self.begin_scan()
    }

    /// Host went away: stop scanning. An established connection is kept.
    pub fn stop(&mut self) {
        self.started = false;
        self.scan.stop(self.radio.as_mut(), &self.events);
    }

    pub fn rescan(&mut self) -> Result<(), BleError> {
        self.started = true;
        let session = self.new_session();
        let result = self.scan.rescan(
            session,
            &self.gate,
            self.radio.as_mut(),
            self.timer.as_ref(),
            &self.events,
        );
        match result {
            Err(BleError::PreconditionNotSatisfied(precondition)) => {
                Err(self.remediate(precondition))
            }
            result => result,
        }
    }

    /// An external remediation flow finished. Resumes scanning if the host
    /// still wants it and the environment is now usable.
    pub fn preconditions_changed(&mut self) {
        if !self.started || self.scan.is_running() {
            debug!("Precondition change ignored (started: {})", self.started);
            return;
        }

        let precondition = self.gate.evaluate();
        if precondition != Precondition::Satisfied {
            info!("Preconditions still not satisfied: {}", precondition);
            self.events
                .emit(ControllerEvent::PreconditionRequired { precondition });
            return;
        }
        let session = self.new_session();
        let result = self.scan.start(
            session,
            &self.gate,
            self.radio.as_mut(),
            self.timer.as_ref(),
            &self.events,
        );
        if let Err(e) = result {
            warn!("Scan did not resume after remediation: {}", e);
            self.events.emit(ControllerEvent::ScanFailed {
                reason: e.to_string(),
            });
        }
    }

    /// Connects to `address`, or re-verifies the existing link if it already
    /// points there. Progress is reported through connection events.
    pub fn connect(&mut self, address: Address) -> Result<(), BleError> {
        self.check_preconditions()?;

        if let Some(connection) = self.connection.as_mut() {
            let before = connection.state();
            if connection.is_live() && *connection.address() == address {
                let result = connection.resume(self.radio.as_mut());
                return self.settle(before, result);
            }
            info!("Replacing connection to {}", connection.address());
            connection.teardown(self.radio.as_mut());
            let _ = self.settle(before, Ok(()));
        }

        let link = LinkId(self.next_token());
        let name = self.known_names.get(&address).cloned();
        match GattConnection::open(address.clone(), link, name, self.radio.as_mut()) {
            Ok(connection) => {
                self.connection = Some(connection);
                self.settle(ConnectionState::Disconnected, Ok(()))
            }
            Err(e) => {
                self.events.emit(ControllerEvent::ConnectionFailed {
                    address,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn disconnect(&mut self) {
        match self.connection.as_mut() {
            Some(connection) => connection.request_disconnect(self.radio.as_mut()),
            None => debug!("No device connected"),
        }
    }

    /// Writes `data` to the connected peripheral. See [`DataChannel::send`].
    pub fn send(
        &mut self,
        data: &[u8],
        responder: Option<WriteResponder>,
    ) -> Result<WriteId, BleError> {
        self.channel
            .send(self.connection.as_ref(), self.radio.as_mut(), data, responder)
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            scan: self.scan.state(),
            connection: self
                .connection
                .as_ref()
                .map(|c| (c.address().clone(), c.state())),
        }
    }

    /// Stops scanning and drops the connection without waiting for the platform.
    pub fn shutdown(&mut self) {
        info!("Shutting down controller");
        self.stop();
        if let Some(connection) = self.connection.as_mut() {
            let before = connection.state();
            connection.teardown(self.radio.as_mut());
            let _ = self.settle(before, Ok(()));
        }
    }

    pub fn handle_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::ScanTimeout(session) => {
                self.scan
                    .on_timeout(session, self.radio.as_mut(), &self.events)
            }
        }
    }

    pub fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::DeviceFound { session, device } => {
                let address = device.address.clone();
                let name = device.name.clone();
                if self.scan.on_device_found(session, device, &self.events) {
                    if let Some(name) = name {
                        self.known_names.insert(address, name);
                    }
                }
            }
            RadioEvent::ScanFailed { session, reason } => {
                self.scan.on_failed(session, &reason, &self.events)
            }
            RadioEvent::LinkUp { link, name } => {
                self.drive(link, |connection, radio, _| connection.on_link_up(name, radio))
            }
            RadioEvent::ServicesDiscovered { link, result } => {
                self.drive(link, |connection, radio, registry| {
                    connection.on_services_discovered(result, registry, radio)
                })
            }
            RadioEvent::DescriptorWritten { link, result } => {
                self.drive(link, |connection, radio, _| {
                    connection.on_descriptor_written(result, radio)
                })
            }
            RadioEvent::LinkDown { link, reason } => self.drive(link, |connection, radio, _| {
                match connection.on_link_down(reason.as_deref(), radio) {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }),
            RadioEvent::CharacteristicWritten {
                link,
                write,
                result,
            } => {
                if self.is_current_link(link) {
                    self.channel.on_write_complete(write, result);
                } else {
                    debug!("Ignoring write completion for stale link {:?}", link);
                }
            }
            RadioEvent::Notification {
                link,
                characteristic,
                value,
            } => {
                if self.is_current_link(link) {
                    self.channel.on_notification(
                        self.connection.as_ref(),
                        characteristic,
                        value,
                        &self.events,
                    );
                } else {
                    debug!("Ignoring notification for stale link {:?}", link);
                }
            }
        }
    }

    fn begin_scan(&mut self) -> Result<(), BleError> {
        self.check_preconditions()?;
        let session = self.new_session();
        self.scan.start(
            session,
            &self.gate,
            self.radio.as_mut(),
            self.timer.as_ref(),
            &self.events,
        )
    }

    /// Fails with `PreconditionNotSatisfied` after launching the matching
    /// remediation flow.
    fn check_preconditions(&self) -> Result<(), BleError> {
        match self.gate.evaluate() {
            Precondition::Satisfied => Ok(()),
            precondition => Err(self.remediate(precondition)),
        }
    }

    fn remediate(&self, precondition: Precondition) -> BleError {
        self.gate.request_remediation(precondition);
        self.events
            .emit(ControllerEvent::PreconditionRequired { precondition });
        BleError::PreconditionNotSatisfied(precondition)
    }

    /// Token for the next scan session. Names of devices that are not
    /// connected are forgotten, their addresses may have rotated.
    fn new_session(&mut self) -> SessionId {
        let connected = self.connection.as_ref().map(|c| c.address().clone());
        self.known_names
            .retain(|address, _| connected.as_ref() == Some(address));
        SessionId(self.next_token())
    }

    fn is_current_link(&self, link: LinkId) -> bool {
        self.connection.as_ref().is_some_and(|c| c.link() == link)
    }

    /// Runs one state machine step for the connection owning `link`.
    fn drive<F>(&mut self, link: LinkId, step: F)
    where
        F: FnOnce(
            &mut GattConnection,
            &mut dyn RadioAdapter,
            &CharacteristicRegistry,
        ) -> Result<(), BleError>,
    {
        let Some(connection) = self.connection.as_mut().filter(|c| c.link() == link) else {
            debug!("Ignoring event for stale link {:?}", link);
            return;
        };
        let before = connection.state();
        let result = step(connection, self.radio.as_mut(), &self.registry);
        let _ = self.settle(before, result);
    }

    /// Publishes the outcome of a connection step: failure first, then the
    /// state change. A connection that reached `Disconnected` is dropped.
    fn settle(
        &mut self,
        before: ConnectionState,
        result: Result<(), BleError>,
    ) -> Result<(), BleError> {
        let Some(connection) = self.connection.as_ref() else {
            return result;
        };
        let address = connection.address().clone();
        let state = connection.state();

        if let Err(e) = &result {
            self.events.emit(ControllerEvent::ConnectionFailed {
                address: address.clone(),
                reason: e.to_string(),
            });
        }

        if state != before {
            if state == ConnectionState::Ready {
                match connection.name() {
                    Some(name) => self.store.remember(name),
                    None => info!("{} did not report a name, nothing to remember", address),
                }
            }
            self.events
                .emit(ControllerEvent::ConnectionStateChanged { address, state });
        }

        if state == ConnectionState::Disconnected {
            self.channel.fail_pending(BleError::LinkLost);
            self.connection = None;
        }
        result
    }

    fn next_token(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}
