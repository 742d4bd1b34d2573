//! In-process stand-ins for the platform: a recording radio that can also
//! play a cooperative peripheral, a scripted environment, a manual timer
//! and an in-memory name store.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_CCCD, UUID_UART_READ_CHAR, UUID_UART_SERVICE, UUID_UART_WRITE_CHAR,
};
use crate::core::bluetooth::error::RadioError;
use crate::core::bluetooth::precondition::{
    AdapterState, Environment, LocationPermission, Remediation,
};
use crate::core::bluetooth::radio::{RadioAdapter, RadioEvent, RadioEventSink};
use crate::core::bluetooth::timer::{Timer, TimerEvent, TimerHandle};
use crate::core::bluetooth::types::{
    Address, GattCharacteristic, GattService, LinkId, SessionId, WriteId, WriteMode,
};
use crate::storage::DeviceNameStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Service tree of a peripheral exposing the default UART layout
pub fn uart_services() -> Vec<GattService> {
    vec![GattService::new(
        UUID_UART_SERVICE,
        vec![
            GattCharacteristic::new(UUID_UART_READ_CHAR, vec![UUID_CCCD]),
            GattCharacteristic::new(UUID_UART_WRITE_CHAR, vec![]),
        ],
    )]
}

/// A request received by [`FakeRadio`]
#[derive(Debug, Clone, PartialEq)]
pub enum RadioCall {
    StartScan(SessionId),
    StopScan,
    Open {
        address: Address,
        link: LinkId,
    },
    Disconnect(LinkId),
    Close(LinkId),
    DiscoverServices(LinkId),
    SetNotification {
        link: LinkId,
        characteristic: Uuid,
        enabled: bool,
    },
    WriteDescriptor {
        link: LinkId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: Vec<u8>,
    },
    WriteCharacteristic {
        link: LinkId,
        characteristic: Uuid,
        value: Vec<u8>,
        mode: WriteMode,
        write: WriteId,
    },
}

/// Peripheral behaviour played back through the event sink
#[derive(Clone)]
pub struct SimulatedPeripheral {
    pub sink: RadioEventSink,
    pub name: Option<String>,
    pub services: Vec<GattService>,
    /// Echo every write back as a notification on the read characteristic
    pub echo: bool,
}

impl SimulatedPeripheral {
    pub fn uart(sink: RadioEventSink, name: &str) -> Self {
        Self {
            sink,
            name: Some(name.to_string()),
            services: uart_services(),
            echo: true,
        }
    }
}

#[derive(Default)]
struct FakeRadioState {
    calls: Vec<RadioCall>,
    fail_scan: bool,
    fail_writes: bool,
    peripheral: Option<SimulatedPeripheral>,
}

/// Records every port call. Clones share the same record.
#[derive(Clone, Default)]
pub struct FakeRadio {
    state: Arc<Mutex<FakeRadioState>>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A radio whose every request is answered by `peripheral`.
    pub fn with_peripheral(peripheral: SimulatedPeripheral) -> Self {
        let radio = Self::new();
        lock(&radio.state).peripheral = Some(peripheral);
        radio
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Link token of the most recent `open_connection`
    pub fn last_link(&self) -> Option<LinkId> {
        lock(&self.state).calls.iter().rev().find_map(|call| match call {
            RadioCall::Open { link, .. } => Some(*link),
            _ => None,
        })
    }

    /// Session token of the most recent `start_scan`
    pub fn last_session(&self) -> Option<SessionId> {
        lock(&self.state).calls.iter().rev().find_map(|call| match call {
            RadioCall::StartScan(session) => Some(*session),
            _ => None,
        })
    }

    pub fn set_fail_scan(&self, fail: bool) {
        lock(&self.state).fail_scan = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    fn record(&self, call: RadioCall) -> Option<SimulatedPeripheral> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        state.peripheral.clone()
    }
}

impl RadioAdapter for FakeRadio {
    fn start_scan(&mut self, session: SessionId) -> Result<(), RadioError> {
        if lock(&self.state).fail_scan {
            return Err(RadioError::Platform("scan refused".to_string()));
        }
        self.record(RadioCall::StartScan(session));
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.record(RadioCall::StopScan);
    }

    fn open_connection(&mut self, address: &Address, link: LinkId) -> Result<(), RadioError> {
        let call = RadioCall::Open {
            address: address.clone(),
            link,
        };
        if let Some(peripheral) = self.record(call) {
            peripheral.sink.send(RadioEvent::LinkUp {
                link,
                name: peripheral.name.clone(),
            });
        }
        Ok(())
    }

    fn disconnect(&mut self, link: LinkId) {
        if let Some(peripheral) = self.record(RadioCall::Disconnect(link)) {
            peripheral.sink.send(RadioEvent::LinkDown { link, reason: None });
        }
    }

    fn close_connection(&mut self, link: LinkId) {
        self.record(RadioCall::Close(link));
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), RadioError> {
        if let Some(peripheral) = self.record(RadioCall::DiscoverServices(link)) {
            peripheral.sink.send(RadioEvent::ServicesDiscovered {
                link,
                result: Ok(peripheral.services.clone()),
            });
        }
        Ok(())
    }

    fn set_notification(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), RadioError> {
        self.record(RadioCall::SetNotification {
            link,
            characteristic,
            enabled,
        });
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<(), RadioError> {
        let call = RadioCall::WriteDescriptor {
            link,
            characteristic,
            descriptor,
            value: value.to_vec(),
        };
        if let Some(peripheral) = self.record(call) {
            peripheral
                .sink
                .send(RadioEvent::DescriptorWritten { link, result: Ok(()) });
        }
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
        write: WriteId,
    ) -> Result<(), RadioError> {
        if lock(&self.state).fail_writes {
            return Err(RadioError::Platform("write refused".to_string()));
        }
        let call = RadioCall::WriteCharacteristic {
            link,
            characteristic,
            value: value.to_vec(),
            mode,
            write,
        };
        if let Some(peripheral) = self.record(call) {
            peripheral.sink.send(RadioEvent::CharacteristicWritten {
                link,
                write,
                result: Ok(()),
            });
            if peripheral.echo {
                peripheral.sink.send(RadioEvent::Notification {
                    link,
                    characteristic: UUID_UART_READ_CHAR,
                    value: value.to_vec(),
                });
            }
        }
        Ok(())
    }
}

struct EnvironmentState {
    platform_version: u32,
    permissions: Vec<LocationPermission>,
    location_enabled: bool,
    adapter: AdapterState,
    launched: Vec<Remediation>,
}

/// Scripted [`Environment`]. Clones share state.
#[derive(Clone)]
pub struct FakeEnvironment {
    state: Arc<Mutex<EnvironmentState>>,
}

impl FakeEnvironment {
    /// No permissions granted, location service on, adapter on.
    pub fn new(platform_version: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(EnvironmentState {
                platform_version,
                permissions: Vec::new(),
                location_enabled: true,
                adapter: AdapterState::On,
                launched: Vec::new(),
            })),
        }
    }

    /// A host without runtime permissions and a powered adapter.
    pub fn satisfied() -> Self {
        Self::new(0)
    }

    pub fn grant(&self, permission: LocationPermission) {
        lock(&self.state).permissions.push(permission);
    }

    pub fn set_location_enabled(&self, enabled: bool) {
        lock(&self.state).location_enabled = enabled;
    }

    pub fn set_adapter(&self, adapter: AdapterState) {
        lock(&self.state).adapter = adapter;
    }

    /// Remediation flows launched so far
    pub fn launched(&self) -> Vec<Remediation> {
        lock(&self.state).launched.clone()
    }
}

impl Environment for FakeEnvironment {
    fn platform_version(&self) -> u32 {
        lock(&self.state).platform_version
    }

    fn has_permission(&self, permission: LocationPermission) -> bool {
        lock(&self.state).permissions.contains(&permission)
    }

    fn location_service_enabled(&self) -> bool {
        lock(&self.state).location_enabled
    }

    fn adapter_state(&self) -> AdapterState {
        lock(&self.state).adapter
    }

    fn launch(&self, remediation: Remediation) {
        lock(&self.state).launched.push(remediation);
    }
}

/// [`Timer`] that never fires on its own; tests deliver expiries by hand.
#[derive(Clone, Default)]
pub struct ManualTimer {
    scheduled: Arc<Mutex<Vec<(Duration, TimerEvent, TimerHandle)>>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timers scheduled and not cancelled
    pub fn pending(&self) -> Vec<(Duration, TimerEvent)> {
        lock(&self.scheduled)
            .iter()
            .filter(|(_, _, handle)| !handle.is_cancelled())
            .map(|(delay, event, _)| (*delay, *event))
            .collect()
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, event: TimerEvent) -> TimerHandle {
        let handle = TimerHandle::new(CancellationToken::new());
        lock(&self.scheduled).push((delay, event, handle.clone()));
        handle
    }
}

/// [`DeviceNameStore`] that keeps every remembered name in memory
#[derive(Clone, Default)]
pub struct MemoryNameStore {
    names: Arc<Mutex<Vec<String>>>,
}

impl MemoryNameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remembered(&self) -> Vec<String> {
        lock(&self.names).clone()
    }
}

impl DeviceNameStore for MemoryNameStore {
    fn remember(&self, name: &str) {
        lock(&self.names).push(name.to_string());
    }
}
