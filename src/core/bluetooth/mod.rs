//! Bluetooth functionality of the BLE central controller
//! This module handles scanning, the GATT connection state machine and the
//! byte channel over the negotiated read/write characteristic pair.

mod channel;
mod connection;
mod constants;
mod error;
mod events;
mod manager;
mod precondition;
mod radio;
mod registry;
mod runtime;
mod scanner;
mod timer;
mod types;

#[cfg(feature = "bluest")]
mod bluest_radio;

/// Test doubles for the platform ports
#[cfg(any(test, feature = "test-util"))]
pub mod fake;

// Re-export types that should be publicly accessible
pub use channel::{DataChannel, WriteResponder};
pub use connection::GattConnection;
pub use constants::*; // Re-export all constants
pub use error::{BleError, ConfigError, RadioError};
pub use events::EventSink;
pub use manager::Controller;
pub use precondition::{
    AdapterState, Environment, LocationPermission, Precondition, PreconditionGate, Remediation,
    required_permission,
};
pub use radio::{RadioAdapter, RadioEvent, RadioEventSink};
pub use registry::{CharacteristicRegistry, ResolvedCharacteristics};
pub use runtime::{ControllerHandle, ControllerRuntime, RemediationNotifier};
pub use scanner::ScanSession;
pub use timer::{Timer, TimerEvent, TimerHandle, TokioTimer};
pub use types::{
    Address, ConnectionState, ControllerEvent, ControllerSnapshot, DiscoveredDevice,
    GattCharacteristic, GattService, LinkId, ScanState, SessionId, WriteId, WriteMode,
};

#[cfg(feature = "bluest")]
pub use bluest_radio::{BluestRadio, HostEnvironment};
