//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::precondition::Precondition;

/// Platform address of a peripheral (MAC address on most platforms,
/// an opaque device id on others)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Generation token of one scan session. Scan results and timer expiries
/// carry it so that callbacks from a finished session can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(pub u64);

/// Generation token of one platform link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkId(pub u64);

/// Identifies a single characteristic write awaiting acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WriteId(pub u64);

/// Represents a discovered Bluetooth device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// The address used to connect to the device
    pub address: Address,
    /// The advertised name of the device, if available
    pub name: Option<String>,
    /// The signal strength (RSSI) of the advertisement, if reported
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    pub fn new(address: impl Into<Address>, name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            address: address.into(),
            name,
            rssi,
        }
    }
}

/// State of a [`ScanSession`](crate::core::bluetooth::ScanSession)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanState {
    Idle,
    Running,
    /// The timeout expired; the session is finished but not yet reset.
    Stopped,
}

/// State of a [`GattConnection`](crate::core::bluetooth::GattConnection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ServicesDiscovering,
    ConfiguringNotifications,
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::ServicesDiscovering => "discovering services",
            Self::ConfiguringNotifications => "configuring notifications",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// How characteristic writes are issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Acknowledged write (write request)
    #[default]
    WithResponse,
    /// Unacknowledged write (write command)
    WithoutResponse,
}

/// A characteristic as reported by service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    pub fn new(uuid: Uuid, descriptors: Vec<Uuid>) -> Self {
        Self { uuid, descriptors }
    }
}

/// A primary service and its characteristics as reported by service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn new(uuid: Uuid, characteristics: Vec<GattCharacteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }
}

/// Events surfaced to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    /// Scanning could not start; the host should run the matching remediation flow
    PreconditionRequired { precondition: Precondition },
    ScanStarted,
    ScanStopped,
    /// The radio refused to start a scan the host did not request directly
    ScanFailed { reason: String },
    DeviceFound { device: DiscoveredDevice },
    ConnectionStateChanged {
        address: Address,
        state: ConnectionState,
    },
    /// A connection attempt or an established link ended with an error
    ConnectionFailed { address: Address, reason: String },
    DataReceived { data: Vec<u8> },
}

/// Point-in-time view of the controller, answered by the owner task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub scan: ScanState,
    pub connection: Option<(Address, ConnectionState)>,
}
