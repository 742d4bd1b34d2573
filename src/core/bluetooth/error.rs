//! Error types for the Bluetooth module

use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::precondition::Precondition;
use crate::core::bluetooth::types::ConnectionState;

/// Errors reported by the controller to its callers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error("precondition not satisfied: {0}")]
    PreconditionNotSatisfied(Precondition),

    #[error("service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("descriptor {descriptor} not found on characteristic {characteristic}")]
    DescriptorNotFound { characteristic: Uuid, descriptor: Uuid },

    #[error("connection not ready (state: {0})")]
    NotReady(ConnectionState),

    #[error("link lost")]
    LinkLost,

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("controller task has stopped")]
    ControllerStopped,
}

/// Failures reported by the Radio Adapter port
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unknown link")]
    UnknownLink,

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("GATT status {0:#04x}")]
    Status(u8),

    #[error("{0}")]
    Platform(String),
}

impl From<RadioError> for BleError {
    fn from(err: RadioError) -> Self {
        BleError::OperationFailed(err.to_string())
    }
}

/// Invalid controller configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("scan timeout must be greater than zero")]
    ZeroScanTimeout,

    #[error("service UUID {0} is also used as a characteristic UUID")]
    ServiceCharacteristicClash(Uuid),
}
