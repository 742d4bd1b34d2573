//! Environmental preconditions for scanning and connecting
//! This module decides whether radio operations may be attempted and
//! triggers the external flow that can fix a missing precondition.

use std::fmt;

use log::{debug, info};
use serde::Serialize;

use crate::core::bluetooth::constants::{FINE_LOCATION_MIN_VERSION, PERMISSION_RUNTIME_MIN_VERSION};

/// Outcome of a precondition check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Precondition {
    PermissionMissing,
    LocationServiceDisabled,
    AdapterDisabled,
    AdapterMissing,
    Satisfied,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PermissionMissing => "location permission missing",
            Self::LocationServiceDisabled => "location service disabled",
            Self::AdapterDisabled => "bluetooth adapter disabled",
            Self::AdapterMissing => "no bluetooth adapter",
            Self::Satisfied => "satisfied",
        };
        f.write_str(text)
    }
}

/// Location permission level a platform version requires for BLE scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocationPermission {
    Coarse,
    Fine,
}

/// Power state of the local adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Missing,
    Off,
    On,
}

/// External flow that can resolve a missing precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    RequestPermission(LocationPermission),
    OpenLocationSettings,
    EnableAdapter,
}

/// Host environment queried by the gate.
///
/// Queries must be side-effect free. `launch` starts the external flow and
/// returns immediately; the host reports completion through a
/// [`RemediationNotifier`](crate::core::bluetooth::RemediationNotifier).
pub trait Environment: Send {
    fn platform_version(&self) -> u32;
    fn has_permission(&self, permission: LocationPermission) -> bool;
    fn location_service_enabled(&self) -> bool;
    fn adapter_state(&self) -> AdapterState;
    fn launch(&self, remediation: Remediation);
}

/// Permission tiers keyed by the first platform version they apply to.
const PERMISSION_TIERS: &[(u32, Option<LocationPermission>)] = &[
    (0, None),
    (PERMISSION_RUNTIME_MIN_VERSION, Some(LocationPermission::Coarse)),
    (FINE_LOCATION_MIN_VERSION, Some(LocationPermission::Fine)),
];

/// Returns the location permission required to scan on `platform_version`
pub fn required_permission(platform_version: u32) -> Option<LocationPermission> {
    PERMISSION_TIERS
        .iter()
        .rev()
        .find(|(min_version, _)| platform_version >= *min_version)
        .and_then(|(_, permission)| *permission)
}

pub struct PreconditionGate {
    env: Box<dyn Environment>,
}

impl PreconditionGate {
    pub fn new(env: Box<dyn Environment>) -> Self {
        Self { env }
    }

    /// Checks permission, then location service, then the adapter.
    pub fn evaluate(&self) -> Precondition {
        if let Some(permission) = required_permission(self.env.platform_version()) {
            if !self.env.has_permission(permission) {
                return Precondition::PermissionMissing;
            }
            if !self.env.location_service_enabled() {
                return Precondition::LocationServiceDisabled;
            }
        }

        match self.env.adapter_state() {
            AdapterState::Missing => Precondition::AdapterMissing,
            AdapterState::Off => Precondition::AdapterDisabled,
            AdapterState::On => Precondition::Satisfied,
        }
    }

    /// Triggers the external flow for `kind`. The caller re-evaluates once
    /// the flow reports completion.
    pub fn request_remediation(&self, kind: Precondition) {
        let remediation = match kind {
            Precondition::PermissionMissing => {
                match required_permission(self.env.platform_version()) {
                    Some(permission) => Remediation::RequestPermission(permission),
                    None => return,
                }
            }
            Precondition::LocationServiceDisabled => Remediation::OpenLocationSettings,
            Precondition::AdapterDisabled => Remediation::EnableAdapter,
            Precondition::AdapterMissing | Precondition::Satisfied => {
                debug!("No remediation available for precondition: {}", kind);
                return;
            }
        };
        info!("Requesting remediation: {:?}", remediation);
        self.env.launch(remediation);
    }
}
