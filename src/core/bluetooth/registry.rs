//! Resolves the read/write characteristic pair from a discovered service tree

use log::info;
use uuid::Uuid;

use crate::config::GattProfile;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::types::GattService;

/// Characteristics resolved for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCharacteristics {
    pub service: Uuid,
    pub read: Uuid,
    pub write: Uuid,
    pub notify_descriptor: Uuid,
}

#[derive(Debug, Clone)]
pub struct CharacteristicRegistry {
    profile: GattProfile,
}

impl CharacteristicRegistry {
    pub fn new(profile: GattProfile) -> Self {
        Self { profile }
    }

    pub fn resolve(&self, services: &[GattService]) -> Result<ResolvedCharacteristics, BleError> {
        let service = services
            .iter()
            .find(|s| s.uuid == self.profile.service_uuid)
            .ok_or_else(|| {
                for service in services {
                    info!("Available service: {}", service.uuid);
                }
                BleError::ServiceNotFound(self.profile.service_uuid)
            })?;

        let find = |uuid: Uuid| {
            service
                .characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .ok_or(BleError::CharacteristicNotFound(uuid))
        };
        let read = find(self.profile.read_char_uuid)?;
        find(self.profile.write_char_uuid)?;

        // Notifications are armed through this descriptor
        if !read.descriptors.contains(&self.profile.notify_descriptor_uuid) {
            return Err(BleError::DescriptorNotFound {
                characteristic: read.uuid,
                descriptor: self.profile.notify_descriptor_uuid,
            });
        }

        Ok(ResolvedCharacteristics {
            service: service.uuid,
            read: self.profile.read_char_uuid,
            write: self.profile.write_char_uuid,
            notify_descriptor: self.profile.notify_descriptor_uuid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{
        UUID_CCCD, UUID_UART_READ_CHAR, UUID_UART_SERVICE, UUID_UART_WRITE_CHAR,
    };
    use crate::core::bluetooth::types::GattCharacteristic;

    const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

    fn registry() -> CharacteristicRegistry {
        CharacteristicRegistry::new(GattProfile::default())
    }

    fn uart_service(characteristics: &[Uuid]) -> GattService {
        GattService::new(
            UUID_UART_SERVICE,
            characteristics
                .iter()
                .map(|uuid| GattCharacteristic::new(*uuid, vec![UUID_CCCD]))
                .collect(),
        )
    }

    #[test]
    fn test_resolve() {
        let services = vec![
            GattService::new(UUID_BATTERY_SERVICE, vec![]),
            uart_service(&[UUID_UART_WRITE_CHAR, UUID_UART_READ_CHAR]),
        ];
        let resolved = registry().resolve(&services).unwrap();
        assert_eq!(resolved.service, UUID_UART_SERVICE);
        assert_eq!(resolved.read, UUID_UART_READ_CHAR);
        assert_eq!(resolved.write, UUID_UART_WRITE_CHAR);
        assert_eq!(resolved.notify_descriptor, UUID_CCCD);
    }

    #[test]
    fn test_service_not_found() {
        let services = vec![GattService::new(UUID_BATTERY_SERVICE, vec![])];
        assert_eq!(
            registry().resolve(&services),
            Err(BleError::ServiceNotFound(UUID_UART_SERVICE))
        );
        assert_eq!(
            registry().resolve(&[]),
            Err(BleError::ServiceNotFound(UUID_UART_SERVICE))
        );
    }

    #[test]
    fn test_characteristic_not_found() {
        let services = vec![uart_service(&[UUID_UART_READ_CHAR])];
        assert_eq!(
            registry().resolve(&services),
            Err(BleError::CharacteristicNotFound(UUID_UART_WRITE_CHAR))
        );

        let services = vec![uart_service(&[UUID_UART_WRITE_CHAR])];
        assert_eq!(
            registry().resolve(&services),
            Err(BleError::CharacteristicNotFound(UUID_UART_READ_CHAR))
        );
    }

    #[test]
    fn test_notify_descriptor_required() {
        let services = vec![GattService::new(
            UUID_UART_SERVICE,
            vec![
                GattCharacteristic::new(UUID_UART_READ_CHAR, vec![]),
                GattCharacteristic::new(UUID_UART_WRITE_CHAR, vec![UUID_CCCD]),
            ],
        )];
        assert_eq!(
            registry().resolve(&services),
            Err(BleError::DescriptorNotFound {
                characteristic: UUID_UART_READ_CHAR,
                descriptor: UUID_CCCD,
            })
        );
    }
}
