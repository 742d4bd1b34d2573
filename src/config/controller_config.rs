use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::{
    ConfigError, DEFAULT_SCAN_TIMEOUT_MS, UUID_CCCD, UUID_UART_READ_CHAR, UUID_UART_SERVICE,
    UUID_UART_WRITE_CHAR, WriteMode,
};
use crate::utils::{read_json, write_json};

/// GATT layout the peripheral must expose. All four identifiers are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattProfile {
    pub service_uuid: Uuid,
    /// Characteristic the peripheral notifies on
    pub read_char_uuid: Uuid,
    /// Characteristic the central writes to
    pub write_char_uuid: Uuid,
    /// Descriptor written to enable notifications on the read characteristic
    pub notify_descriptor_uuid: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service_uuid: UUID_UART_SERVICE,
            read_char_uuid: UUID_UART_READ_CHAR,
            write_char_uuid: UUID_UART_WRITE_CHAR,
            notify_descriptor_uuid: UUID_CCCD,
        }
    }
}

/// Whether repeated advertisements of one address are forwarded within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    #[default]
    FirstSeenOnly,
    AlwaysForward,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Length of one discovery pass in milliseconds.
    pub scan_timeout_ms: u64,

    pub dedup: DedupPolicy,

    /// Advertisements weaker than this are dropped. `None` keeps everything.
    pub min_rssi: Option<i16>,

    pub write_mode: WriteMode,

    pub profile: GattProfile,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            scan_timeout_ms: DEFAULT_SCAN_TIMEOUT_MS,
            dedup: DedupPolicy::default(),
            min_rssi: None,
            write_mode: WriteMode::default(),
            profile: GattProfile::default(),
        }
    }
}

impl ControllerConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_timeout_ms == 0 {
            return Err(ConfigError::ZeroScanTimeout);
        }
        let profile = &self.profile;
        if profile.service_uuid == profile.read_char_uuid
            || profile.service_uuid == profile.write_char_uuid
        {
            return Err(ConfigError::ServiceCharacteristicClash(profile.service_uuid));
        }
        Ok(())
    }

    /// Loads the config from a configuration file.
    pub async fn load(path: &Path) -> Result<Self> {
        let Some(config) = read_json::<Self>(path).await? else {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        };
        config.validate()?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the config to a configuration file.
    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        write_json(path, self).await?;
        info!("Controller config saved to {:?}.", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ControllerConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.scan_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = ControllerConfig {
            scan_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroScanTimeout));
    }

    #[test]
    fn test_validate_rejects_service_clash() {
        let mut config = ControllerConfig::default();
        config.profile.write_char_uuid = config.profile.service_uuid;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ServiceCharacteristicClash(UUID_UART_SERVICE))
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{"scan_timeout_ms": 2500, "write_mode": "without_response"}"#)
                .unwrap();
        assert_eq!(config.scan_timeout_ms, 2500);
        assert_eq!(config.write_mode, WriteMode::WithoutResponse);
        assert_eq!(config.profile, GattProfile::default());
        assert_eq!(config.dedup, DedupPolicy::FirstSeenOnly);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("controller_config.json");

        let missing = ControllerConfig::load(&path).await.unwrap();
        assert_eq!(missing, ControllerConfig::default());

        let config = ControllerConfig {
            scan_timeout_ms: 1000,
            min_rssi: Some(-80),
            ..Default::default()
        };
        config.save(&path).await.unwrap();
        assert_eq!(ControllerConfig::load(&path).await.unwrap(), config);
    }
}
