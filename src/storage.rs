//! Persistence hook for the last connected peripheral
//! The controller only calls [`DeviceNameStore::remember`]; where the name
//! ends up is up to the host.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::utils::{read_json, write_json};

pub trait DeviceNameStore: Send {
    /// Records the name of a peripheral that just became ready. Must not block.
    fn remember(&self, name: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberedDevice {
    pub name: String,
    /// RFC 3339 timestamp of the connection
    pub connected_at: String,
}

/// Keeps the last device name in a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileNameStore {
    path: PathBuf,
}

impl JsonFileNameStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the last remembered device, if the file exists.
    pub async fn last_device(&self) -> Result<Option<RememberedDevice>> {
        read_json(&self.path).await
    }

    async fn write(path: PathBuf, record: RememberedDevice) -> Result<()> {
        write_json(&path, &record).await?;
        info!("Remembered device {:?} in {:?}", record.name, path);
        Ok(())
    }
}

impl DeviceNameStore for JsonFileNameStore {
    fn remember(&self, name: &str) {
        let record = RememberedDevice {
            name: name.to_string(),
            connected_at: Local::now().to_rfc3339(),
        };
        let path = self.path.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = Self::write(path, record).await {
                        error!("Failed to remember device name: {}", e);
                    }
                });
            }
            Err(_) => warn!("No runtime available, device name {:?} not persisted", name),
        }
    }
}
