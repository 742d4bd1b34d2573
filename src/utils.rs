use std::io::ErrorKind;
use std::path::Path;

use anyhow::Result;
use log::{error, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

/// Creates the parent directory of `path` if it does not exist yet.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
        return Ok(());
    };
    if !dir.exists() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!("Failed to create directory at {:?}: {}", dir, e);
            return Err(e.into());
        }
        info!("Created directory at: {:?}", dir);
    }
    Ok(())
}

/// Reads a JSON document. A missing file is `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes `value` as pretty-printed JSON, creating parent directories.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path).await?;
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).await?;
    Ok(())
}
