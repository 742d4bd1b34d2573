//! BLE central controller library
//! Timed scanning, a GATT connection state machine and a notify/write byte
//! channel to a single peripheral, driven by one owner task.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod storage;
pub mod utils;

pub use config::ControllerConfig;
pub use crate::core::bluetooth::{BleError, ControllerEvent, ControllerHandle, ControllerRuntime};
