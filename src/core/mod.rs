//! Core functionality of the BLE central controller

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{Controller, ControllerEvent, ControllerHandle, ControllerRuntime};
