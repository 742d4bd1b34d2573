//! Constants used throughout the controller
//! This module contains the fixed GATT layout of the supported peripheral,
//! timeouts, and the platform permission tiers.

use uuid::Uuid;

/// The UUID of the transparent UART service exposed by the peripheral
pub const UUID_UART_SERVICE: Uuid = Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455);

/// The UUID of the characteristic the peripheral notifies on (central reads)
pub const UUID_UART_READ_CHAR: Uuid = Uuid::from_u128(0x49535343_1e4d_4bd9_ba61_23c647249616);

/// The UUID of the characteristic the central writes to
pub const UUID_UART_WRITE_CHAR: Uuid = Uuid::from_u128(0x49535343_8841_43f4_a8d4_ecbe34729bb3);

/// Client Characteristic Configuration Descriptor
pub const UUID_CCCD: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Value written to the CCCD to enable notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Value written to the CCCD to disable notifications
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Scan duration in milliseconds
pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 10_000;

/// First platform version that requires a runtime location permission to scan
pub const PERMISSION_RUNTIME_MIN_VERSION: u32 = 24;

/// First platform version that requires the fine (rather than coarse) location permission
pub const FINE_LOCATION_MIN_VERSION: u32 = 29;
