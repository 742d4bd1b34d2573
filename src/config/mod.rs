pub mod controller_config;

pub use controller_config::{ControllerConfig, DedupPolicy, GattProfile};
