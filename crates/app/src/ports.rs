//! Port definitions — the traits transports, tools and other devices program
//! against.
//!
//! Ports are defined here (in `app`) so that adapters can provide device
//! implementations and consumers can drive them without knowing which
//! concrete type sits behind an `Arc<dyn Device>`.

pub mod device;

pub use device::{Device, DeviceHub, DeviceHubExt};
