//! # labhub-app
//!
//! Device runtime: reactive cells, the per-device message bus, supervised
//! scopes, and the two device shapes (`LocalDevice` leaf and `Hub`).
//!
//! ## Responsibilities
//! - Define the **`Device` / `DeviceHub` ports** that transports and tools
//!   program against
//! - Provide **reactive state cells** (mutable, virtual, derived, external,
//!   mirrored) and the advisory binding registry
//! - Run device-owned background work inside a **supervised scope** so that a
//!   failing task is reported on the bus instead of tearing the device down
//! - Drive the **lifecycle state machine** and hierarchical hub addressing
//!
//! ## Dependency rule
//! Depends on `labhub-domain` only (plus tokio for tasks and channels).
//! Never imports adapter crates.

use std::future::Future;
use std::pin::Pin;

pub mod binding;
pub mod bus;
pub mod cell;
pub mod device;
pub mod hub;
pub mod ports;
pub mod supervisor;

pub use bus::MessageBus;
pub use device::{LocalDevice, PropertyHandle};
pub use hub::Hub;
pub use ports::{Device, DeviceHub, DeviceHubExt};
pub use supervisor::{Scope, Supervisor};

/// Boxed, sendable future used by type-erased callbacks (readers, writers, hooks).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
