//! # labhub-domain
//!
//! Pure domain model for the labhub device runtime.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error taxonomy, timestamps
//! - Hierarchical **device names** used for addressing inside hubs
//! - The tree-shaped **wire value** ([`value::Value`]) and the
//!   **value-converter** seam that maps native types onto it
//! - Static metadata: **property** and **action descriptors**
//! - The **lifecycle** state machine of a device
//! - The **device message** taxonomy published on a device bus
//!
//! ## Dependency rule
//! This crate has **no internal dependencies** and performs no IO.
//! The runtime (cells, buses, supervision) lives in `labhub-app`.

pub mod error;
pub mod id;
pub mod time;

pub mod converter;
pub mod descriptor;
pub mod lifecycle;
pub mod message;
pub mod name;
pub mod value;
