//! Interfaces compiled into the binary.
//!
//! Each module exposes a `definition()` constructor. [`definitions`] lists
//! them in the order they are registered.

pub mod cifs_mount_control;

use super::definition::InterfaceDefinition;

/// The built-in catalog, in registration order.
pub fn definitions() -> Vec<InterfaceDefinition> {
    vec![cifs_mount_control::definition()]
}
