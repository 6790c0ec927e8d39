//! # Interfaces
//!
//! An interface is a named capability with a consumer end (plug) and a
//! provider end (slot). Each interface carries base-declaration rules that
//! decide who may install and connect it, and policy fragments for every
//! enforcement backend it touches.
//!
//! ## Architecture
//!
//! ```text
//! builtin::definitions() ─┐
//! YAML catalog files ─────┼─▶ InterfaceRegistry (filled once, then Arc-shared)
//! register_all(defs) ─────┘        │
//!                                  ├─▶ BaseDeclarationEvaluator (eligibility)
//!                                  └─▶ PolicyComposer (fragments → profiles)
//! ```
//!
//! Interfaces differ only in data: which flags are set and which backends
//! they contribute fragments to. There is no per-interface trait.

pub mod builtin;
pub mod definition;
pub mod registry;

pub use definition::{
    InterfaceDefinition, PolicyFragment, Scope, Side, BACKEND_APPARMOR, BACKEND_KMOD,
    BACKEND_SECCOMP, BACKEND_UDEV,
};
pub use registry::{InterfaceRegistry, RegistryError};
