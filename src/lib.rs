//! # ifacepolicy
//!
//! Interface policy registry and composition engine for sandboxed
//! application instances.
//!
//! Instances declare *plugs* (what they consume) and *slots* (what they
//! provide) of named interfaces. The engine decides which plug/slot pairs
//! may be installed and connected, automatically or only with explicit
//! consent, and composes the enforcement profiles (AppArmor, seccomp, udev,
//! kmod) each instance needs given its live connections.
//!
//! ## Architecture
//!
//! ```text
//! EngineConfig ─▶ InterfaceRegistry (built-ins + YAML catalogs, frozen in Arc)
//!                   │
//!                   ├─▶ BaseDeclarationEvaluator ─▶ Allowed / Denied / RequiresManualConsent
//!                   │            │
//!                   │            ▼
//!                   │     ConnectionResolver ─▶ ConnectionState (plug → connection)
//!                   │            │
//!                   └─▶ PolicyComposer ◀─ ProfileRegenerator ─▶ ProfileSink
//! ```
//!
//! [`Engine`] wires these together; each part is usable on its own.

pub mod config;
pub mod connections;
pub mod engine;
pub mod errors;
pub mod instance;
pub mod interfaces;
pub mod logging;
pub mod policy;
pub mod profile;

pub use config::{ConfigError, EngineConfig};
pub use connections::{ConnectError, Connection, ConnectionResolver, ConnectionState, SlotCandidate};
pub use engine::Engine;
pub use errors::{Error, Result};
pub use instance::{Attributes, EndpointKey, Instance, PlatformMode, PlugRef, SlotRef, SnapType};
pub use interfaces::{InterfaceDefinition, InterfaceRegistry, PolicyFragment, RegistryError, Scope, Side};
pub use policy::{BaseDeclarationEvaluator, Eligibility, Evaluation};
pub use profile::{
    BackendRenderer, BackendSet, ComposeError, MemoryProfileStore, PolicyComposer, Profile,
    ProfileRegenerator, ProfileSet, ProfileSink, ProfileUpdate,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
