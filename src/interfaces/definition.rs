//! Interface definition: the immutable description of one capability.
//!
//! An interface declares:
//! - Whether its slot is implicitly present on the system instance
//! - Whether only the system instance may provide the slot
//! - Base-declaration rule text deciding who may install and connect it
//! - Policy fragments for each enforcement backend
//!
//! Definitions are built in code (see [`super::builtin`]) or loaded from YAML
//! catalog files and registered with the [`InterfaceRegistry`](super::InterfaceRegistry).

use std::fmt;

use serde::{Deserialize, Serialize};

/// AppArmor rules.
pub const BACKEND_APPARMOR: &str = "apparmor";
/// Seccomp syscall allow-list entries.
pub const BACKEND_SECCOMP: &str = "seccomp";
/// Udev device-node tagging rules.
pub const BACKEND_UDEV: &str = "udev";
/// Kernel modules to load.
pub const BACKEND_KMOD: &str = "kmod";

/// An interface definition.
///
/// Example YAML:
/// ```yaml
/// interface:
///   name: "cifs-mount-control"
///   summary: "allows to mount and unmount CIFS shares"
///   implicit-on-core: true
///   implicit-on-classic: true
///   reserved-for-os: true
///   base-declaration-slots: |
///     cifs-mount-control:
///       allow-installation:
///         slot-snap-type:
///           - core
///       deny-auto-connection: true
///   fragments:
///     - backend: seccomp
///       side: plug
///       scope: connected
///       text: |
///         mount
///         umount
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct InterfaceDefinition {
    /// Unique interface name (e.g., "cifs-mount-control")
    pub name: String,

    /// One-line description
    #[serde(default)]
    pub summary: String,

    /// Slot exists on the system instance of a core device without being declared
    #[serde(default)]
    pub implicit_on_core: bool,

    /// Slot exists on the system instance of a classic system without being declared
    #[serde(default)]
    pub implicit_on_classic: bool,

    /// Only the system instance may provide a slot of this interface
    #[serde(default)]
    pub reserved_for_os: bool,

    /// Base-declaration rules for the plug side (YAML text, may be empty)
    #[serde(default)]
    pub base_declaration_plugs: String,

    /// Base-declaration rules for the slot side (YAML text, may be empty)
    #[serde(default)]
    pub base_declaration_slots: String,

    /// Per-backend rule fragments, sparse
    #[serde(default)]
    pub fragments: Vec<PolicyFragment>,
}

/// Plug (consumer) or slot (provider). Orders plug before slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Plug,
    Slot,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Plug => "plug",
            Side::Slot => "slot",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a fragment applies. Orders permanent before connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Whenever the plug or slot exists at all
    Permanent,
    /// Only once a specific plug and slot are linked
    Connected,
}

/// One backend's rule text for one side and scope of an interface.
///
/// The text is opaque to the engine apart from `@{...}` placeholders,
/// which the composer substitutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyFragment {
    pub backend: String,
    pub side: Side,
    pub scope: Scope,
    pub text: String,
}

impl PolicyFragment {
    pub fn new(backend: &str, side: Side, scope: Scope, text: impl Into<String>) -> Self {
        Self {
            backend: backend.to_string(),
            side,
            scope,
            text: text.into(),
        }
    }
}

impl InterfaceDefinition {
    /// Start a definition with no flags, rules or fragments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: String::new(),
            implicit_on_core: false,
            implicit_on_classic: false,
            reserved_for_os: false,
            base_declaration_plugs: String::new(),
            base_declaration_slots: String::new(),
            fragments: Vec::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn implicit(mut self, on_core: bool, on_classic: bool) -> Self {
        self.implicit_on_core = on_core;
        self.implicit_on_classic = on_classic;
        self
    }

    pub fn reserved_for_os(mut self) -> Self {
        self.reserved_for_os = true;
        self
    }

    pub fn with_plug_rules(mut self, rules: impl Into<String>) -> Self {
        self.base_declaration_plugs = rules.into();
        self
    }

    pub fn with_slot_rules(mut self, rules: impl Into<String>) -> Self {
        self.base_declaration_slots = rules.into();
        self
    }

    pub fn with_fragment(
        mut self,
        backend: &str,
        side: Side,
        scope: Scope,
        text: impl Into<String>,
    ) -> Self {
        self.fragments.push(PolicyFragment::new(backend, side, scope, text));
        self
    }

    /// Parse a definition from YAML (nested under an `interface:` key).
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let wrapper: InterfaceWrapper = serde_yaml::from_str(yaml)?;
        Ok(wrapper.interface)
    }

    /// Whether the slot is implicitly present in the given platform mode.
    pub fn is_implicit_in(&self, mode: crate::instance::PlatformMode) -> bool {
        if mode.is_classic() {
            self.implicit_on_classic
        } else {
            self.implicit_on_core
        }
    }

    /// Fragments for one side and scope, in declaration order.
    pub fn fragments_for(&self, side: Side, scope: Scope) -> impl Iterator<Item = &PolicyFragment> {
        self.fragments
            .iter()
            .filter(move |f| f.side == side && f.scope == scope)
    }

    /// Every backend this interface contributes to.
    pub fn backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fragments.iter().map(|f| f.backend.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Wrapper for YAML deserialization (definition is nested under `interface:`)
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InterfaceWrapper {
    interface: InterfaceDefinition,
}
