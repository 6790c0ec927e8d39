//! Application instances, snap types and plug/slot attributes.
//!
//! These are the shared vocabulary of the engine: the evaluator matches rules
//! against them, the resolver keys connections by them and the composer
//! substitutes them into fragment text.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attributes attached to a plug or slot. Ordered so that anything derived
/// from them is deterministic.
pub type Attributes = BTreeMap<String, Value>;

/// The type of the snap an instance was installed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapType {
    App,
    Gadget,
    Kernel,
    Base,
    /// The core/OS snap. Declarations spell it `core`; older ones use `os`.
    #[serde(alias = "os")]
    Core,
    Snapd,
}

impl SnapType {
    /// Whether this type is the privileged system entity that hosts implicit
    /// and OS-reserved slots.
    pub fn is_system(self) -> bool {
        matches!(self, SnapType::Core | SnapType::Snapd)
    }

    /// Whether a declaration's `*-snap-type` entry of `self` accepts `actual`.
    /// `core` also covers the `snapd` snap, which hosts system slots on
    /// newer systems.
    pub fn accepts(self, actual: SnapType) -> bool {
        match self {
            SnapType::Core => actual.is_system(),
            other => other == actual,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SnapType::App => "app",
            SnapType::Gadget => "gadget",
            SnapType::Kernel => "kernel",
            SnapType::Base => "base",
            SnapType::Core => "core",
            SnapType::Snapd => "snapd",
        }
    }
}

impl fmt::Display for SnapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "app" => Ok(SnapType::App),
            "gadget" => Ok(SnapType::Gadget),
            "kernel" => Ok(SnapType::Kernel),
            "base" => Ok(SnapType::Base),
            "core" | "os" => Ok(SnapType::Core),
            "snapd" => Ok(SnapType::Snapd),
            other => Err(format!("unknown snap type: {}", other)),
        }
    }
}

/// Whether the system runs as an all-snap core device or as a classic
/// distribution with snaps on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformMode {
    Core,
    #[default]
    Classic,
}

impl PlatformMode {
    pub fn is_classic(self) -> bool {
        self == PlatformMode::Classic
    }
}

impl FromStr for PlatformMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "core" => Ok(PlatformMode::Core),
            "classic" => Ok(PlatformMode::Classic),
            other => Err(format!("unknown platform mode: {}", other)),
        }
    }
}

/// One installed application instance.
///
/// `name` is the instance id. Parallel installs carry a `_key` suffix
/// (`foo_bar` is instance `bar` of snap `foo`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub revision: String,
    pub snap_type: SnapType,
}

impl Instance {
    pub fn new(name: impl Into<String>, revision: impl Into<String>, snap_type: SnapType) -> Self {
        Self {
            name: name.into(),
            revision: revision.into(),
            snap_type,
        }
    }

    /// A regular application instance.
    pub fn app(name: impl Into<String>, revision: impl Into<String>) -> Self {
        Self::new(name, revision, SnapType::App)
    }

    /// The snap name without any parallel-install key.
    pub fn snap_name(&self) -> &str {
        self.name.split('_').next().unwrap_or(&self.name)
    }

    pub fn is_system(&self) -> bool {
        self.snap_type.is_system()
    }
}

/// Render an attribute value the way rule matching and templates see it:
/// strings bare, everything else as compact JSON.
pub fn attr_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A plug owned by an instance: the consumer end of an interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlugRef {
    pub instance: Instance,
    pub interface: String,
    #[serde(default)]
    pub attrs: Attributes,
}

/// A slot owned by an instance: the provider end of an interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRef {
    pub instance: Instance,
    pub interface: String,
    #[serde(default)]
    pub attrs: Attributes,
}

/// Identity of a plug or slot: owning instance name plus interface name.
/// Attributes are not part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    pub instance: String,
    pub interface: String,
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance, self.interface)
    }
}

impl PlugRef {
    pub fn new(instance: Instance, interface: impl Into<String>) -> Self {
        Self {
            instance,
            interface: interface.into(),
            attrs: Attributes::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            instance: self.instance.name.clone(),
            interface: self.interface.clone(),
        }
    }
}

impl SlotRef {
    pub fn new(instance: Instance, interface: impl Into<String>) -> Self {
        Self {
            instance,
            interface: interface.into(),
            attrs: Attributes::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            instance: self.instance.name.clone(),
            interface: self.interface.clone(),
        }
    }
}
