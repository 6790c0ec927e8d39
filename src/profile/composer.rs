//! Policy composition: instance + connections → one profile per backend.
//!
//! Fragments are collected and ordered by
//! 1. interface registration order
//! 2. plug before slot
//! 3. permanent before connected
//! 4. peer key, for several connections on the same interface and side
//!
//! then substituted and handed to each backend's renderer. Nothing is
//! deduplicated: two interfaces granting the same rule both contribute it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::backend::{BackendSet, Snippet};
use super::template::{substitute, TemplateContext, TemplateError};
use crate::connections::Connection;
use crate::instance::{Attributes, EndpointKey, Instance, PlatformMode};
use crate::interfaces::{InterfaceDefinition, InterfaceRegistry, RegistryError, Scope, Side};

/// Per-backend composition failures. Each one affects only its own backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("No renderer registered for backend {backend}")]
    BackendUnavailable { backend: String },

    #[error("Unresolved placeholder {placeholder} in {interface} fragment for backend {backend}")]
    UnresolvedPlaceholder {
        backend: String,
        interface: String,
        placeholder: String,
    },

    #[error("Attribute for {placeholder} in {interface} fragment for backend {backend}: {reason}")]
    InvalidAttributeValue {
        backend: String,
        interface: String,
        placeholder: String,
        reason: String,
    },
}

/// The rendered text for one backend of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub backend: String,
    pub text: String,
}

/// All backend outcomes for one instance, keyed by backend name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileSet {
    pub instance: String,
    entries: BTreeMap<String, Result<Profile, ComposeError>>,
}

impl ProfileSet {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, backend: &str) -> Option<&Result<Profile, ComposeError>> {
        self.entries.get(backend)
    }

    /// The successfully rendered profile of `backend`, if any.
    pub fn profile(&self, backend: &str) -> Option<&Profile> {
        self.entries.get(backend).and_then(|r| r.as_ref().ok())
    }

    /// Outcomes in backend name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Result<Profile, ComposeError>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ComposeError)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().err().map(|e| (k.as_str(), e)))
    }

    /// True when every backend rendered.
    pub fn is_complete(&self) -> bool {
        self.entries.values().all(|r| r.is_ok())
    }

    pub fn backends(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// SHA-256 over the successful profiles in backend order, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (backend, result) in &self.entries {
            if let Ok(profile) = result {
                hasher.update(backend.as_bytes());
                hasher.update([0u8]);
                hasher.update(profile.text.as_bytes());
                hasher.update([0u8]);
            }
        }
        hex::encode(hasher.finalize())
    }

    fn insert(&mut self, backend: String, result: Result<Profile, ComposeError>) {
        self.entries.insert(backend, result);
    }
}

/// One interface side contributing fragments of one scope.
struct Contribution<'a> {
    position: usize,
    side: Side,
    scope: Scope,
    peer: Option<EndpointKey>,
    definition: &'a InterfaceDefinition,
    plug_attrs: Option<&'a Attributes>,
    slot_attrs: Option<&'a Attributes>,
}

impl Contribution<'_> {
    fn order(&self) -> (usize, Side, Scope, Option<&EndpointKey>) {
        (self.position, self.side, self.scope, self.peer.as_ref())
    }
}

/// Builds profile sets. Stateless apart from its shared, read-only inputs.
#[derive(Debug, Clone)]
pub struct PolicyComposer {
    registry: Arc<InterfaceRegistry>,
    backends: Arc<BackendSet>,
    mode: PlatformMode,
}

impl PolicyComposer {
    pub fn new(registry: Arc<InterfaceRegistry>, backends: Arc<BackendSet>, mode: PlatformMode) -> Self {
        Self {
            registry,
            backends,
            mode,
        }
    }

    /// Compose the profiles of `instance`.
    ///
    /// `connections` may include connections of other instances; only those
    /// with `instance` on either end contribute. Fails only if a connection
    /// names an interface the registry does not know.
    pub fn compose(&self, instance: &Instance, connections: &[Connection]) -> Result<ProfileSet, RegistryError> {
        let no_attrs = Attributes::new();
        let mut contributions = Vec::new();
        let mut permanent: HashSet<(usize, Side)> = HashSet::new();

        for conn in connections {
            let interface = conn.plug.interface.as_str();
            let definition = self.registry.lookup(interface)?;
            let position = self.registry.position(interface).unwrap_or(usize::MAX);

            let mut sides = Vec::with_capacity(2);
            if conn.plug.instance.name == instance.name {
                sides.push((Side::Plug, conn.slot.key()));
            }
            if conn.slot.instance.name == instance.name {
                sides.push((Side::Slot, conn.plug.key()));
            }

            for (side, peer) in sides {
                if permanent.insert((position, side)) {
                    let (plug_attrs, slot_attrs) = match side {
                        Side::Plug => (Some(&conn.plug.attrs), None),
                        Side::Slot => (None, Some(&conn.slot.attrs)),
                    };
                    contributions.push(Contribution {
                        position,
                        side,
                        scope: Scope::Permanent,
                        peer: None,
                        definition,
                        plug_attrs,
                        slot_attrs,
                    });
                }
                contributions.push(Contribution {
                    position,
                    side,
                    scope: Scope::Connected,
                    peer: Some(peer),
                    definition,
                    plug_attrs: Some(&conn.plug.attrs),
                    slot_attrs: Some(&conn.slot.attrs),
                });
            }
        }

        // The system instance hosts the slots of implicit interfaces.
        if instance.is_system() {
            for definition in self.registry.implicit(self.mode) {
                let position = self.registry.position(&definition.name).unwrap_or(usize::MAX);
                if permanent.insert((position, Side::Slot)) {
                    contributions.push(Contribution {
                        position,
                        side: Side::Slot,
                        scope: Scope::Permanent,
                        peer: None,
                        definition,
                        plug_attrs: None,
                        slot_attrs: Some(&no_attrs),
                    });
                }
            }
        }

        contributions.sort_by(|a, b| a.order().cmp(&b.order()));

        let mut pending: BTreeMap<String, Result<Vec<Snippet>, ComposeError>> = BTreeMap::new();
        for contribution in &contributions {
            let ctx = TemplateContext {
                instance,
                plug_attrs: contribution.plug_attrs,
                slot_attrs: contribution.slot_attrs,
            };
            let definition = contribution.definition;
            for fragment in definition.fragments_for(contribution.side, contribution.scope) {
                let entry = pending
                    .entry(fragment.backend.clone())
                    .or_insert_with(|| Ok(Vec::new()));
                if entry.is_err() {
                    continue;
                }
                match substitute(&fragment.text, &ctx) {
                    Ok(text) => {
                        if let Ok(snippets) = entry {
                            snippets.push(Snippet {
                                interface: definition.name.clone(),
                                side: contribution.side,
                                scope: contribution.scope,
                                text,
                            });
                        }
                    }
                    Err(TemplateError::Unresolved(placeholder)) => {
                        *entry = Err(ComposeError::UnresolvedPlaceholder {
                            backend: fragment.backend.clone(),
                            interface: definition.name.clone(),
                            placeholder,
                        });
                    }
                    Err(TemplateError::InvalidValue { placeholder, reason }) => {
                        *entry = Err(ComposeError::InvalidAttributeValue {
                            backend: fragment.backend.clone(),
                            interface: definition.name.clone(),
                            placeholder,
                            reason,
                        });
                    }
                }
            }
        }

        let mut set = ProfileSet::new(instance.name.clone());
        for (backend, snippets) in pending {
            let result = match (self.backends.get(&backend), snippets) {
                (_, Err(e)) => Err(e),
                (None, Ok(_)) => Err(ComposeError::BackendUnavailable {
                    backend: backend.clone(),
                }),
                (Some(renderer), Ok(snippets)) => Ok(Profile {
                    backend: backend.clone(),
                    text: renderer.render(instance, &snippets),
                }),
            };
            set.insert(backend, result);
        }

        tracing::debug!(
            instance = %instance.name,
            contributions = contributions.len(),
            backends = ?set.backends(),
            "composed profiles"
        );
        Ok(set)
    }
}
