//! Connection resolution: auto-connect, manual connect and disconnect.
//!
//! Every mutation runs under the mutation locks of both endpoint instances
//! and regenerates both instances' profiles before the locks are released.

use std::sync::Arc;

use thiserror::Error;

use super::state::{Connection, ConnectionState};
use crate::instance::{Attributes, EndpointKey, Instance, PlugRef, SlotRef};
use crate::interfaces::{RegistryError, Side};
use crate::policy::{BaseDeclarationEvaluator, Eligibility, Evaluation};
use crate::profile::ProfileRegenerator;

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("{target} denied: {reason}")]
    Denied {
        target: String,
        rule: Option<String>,
        reason: String,
    },

    #[error("No eligible slot for {plug} among {considered} candidate(s)")]
    NoEligibleSlot { plug: EndpointKey, considered: usize },

    #[error("Connecting {plug} to {slot} is forbidden: {reason}")]
    Forbidden {
        plug: EndpointKey,
        slot: EndpointKey,
        rule: Option<String>,
        reason: String,
    },

    #[error("Plug {plug} is already connected to {slot}")]
    AlreadyConnected { plug: EndpointKey, slot: EndpointKey },

    #[error("Plug interface {plug} does not match slot interface {slot}")]
    InterfaceMismatch { plug: String, slot: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A slot offered to an auto-connecting plug.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotCandidate {
    pub slot: SlotRef,

    /// Lower is preferred. Candidates without one follow, in given order.
    pub preference: Option<u32>,
}

impl SlotCandidate {
    pub fn new(slot: SlotRef) -> Self {
        Self {
            slot,
            preference: None,
        }
    }

    pub fn with_preference(mut self, preference: u32) -> Self {
        self.preference = Some(preference);
        self
    }
}

impl From<SlotRef> for SlotCandidate {
    fn from(slot: SlotRef) -> Self {
        Self::new(slot)
    }
}

/// Decides and applies connections.
#[derive(Debug, Clone)]
pub struct ConnectionResolver {
    evaluator: BaseDeclarationEvaluator,
    state: Arc<ConnectionState>,
    regenerator: Arc<ProfileRegenerator>,
}

impl ConnectionResolver {
    pub fn new(
        evaluator: BaseDeclarationEvaluator,
        state: Arc<ConnectionState>,
        regenerator: Arc<ProfileRegenerator>,
    ) -> Self {
        Self {
            evaluator,
            state,
            regenerator,
        }
    }

    pub fn evaluator(&self) -> &BaseDeclarationEvaluator {
        &self.evaluator
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    /// Connect `plug` to the first candidate whose evaluation is `Allowed`.
    ///
    /// Candidates are tried by explicit preference, then in the given order.
    /// Candidates needing manual consent are skipped, as are denied ones.
    pub fn request_auto_connect(
        &self,
        plug: &PlugRef,
        candidates: &[SlotCandidate],
    ) -> Result<Connection, ConnectError> {
        if let Some(existing) = self.state.get(&plug.key()) {
            return Err(ConnectError::AlreadyConnected {
                plug: plug.key(),
                slot: existing.slot.key(),
            });
        }

        let mut ordered: Vec<&SlotCandidate> = candidates
            .iter()
            .filter(|c| c.slot.interface == plug.interface)
            .collect();
        ordered.sort_by_key(|c| c.preference.map_or((1, 0), |p| (0, p)));

        for candidate in &ordered {
            let evaluation = self.evaluator.evaluate_connection(plug, &candidate.slot)?;
            tracing::debug!(
                plug = %plug.key(),
                slot = %candidate.slot.key(),
                eligibility = %evaluation.eligibility,
                "auto-connect candidate"
            );
            if evaluation.eligibility == Eligibility::Allowed {
                return self.establish(plug, &candidate.slot);
            }
        }

        tracing::info!(
            plug = %plug.key(),
            considered = ordered.len(),
            "no eligible slot for auto-connect"
        );
        Err(ConnectError::NoEligibleSlot {
            plug: plug.key(),
            considered: ordered.len(),
        })
    }

    /// Connect `plug` to `slot` on explicit request.
    ///
    /// Succeeds for `Allowed` and `RequiresManualConsent`; fails with
    /// `Forbidden` when the pair is `Denied`. Connecting an already
    /// connected pair again returns the existing connection.
    pub fn connect_manual(&self, plug: &PlugRef, slot: &SlotRef) -> Result<Connection, ConnectError> {
        if plug.interface != slot.interface {
            return Err(ConnectError::InterfaceMismatch {
                plug: plug.interface.clone(),
                slot: slot.interface.clone(),
            });
        }

        let evaluation = self.evaluator.evaluate_connection(plug, slot)?;
        if evaluation.is_denied() {
            tracing::info!(
                plug = %plug.key(),
                slot = %slot.key(),
                rule = ?evaluation.rule_name,
                "manual connection forbidden"
            );
            return Err(ConnectError::Forbidden {
                plug: plug.key(),
                slot: slot.key(),
                rule: evaluation.rule_name,
                reason: evaluation.reason,
            });
        }

        self.establish(plug, slot)
    }

    /// Remove the connection of `plug`, if any.
    ///
    /// Disconnecting an unconnected plug is a no-op returning `None`.
    pub fn disconnect(&self, plug: &PlugRef) -> Result<Option<Connection>, ConnectError> {
        let key = plug.key();
        loop {
            let Some(current) = self.state.get(&key) else {
                return Ok(None);
            };
            let slot_instance = current.slot.instance.name.clone();

            let outcome = self.state.with_instances_locked(
                &[plug.instance.name.as_str(), slot_instance.as_str()],
                || -> Result<Option<Option<Connection>>, ConnectError> {
                    match self.state.get(&key) {
                        None => Ok(Some(None)),
                        // Reconnected elsewhere between the read and the lock.
                        Some(c) if c.slot.instance.name != slot_instance => Ok(None),
                        Some(_) => {
                            let removed = self.state.remove(&key);
                            if let Some(conn) = &removed {
                                self.regenerate_locked(&[&conn.plug.instance, &conn.slot.instance])?;
                                tracing::info!(
                                    plug = %conn.plug.key(),
                                    slot = %conn.slot.key(),
                                    "disconnected"
                                );
                            }
                            Ok(Some(removed))
                        }
                    }
                },
            )?;

            if let Some(result) = outcome {
                return Ok(result);
            }
        }
    }

    /// Regenerate one instance's profiles from the current table.
    pub fn regenerate(&self, instance: &Instance) -> Result<u64, ConnectError> {
        self.state.with_instances_locked(&[instance.name.as_str()], || -> Result<u64, ConnectError> {
            let connections = self.state.connections_of(&instance.name);
            Ok(self.regenerator.regenerate(instance, &connections)?)
        })
    }

    /// Evaluate installation and fail with `Denied` unless it is allowed.
    pub fn require_installation(
        &self,
        side: Side,
        interface: &str,
        instance: &Instance,
        attrs: &Attributes,
    ) -> Result<Evaluation, ConnectError> {
        let evaluation = self.evaluator.evaluate_installation(side, interface, instance, attrs)?;
        if evaluation.is_denied() {
            return Err(ConnectError::Denied {
                target: format!("{} {} on {}", interface, side, instance.name),
                rule: evaluation.rule_name,
                reason: evaluation.reason,
            });
        }
        Ok(evaluation)
    }

    pub fn connections_of(&self, instance: &str) -> Vec<Connection> {
        self.state.connections_of(instance)
    }

    fn establish(&self, plug: &PlugRef, slot: &SlotRef) -> Result<Connection, ConnectError> {
        self.state
            .with_instances_locked(&[plug.instance.name.as_str(), slot.instance.name.as_str()], || {
                if let Some(existing) = self.state.get(&plug.key()) {
                    if existing.same_endpoints(plug, slot) {
                        tracing::debug!(plug = %plug.key(), slot = %slot.key(), "already connected");
                        return Ok(existing);
                    }
                    return Err(ConnectError::AlreadyConnected {
                        plug: plug.key(),
                        slot: existing.slot.key(),
                    });
                }

                let connection = Connection::new(plug.clone(), slot.clone());
                self.state.insert(connection.clone());
                if let Err(e) = self.regenerate_locked(&[&plug.instance, &slot.instance]) {
                    self.state.remove(&plug.key());
                    return Err(e);
                }

                tracing::info!(plug = %plug.key(), slot = %slot.key(), "connected");
                Ok(connection)
            })
    }

    /// Caller holds the locks of every instance in `instances`.
    fn regenerate_locked(&self, instances: &[&Instance]) -> Result<(), ConnectError> {
        for (i, instance) in instances.iter().enumerate() {
            if instances[..i].iter().any(|seen| seen.name == instance.name) {
                continue;
            }
            let connections = self.state.connections_of(&instance.name);
            self.regenerator.regenerate(instance, &connections)?;
        }
        Ok(())
    }
}
