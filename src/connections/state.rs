//! The connection table and per-instance mutation locks.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};

use crate::instance::{EndpointKey, PlugRef, SlotRef};

/// An established link between a plug and a slot of the same interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub plug: PlugRef,
    pub slot: SlotRef,
}

impl Connection {
    pub fn new(plug: PlugRef, slot: SlotRef) -> Self {
        Self { plug, slot }
    }

    pub fn interface(&self) -> &str {
        &self.plug.interface
    }

    /// Whether `instance` owns either end.
    pub fn involves(&self, instance: &str) -> bool {
        self.plug.instance.name == instance || self.slot.instance.name == instance
    }

    /// Same plug and slot identity, ignoring attributes.
    pub fn same_endpoints(&self, plug: &PlugRef, slot: &SlotRef) -> bool {
        self.plug.key() == plug.key() && self.slot.key() == slot.key()
    }
}

/// Connection table keyed by plug identity. A plug has at most one
/// connection; a slot can appear in many.
///
/// Reads take the table's read lock only. Mutations must be made while the
/// instance locks of both endpoints are held (see
/// [`ConnectionState::with_instances_locked`]).
#[derive(Debug, Default)]
pub struct ConnectionState {
    table: RwLock<BTreeMap<EndpointKey, Connection>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The connection of a plug, if it has one.
    pub fn get(&self, plug: &EndpointKey) -> Option<Connection> {
        self.table.read().get(plug).cloned()
    }

    /// Every connection with `instance` on either end, in plug key order.
    pub fn connections_of(&self, instance: &str) -> Vec<Connection> {
        self.table
            .read()
            .values()
            .filter(|c| c.involves(instance))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Connection> {
        self.table.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    pub(crate) fn insert(&self, connection: Connection) -> Option<Connection> {
        self.table.write().insert(connection.plug.key(), connection)
    }

    pub(crate) fn remove(&self, plug: &EndpointKey) -> Option<Connection> {
        self.table.write().remove(plug)
    }

    /// Run `f` holding the mutation locks of every named instance.
    ///
    /// Locks are taken in sorted name order, so two callers locking the same
    /// pair in opposite orders cannot deadlock. Duplicate names lock once.
    pub fn with_instances_locked<R>(&self, instances: &[&str], f: impl FnOnce() -> R) -> R {
        let mut names = instances.to_vec();
        names.sort_unstable();
        names.dedup();

        // Clone the Arcs first so no DashMap shard guard is held while blocking.
        let locks: Vec<Arc<Mutex<()>>> = names.iter().map(|n| self.instance_lock(n)).collect();
        let _guards: Vec<MutexGuard<'_, ()>> = locks.iter().map(|l| l.lock()).collect();
        f()
    }

    fn instance_lock(&self, instance: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(instance.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
