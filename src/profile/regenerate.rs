//! Profile regeneration and the hand-off to whatever installs profiles.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::composer::{PolicyComposer, ProfileSet};
use crate::connections::Connection;
use crate::instance::Instance;
use crate::interfaces::RegistryError;

/// A freshly composed profile set for one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdate {
    pub instance: Instance,

    /// Strictly increasing per instance
    pub generation: u64,

    pub profiles: ProfileSet,

    pub generated_at: DateTime<Utc>,
}

/// Receives every regenerated profile set.
///
/// `publish` is called while the instance's mutation lock is held, so
/// implementations should hand the update off rather than block on I/O.
pub trait ProfileSink: Send + Sync {
    fn publish(&self, update: ProfileUpdate);
}

/// In-memory sink keeping the latest update per instance.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    latest: DashMap<String, ProfileUpdate>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The latest update published for `instance`.
    pub fn latest(&self, instance: &str) -> Option<ProfileUpdate> {
        self.latest.get(instance).map(|u| u.value().clone())
    }

    pub fn generation(&self, instance: &str) -> Option<u64> {
        self.latest.get(instance).map(|u| u.generation)
    }

    /// Instances with at least one update, sorted.
    pub fn instances(&self) -> Vec<String> {
        let mut names: Vec<String> = self.latest.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl ProfileSink for MemoryProfileStore {
    fn publish(&self, update: ProfileUpdate) {
        match self.latest.entry(update.instance.name.clone()) {
            Entry::Occupied(mut stored) => {
                if update.generation > stored.get().generation {
                    stored.insert(update);
                } else {
                    tracing::debug!(
                        instance = %update.instance.name,
                        generation = update.generation,
                        stored = stored.get().generation,
                        "ignoring stale profile update"
                    );
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(update);
            }
        }
    }
}

/// Composes profiles and publishes them with a per-instance generation.
pub struct ProfileRegenerator {
    composer: PolicyComposer,
    sink: Arc<dyn ProfileSink>,
    generations: DashMap<String, u64>,
}

impl ProfileRegenerator {
    pub fn new(composer: PolicyComposer, sink: Arc<dyn ProfileSink>) -> Self {
        Self {
            composer,
            sink,
            generations: DashMap::new(),
        }
    }

    pub fn composer(&self) -> &PolicyComposer {
        &self.composer
    }

    /// Last generation published for `instance` (0 if never).
    pub fn generation(&self, instance: &str) -> u64 {
        self.generations.get(instance).map_or(0, |g| *g)
    }

    /// Compose `instance` from `connections` and publish the result.
    ///
    /// The caller must hold the instance's mutation lock and pass the
    /// connection table as it stands under that lock. Backend failures are
    /// logged and still published. Returns the new generation.
    pub fn regenerate(&self, instance: &Instance, connections: &[Connection]) -> Result<u64, RegistryError> {
        let profiles = self.composer.compose(instance, connections)?;

        let generation = {
            let mut counter = self.generations.entry(instance.name.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        for (backend, error) in profiles.failures() {
            tracing::warn!(
                instance = %instance.name,
                backend,
                error = %error,
                "backend failed to compose"
            );
        }
        tracing::info!(
            instance = %instance.name,
            generation,
            backends = profiles.len(),
            digest = %profiles.digest(),
            "regenerated profiles"
        );

        self.sink.publish(ProfileUpdate {
            instance: instance.clone(),
            generation,
            profiles,
            generated_at: Utc::now(),
        });
        Ok(generation)
    }
}

impl std::fmt::Debug for ProfileRegenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRegenerator")
            .field("composer", &self.composer)
            .field("instances", &self.generations.len())
            .finish()
    }
}
