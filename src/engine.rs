//! The assembled engine: registry, evaluator, connection state, composer
//! and resolver wired together from an [`EngineConfig`].

use std::sync::Arc;

use crate::config::{ConfigError, EngineConfig};
use crate::connections::{Connection, ConnectionResolver, ConnectionState, SlotCandidate};
use crate::errors::Result;
use crate::instance::{Attributes, Instance, PlugRef, SlotRef};
use crate::interfaces::{InterfaceRegistry, Side};
use crate::policy::{BaseDeclarationEvaluator, Evaluation};
use crate::profile::{BackendSet, PolicyComposer, ProfileRegenerator, ProfileSet, ProfileSink};

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    registry: Arc<InterfaceRegistry>,
    state: Arc<ConnectionState>,
    composer: PolicyComposer,
    resolver: ConnectionResolver,
}

impl Engine {
    /// Build the registry from the built-ins and catalog directories, then
    /// assemble the engine around it.
    pub fn from_config(config: EngineConfig, sink: Arc<dyn ProfileSink>) -> Result<Self> {
        let mut registry = if config.include_builtins {
            InterfaceRegistry::with_builtins()?
        } else {
            InterfaceRegistry::new()
        };
        for dir in &config.catalog_dirs {
            let count = registry.load_directory(dir)?;
            tracing::info!(dir = %dir.display(), count, "loaded interface catalog");
        }
        Self::with_registry(config, registry, sink)
    }

    /// Assemble the engine around an already populated registry.
    /// `config.include_builtins` and `config.catalog_dirs` are not consulted.
    pub fn with_registry(
        config: EngineConfig,
        registry: InterfaceRegistry,
        sink: Arc<dyn ProfileSink>,
    ) -> Result<Self> {
        let (backends, unknown) = BackendSet::with_enabled(&config.backends);
        if !unknown.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "backends".to_string(),
                reason: format!("unknown backend(s): {}", unknown.join(", ")),
            }
            .into());
        }

        let registry = Arc::new(registry);
        let mode = config.platform_mode;
        let state = Arc::new(ConnectionState::new());
        let composer = PolicyComposer::new(Arc::clone(&registry), Arc::new(backends), mode);
        let regenerator = Arc::new(ProfileRegenerator::new(composer.clone(), sink));
        let evaluator = BaseDeclarationEvaluator::new(Arc::clone(&registry), mode);
        let resolver = ConnectionResolver::new(evaluator, Arc::clone(&state), regenerator);

        tracing::info!(
            interfaces = registry.len(),
            mode = ?mode,
            backends = ?config.backends,
            "engine ready"
        );
        Ok(Self {
            config,
            registry,
            state,
            composer,
            resolver,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<InterfaceRegistry> {
        &self.registry
    }

    pub fn request_auto_connect(&self, plug: &PlugRef, candidates: &[SlotCandidate]) -> Result<Connection> {
        Ok(self.resolver.request_auto_connect(plug, candidates)?)
    }

    pub fn connect_manual(&self, plug: &PlugRef, slot: &SlotRef) -> Result<Connection> {
        Ok(self.resolver.connect_manual(plug, slot)?)
    }

    pub fn disconnect(&self, plug: &PlugRef) -> Result<Option<Connection>> {
        Ok(self.resolver.disconnect(plug)?)
    }

    /// Compose `instance` from the current connection table without
    /// publishing anything.
    pub fn compose(&self, instance: &Instance) -> Result<ProfileSet> {
        let connections = self.state.connections_of(&instance.name);
        Ok(self.composer.compose(instance, &connections)?)
    }

    /// Recompose and publish `instance`, e.g. the system instance at start-up
    /// so its implicit slots are in place before anything connects.
    pub fn regenerate(&self, instance: &Instance) -> Result<u64> {
        Ok(self.resolver.regenerate(instance)?)
    }

    pub fn evaluate_installation(
        &self,
        side: Side,
        interface: &str,
        instance: &Instance,
        attrs: &Attributes,
    ) -> Result<Evaluation> {
        Ok(self
            .resolver
            .evaluator()
            .evaluate_installation(side, interface, instance, attrs)?)
    }

    /// Like [`Engine::evaluate_installation`], but `Denied` is an error.
    pub fn require_installation(
        &self,
        side: Side,
        interface: &str,
        instance: &Instance,
        attrs: &Attributes,
    ) -> Result<Evaluation> {
        Ok(self
            .resolver
            .require_installation(side, interface, instance, attrs)?)
    }

    pub fn evaluate_connection(&self, plug: &PlugRef, slot: &SlotRef) -> Result<Evaluation> {
        Ok(self.resolver.evaluator().evaluate_connection(plug, slot)?)
    }

    pub fn connections_of(&self, instance: &str) -> Vec<Connection> {
        self.state.connections_of(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ConnectError;
    use crate::errors::Error;
    use crate::instance::{PlatformMode, SnapType};
    use crate::policy::Eligibility;
    use crate::profile::MemoryProfileStore;

    const CIFS: &str = "cifs-mount-control";

    fn core() -> Instance {
        Instance::new("core", "16", SnapType::Core)
    }

    fn engine(config: EngineConfig) -> (Engine, Arc<MemoryProfileStore>) {
        let store = Arc::new(MemoryProfileStore::new());
        let engine = Engine::from_config(config, store.clone()).unwrap();
        (engine, store)
    }

    #[test]
    fn test_cifs_end_to_end() {
        let (engine, store) = engine(EngineConfig {
            platform_mode: PlatformMode::Core,
            ..EngineConfig::default()
        });
        let app = Instance::app("foo", "12");
        let plug = PlugRef::new(app.clone(), CIFS);
        let rogue_slot = SlotRef::new(Instance::app("rogue", "1"), CIFS);
        let core_slot = SlotRef::new(core(), CIFS);

        assert_eq!(
            engine.evaluate_connection(&plug, &rogue_slot).unwrap().eligibility,
            Eligibility::Denied
        );
        assert_eq!(
            engine.evaluate_connection(&plug, &core_slot).unwrap().eligibility,
            Eligibility::RequiresManualConsent
        );

        let candidates = vec![SlotCandidate::new(core_slot.clone())];
        assert!(matches!(
            engine.request_auto_connect(&plug, &candidates),
            Err(Error::Connect(ConnectError::NoEligibleSlot { .. }))
        ));

        engine.connect_manual(&plug, &core_slot).unwrap();
        let composed = engine.compose(&app).unwrap();
        assert_eq!(composed, store.latest("foo").unwrap().profiles);
        let seccomp = &composed.profile("seccomp").unwrap().text;
        assert!(seccomp.ends_with("mount\numount\n"));

        assert!(engine.disconnect(&plug).unwrap().is_some());
        assert!(engine.disconnect(&plug).unwrap().is_none());
        assert!(engine.compose(&app).unwrap().is_empty());
    }

    #[test]
    fn test_catalog_and_implicit_regeneration() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hostname.yaml"),
            r#"
interface:
  name: hostname-control
  implicit-on-classic: true
  fragments:
    - backend: apparmor
      side: slot
      scope: permanent
      text: "/etc/hostname r,"
"#,
        )
        .unwrap();

        let (engine, store) = engine(EngineConfig {
            catalog_dirs: vec![dir.path().to_path_buf()],
            ..EngineConfig::default()
        });
        assert_eq!(engine.registry().len(), 2);
        assert_eq!(engine.registry().position("hostname-control"), Some(1));

        assert_eq!(engine.regenerate(&core()).unwrap(), 1);
        let apparmor = store.latest("core").unwrap().profiles;
        assert!(apparmor.profile("apparmor").unwrap().text.contains("/etc/hostname r,"));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let store = Arc::new(MemoryProfileStore::new());
        let config = EngineConfig {
            backends: vec!["dbus".to_string()],
            ..EngineConfig::default()
        };
        assert!(matches!(
            Engine::from_config(config, store),
            Err(Error::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_disabled_backend_is_unavailable() {
        let (engine, _) = engine(EngineConfig {
            platform_mode: PlatformMode::Core,
            backends: vec!["seccomp".to_string()],
            ..EngineConfig::default()
        });
        let app = Instance::app("foo", "1");
        engine
            .connect_manual(&PlugRef::new(app.clone(), CIFS), &SlotRef::new(core(), CIFS))
            .unwrap();

        let set = engine.compose(&app).unwrap();
        assert!(set.profile("seccomp").is_some());
        assert!(set.get("apparmor").unwrap().is_err());
    }

    #[test]
    fn test_require_installation_denied() {
        let (engine, _) = engine(EngineConfig::default());
        let err = engine
            .require_installation(Side::Slot, CIFS, &Instance::app("rogue", "1"), &Attributes::new())
            .unwrap_err();
        assert!(matches!(err, Error::Connect(ConnectError::Denied { .. })));
        assert_eq!(
            engine
                .evaluate_installation(Side::Plug, CIFS, &Instance::app("foo", "1"), &Attributes::new())
                .unwrap()
                .eligibility,
            Eligibility::Allowed
        );
    }
}
