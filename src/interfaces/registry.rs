//! Interface Registry: the catalog of every known interface.
//!
//! The registry is filled from:
//! 1. Built-in interfaces (compiled into the binary)
//! 2. YAML catalog files
//! 3. Programmatically registered definitions
//!
//! Population happens once, before the registry is shared. Every mutating
//! method takes `&mut self`; once wrapped in an `Arc` the registry is
//! read-only and needs no locking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::definition::InterfaceDefinition;
use crate::policy::declaration::{BaseDeclaration, DeclarationError};

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Interface already registered: {name}")]
    DuplicateName { name: String },

    #[error("Interface not found: {name}")]
    NotFound { name: String },

    #[error("Invalid base declaration for {name}: {source}")]
    InvalidDeclaration {
        name: String,
        #[source]
        source: DeclarationError,
    },

    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A registered interface: its definition plus the parsed base declaration.
#[derive(Debug, Clone)]
struct Entry {
    definition: InterfaceDefinition,
    declaration: BaseDeclaration,
}

/// The interface registry.
///
/// Holds definitions in registration order, indexed by name.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    /// Entries in registration order
    entries: Vec<Entry>,

    /// Name → position in `entries`
    index: HashMap<String, usize>,
}

impl InterfaceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in catalog.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut reg = Self::new();
        reg.register_all(super::builtin::definitions())?;
        Ok(reg)
    }

    /// Register one definition.
    ///
    /// Fails if the name is taken or either base-declaration text is invalid.
    pub fn register(&mut self, definition: InterfaceDefinition) -> Result<(), RegistryError> {
        if self.index.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateName {
                name: definition.name,
            });
        }

        let declaration = BaseDeclaration::parse(
            &definition.name,
            &definition.base_declaration_plugs,
            &definition.base_declaration_slots,
        )
        .map_err(|source| RegistryError::InvalidDeclaration {
            name: definition.name.clone(),
            source,
        })?;

        log::debug!("Registered interface {}", definition.name);
        self.index.insert(definition.name.clone(), self.entries.len());
        self.entries.push(Entry {
            definition,
            declaration,
        });
        Ok(())
    }

    /// Register a batch of definitions, stopping at the first failure.
    pub fn register_all(
        &mut self,
        definitions: impl IntoIterator<Item = InterfaceDefinition>,
    ) -> Result<usize, RegistryError> {
        let mut count = 0;
        for definition in definitions {
            self.register(definition)?;
            count += 1;
        }
        Ok(count)
    }

    /// Register every definition in a YAML file.
    /// The file can contain a single `interface:` or an `interfaces:` list.
    pub fn register_from_file(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let yaml_err = |source| RegistryError::Yaml {
            path: path.to_path_buf(),
            source,
        };
        let document: serde_yaml::Value = serde_yaml::from_str(&content).map_err(yaml_err)?;

        // A top-level `interface` key commits the file to the single form, so
        // its parse error is the one reported.
        if document.get("interface").is_some() {
            let def = InterfaceDefinition::from_yaml(&content).map_err(yaml_err)?;
            self.register(def)?;
            return Ok(1);
        }

        let list: InterfaceListWrapper = serde_yaml::from_value(document).map_err(yaml_err)?;
        self.register_all(list.interfaces)
    }

    /// Load all catalog YAML files from a directory (recursive).
    ///
    /// Files are visited in sorted path order so registration order, and with
    /// it composition order, does not depend on the filesystem. A bad file
    /// aborts the load: silently skipping an interface would change policy.
    pub fn load_directory(&mut self, dir: &Path) -> Result<usize, RegistryError> {
        if !dir.exists() {
            log::info!("Interface catalog {} does not exist, skipping", dir.display());
            return Ok(0);
        }

        let io_err = |source| RegistryError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            paths.push(entry.map_err(io_err)?.path());
        }
        paths.sort();

        let mut count = 0;
        for path in paths {
            if path.is_dir() {
                count += self.load_directory(&path)?;
            } else if path
                .extension()
                .map_or(false, |ext| ext == "yaml" || ext == "yml")
            {
                match self.register_from_file(&path) {
                    Ok(n) => count += n,
                    Err(e) => {
                        log::warn!("Failed to load interfaces from {}: {}", path.display(), e);
                        return Err(e);
                    }
                }
            }
        }

        Ok(count)
    }

    /// Look up a definition by name.
    pub fn lookup(&self, name: &str) -> Result<&InterfaceDefinition, RegistryError> {
        self.entry(name).map(|e| &e.definition)
    }

    /// Look up the parsed base declaration of an interface.
    pub fn declaration(&self, name: &str) -> Result<&BaseDeclaration, RegistryError> {
        self.entry(name).map(|e| &e.declaration)
    }

    /// Registration index of an interface, used to order composition.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// All definitions in registration order.
    pub fn all(&self) -> impl Iterator<Item = &InterfaceDefinition> + '_ {
        self.entries.iter().map(|e| &e.definition)
    }

    /// Definitions whose slot is implicit in the given platform mode.
    pub fn implicit(
        &self,
        mode: crate::instance::PlatformMode,
    ) -> impl Iterator<Item = &InterfaceDefinition> + '_ {
        self.all().filter(move |def| def.is_implicit_in(mode))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Get the total number of registered interfaces.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, name: &str) -> Result<&Entry, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }
}

/// Wrapper for YAML list of definitions
#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct InterfaceListWrapper {
    interfaces: Vec<InterfaceDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::PlatformMode;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = InterfaceRegistry::new();
        registry
            .register(InterfaceDefinition::new("network").with_summary("network access"))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("network").unwrap().summary, "network access");
        assert!(matches!(
            registry.lookup("home"),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = InterfaceRegistry::new();
        registry.register(InterfaceDefinition::new("x")).unwrap();
        let err = registry.register(InterfaceDefinition::new("x")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName { ref name } if name == "x"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_declaration_rejected() {
        let mut registry = InterfaceRegistry::new();
        let def = InterfaceDefinition::new("x").with_slot_rules("y:\n  allow-installation: true\n");
        let err = registry.register(def).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDeclaration { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_all_is_registration_order_and_restartable() {
        let mut registry = InterfaceRegistry::new();
        registry
            .register_all(["zeta", "alpha", "mid"].map(InterfaceDefinition::new))
            .unwrap();

        let names: Vec<&str> = registry.all().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.all().count(), 3);
        assert_eq!(registry.position("alpha"), Some(1));
    }

    #[test]
    fn test_implicit_filter() {
        let mut registry = InterfaceRegistry::new();
        registry
            .register_all(vec![
                InterfaceDefinition::new("both").implicit(true, true),
                InterfaceDefinition::new("classic-only").implicit(false, true),
                InterfaceDefinition::new("none"),
            ])
            .unwrap();

        let core: Vec<&str> = registry
            .implicit(PlatformMode::Core)
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(core, vec!["both"]);
        assert_eq!(registry.implicit(PlatformMode::Classic).count(), 2);
    }

    #[test]
    fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            r#"
interfaces:
  - name: second
  - name: third
    implicit-on-core: true
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("a.yml"), "interface:\n  name: first\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut registry = InterfaceRegistry::new();
        let count = registry.load_directory(dir.path()).unwrap();
        assert_eq!(count, 3);

        let names: Vec<&str> = registry.all().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_load_directory_fails_on_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.yaml"), "interfaces: 12\n").unwrap();

        let mut registry = InterfaceRegistry::new();
        assert!(matches!(
            registry.load_directory(dir.path()),
            Err(RegistryError::Yaml { .. })
        ));
    }

    #[test]
    fn test_load_directory_rejects_misspelled_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("block.yaml"),
            "interface:\n  name: block-devices\n  reserved-for-0s: true\n",
        )
        .unwrap();

        let mut registry = InterfaceRegistry::new();
        assert!(matches!(
            registry.load_directory(dir.path()),
            Err(RegistryError::Yaml { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_misspelled_fragment_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frag.yaml");
        std::fs::write(
            &path,
            r#"
interfaces:
  - name: kernel-module-control
    fragments:
      - backend: kmod
        sdie: plug
        scope: connected
        text: cifs
"#,
        )
        .unwrap();

        let mut registry = InterfaceRegistry::new();
        let err = registry.register_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("sdie"), "{}", err);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_single_definition_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.yaml");
        std::fs::write(&path, "interface:\n  name: block-devices\n  implicit-on-kore: true\n")
            .unwrap();

        let mut registry = InterfaceRegistry::new();
        let message = registry.register_from_file(&path).unwrap_err().to_string();
        assert!(message.contains("implicit-on-kore"), "{}", message);
        assert!(!message.contains("missing field `interfaces`"), "{}", message);
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let mut registry = InterfaceRegistry::new();
        let count = registry
            .load_directory(Path::new("/nonexistent/ifacepolicy/catalog"))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_with_builtins() {
        let registry = InterfaceRegistry::with_builtins().unwrap();
        let cifs = registry.lookup("cifs-mount-control").unwrap();
        assert!(cifs.reserved_for_os);
        assert!(cifs.implicit_on_core && cifs.implicit_on_classic);
    }
}
