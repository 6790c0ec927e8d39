//! Backend renderers: turn ordered fragments into one backend's profile text.
//!
//! The composer decides *which* fragments apply and in *what order*; a
//! renderer only frames them in the syntax its enforcement mechanism reads.
//! Renderers must be pure: the same snippets always give the same bytes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::instance::Instance;
use crate::interfaces::{Scope, Side, BACKEND_APPARMOR, BACKEND_KMOD, BACKEND_SECCOMP, BACKEND_UDEV};

/// One substituted fragment, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub interface: String,
    pub side: Side,
    pub scope: Scope,
    pub text: String,
}

/// Renders one backend's profile.
pub trait BackendRenderer: Send + Sync {
    /// Backend identifier matching `PolicyFragment::backend`
    fn name(&self) -> &str;

    /// Render the snippets, already in precedence order, for `instance`.
    fn render(&self, instance: &Instance, snippets: &[Snippet]) -> String;
}

/// Rule-block backends (AppArmor, udev): a header, then each snippet under a
/// comment naming its interface.
#[derive(Debug, Clone)]
pub struct AnnotatedRenderer {
    name: String,
    title: String,
}

impl AnnotatedRenderer {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
        }
    }

    pub fn apparmor() -> Self {
        Self::new(BACKEND_APPARMOR, "AppArmor policy")
    }

    pub fn udev() -> Self {
        Self::new(BACKEND_UDEV, "udev rules")
    }
}

impl BackendRenderer for AnnotatedRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self, instance: &Instance, snippets: &[Snippet]) -> String {
        let mut out = format!("# {} for snap.{}\n", self.title, instance.name);
        for snippet in snippets {
            out.push_str(&format!(
                "\n# {} ({} {})\n",
                snippet.interface,
                scope_label(snippet.scope),
                snippet.side
            ));
            out.push_str(snippet.text.trim_matches('\n'));
            out.push('\n');
        }
        out
    }
}

/// Line-list backends (seccomp, kmod): one entry per line, blank lines
/// dropped. Entries are never deduplicated, so two interfaces naming the
/// same syscall both appear.
#[derive(Debug, Clone)]
pub struct LineListRenderer {
    name: String,
    title: String,
    keep_comments: bool,
}

impl LineListRenderer {
    pub fn new(name: impl Into<String>, title: impl Into<String>, keep_comments: bool) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            keep_comments,
        }
    }

    pub fn seccomp() -> Self {
        Self::new(BACKEND_SECCOMP, "Seccomp policy", true)
    }

    pub fn kmod() -> Self {
        Self::new(BACKEND_KMOD, "Kernel modules", false)
    }
}

impl BackendRenderer for LineListRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self, instance: &Instance, snippets: &[Snippet]) -> String {
        let mut out = format!("# {} for snap.{}\n", self.title, instance.name);
        for snippet in snippets {
            for line in snippet.text.lines().map(str::trim) {
                if line.is_empty() || (!self.keep_comments && line.starts_with('#')) {
                    continue;
                }
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

fn scope_label(scope: Scope) -> &'static str {
    match scope {
        Scope::Permanent => "permanent",
        Scope::Connected => "connected",
    }
}

/// The renderers available to the composer, keyed by backend name.
#[derive(Clone, Default)]
pub struct BackendSet {
    renderers: BTreeMap<String, Arc<dyn BackendRenderer>>,
}

impl BackendSet {
    /// Create an empty set. Every backend will be unavailable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set with all built-in renderers registered.
    pub fn with_defaults() -> Self {
        let mut set = Self::new();
        set.register(Arc::new(AnnotatedRenderer::apparmor()));
        set.register(Arc::new(LineListRenderer::seccomp()));
        set.register(Arc::new(AnnotatedRenderer::udev()));
        set.register(Arc::new(LineListRenderer::kmod()));
        set
    }

    /// Built-in renderers restricted to `names`. Unknown names are ignored
    /// and reported by the returned list.
    pub fn with_enabled(names: &[String]) -> (Self, Vec<String>) {
        let defaults = Self::with_defaults();
        let mut set = Self::new();
        let mut unknown = Vec::new();
        for name in names {
            match defaults.get(name) {
                Some(renderer) => set.register(renderer),
                None => unknown.push(name.clone()),
            }
        }
        (set, unknown)
    }

    /// Register (or replace) a renderer under its own name.
    pub fn register(&mut self, renderer: Arc<dyn BackendRenderer>) {
        self.renderers.insert(renderer.name().to_string(), renderer);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BackendRenderer>> {
        self.renderers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.renderers.keys().map(|s| s.as_str()).collect()
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSet")
            .field("renderers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(interface: &str, text: &str) -> Snippet {
        Snippet {
            interface: interface.to_string(),
            side: Side::Plug,
            scope: Scope::Connected,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_seccomp_keeps_duplicates_in_order() {
        let inst = Instance::app("foo", "1");
        let text = LineListRenderer::seccomp().render(
            &inst,
            &[snippet("a", "\nmount\n\n"), snippet("b", "# b\nmount\numount\n")],
        );
        assert_eq!(
            text,
            "# Seccomp policy for snap.foo\nmount\n# b\nmount\numount\n"
        );
    }

    #[test]
    fn test_kmod_drops_comments() {
        let inst = Instance::app("foo", "1");
        let text = LineListRenderer::kmod().render(&inst, &[snippet("a", "# mods\ncifs\n")]);
        assert_eq!(text, "# Kernel modules for snap.foo\ncifs\n");
    }

    #[test]
    fn test_apparmor_annotates_snippets() {
        let inst = Instance::app("foo", "1");
        let text = AnnotatedRenderer::apparmor()
            .render(&inst, &[snippet("cifs-mount-control", "\ncapability sys_admin,\n")]);
        assert_eq!(
            text,
            "# AppArmor policy for snap.foo\n\n# cifs-mount-control (connected plug)\ncapability sys_admin,\n"
        );
    }

    #[test]
    fn test_backend_set() {
        let set = BackendSet::with_defaults();
        assert_eq!(set.names(), vec!["apparmor", "kmod", "seccomp", "udev"]);
        assert!(set.get("dbus").is_none());

        let (partial, unknown) =
            BackendSet::with_enabled(&["seccomp".to_string(), "dbus".to_string()]);
        assert_eq!(partial.names(), vec!["seccomp"]);
        assert_eq!(unknown, vec!["dbus".to_string()]);
    }
}
