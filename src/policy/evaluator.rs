//! Base-declaration evaluation.
//!
//! Logic for installation of one side:
//! 1. OS-reserved slot on a non-system instance: deny
//! 2. Any matching `deny-installation`: deny
//! 3. Matching `allow-installation`: allow, otherwise deny
//!
//! Each category a side leaves out is taken from the preamble, so a side that
//! only declares `deny-installation` still allows what it does not deny.
//!
//! Logic for a plug/slot pair:
//! 1. Either side not installable: deny
//! 2. Any matching `deny-connection`: deny
//! 3. A side declaring `allow-connection` that does not match: deny
//! 4. Any matching `deny-auto-connection`: manual consent
//! 5. Matching `allow-auto-connection` on every side that declares one: allow
//! 6. Default: manual consent
//!
//! Deny always wins within a category. The evaluator holds no mutable state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::constraints::{EndpointView, MatchContext};
use super::declaration::{BaseDeclaration, Rule, RuleKind, RuleSet};
use crate::instance::{Attributes, Instance, PlatformMode, PlugRef, SlotRef};
use crate::interfaces::{InterfaceDefinition, InterfaceRegistry, RegistryError, Side};

/// Outcome of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Allowed,
    Denied,
    /// Not denied, but never automatic. An explicit consent step may connect.
    RequiresManualConsent,
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eligibility::Allowed => f.write_str("allowed"),
            Eligibility::Denied => f.write_str("denied"),
            Eligibility::RequiresManualConsent => f.write_str("requires manual consent"),
        }
    }
}

/// The result of an evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub eligibility: Eligibility,

    /// Which rule decided, e.g. `slots/deny-auto-connection` (None = default)
    pub rule_name: Option<String>,

    /// Human-readable reason
    pub reason: String,
}

impl Evaluation {
    fn new(eligibility: Eligibility, rule_name: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            eligibility,
            rule_name,
            reason: reason.into(),
        }
    }

    pub fn is_denied(&self) -> bool {
        self.eligibility == Eligibility::Denied
    }
}

/// Rules for the categories a side does not declare.
fn preamble() -> RuleSet {
    RuleSet {
        allow_installation: Some(Rule::Always),
        ..RuleSet::default()
    }
}

fn rule_name(side: Side, kind: RuleKind) -> String {
    format!("{}s/{}", side.as_str(), kind.as_str())
}

/// Evaluates installation and connection eligibility against the registry's
/// base declarations.
#[derive(Debug, Clone)]
pub struct BaseDeclarationEvaluator {
    registry: Arc<InterfaceRegistry>,
    mode: PlatformMode,
}

impl BaseDeclarationEvaluator {
    pub fn new(registry: Arc<InterfaceRegistry>, mode: PlatformMode) -> Self {
        Self { registry, mode }
    }

    pub fn mode(&self) -> PlatformMode {
        self.mode
    }

    pub fn registry(&self) -> &Arc<InterfaceRegistry> {
        &self.registry
    }

    /// May `plug` be installed?
    pub fn evaluate_plug_installation(&self, plug: &PlugRef) -> Result<Evaluation, RegistryError> {
        self.evaluate_installation(Side::Plug, &plug.interface, &plug.instance, &plug.attrs)
    }

    /// May `slot` be installed?
    pub fn evaluate_slot_installation(&self, slot: &SlotRef) -> Result<Evaluation, RegistryError> {
        self.evaluate_installation(Side::Slot, &slot.interface, &slot.instance, &slot.attrs)
    }

    /// May an endpoint of `interface` on `side` be installed on `instance`?
    pub fn evaluate_installation(
        &self,
        side: Side,
        interface: &str,
        instance: &Instance,
        attrs: &Attributes,
    ) -> Result<Evaluation, RegistryError> {
        let definition = self.registry.lookup(interface)?;
        let declaration = self.registry.declaration(interface)?;
        let view = EndpointView { instance, attrs };
        let ctx = match side {
            Side::Plug => MatchContext { plug: Some(view), slot: None, mode: self.mode },
            Side::Slot => MatchContext { plug: None, slot: Some(view), mode: self.mode },
        };

        let evaluation = installation(definition, declaration, side, instance, &ctx);
        tracing::debug!(
            interface,
            side = %side,
            instance = %instance.name,
            eligibility = %evaluation.eligibility,
            rule = ?evaluation.rule_name,
            "evaluated installation"
        );
        Ok(evaluation)
    }

    /// May `plug` and `slot` be connected, and if so, automatically?
    pub fn evaluate_connection(&self, plug: &PlugRef, slot: &SlotRef) -> Result<Evaluation, RegistryError> {
        if plug.interface != slot.interface {
            return Ok(Evaluation::new(
                Eligibility::Denied,
                None,
                format!(
                    "plug interface {} does not match slot interface {}",
                    plug.interface, slot.interface
                ),
            ));
        }

        let definition = self.registry.lookup(&plug.interface)?;
        let declaration = self.registry.declaration(&plug.interface)?;
        let plug_view = EndpointView { instance: &plug.instance, attrs: &plug.attrs };
        let slot_view = EndpointView { instance: &slot.instance, attrs: &slot.attrs };

        let evaluation = connection(definition, declaration, plug_view, slot_view, self.mode);
        tracing::debug!(
            interface = %plug.interface,
            plug = %plug.instance.name,
            slot = %slot.instance.name,
            eligibility = %evaluation.eligibility,
            rule = ?evaluation.rule_name,
            "evaluated connection"
        );
        Ok(evaluation)
    }
}

fn installation(
    definition: &InterfaceDefinition,
    declaration: &BaseDeclaration,
    side: Side,
    instance: &Instance,
    ctx: &MatchContext<'_>,
) -> Evaluation {
    if side == Side::Slot && definition.reserved_for_os && !instance.is_system() {
        return Evaluation::new(
            Eligibility::Denied,
            None,
            format!(
                "{} slots are reserved for the system, {} is a {} snap",
                definition.name, instance.name, instance.snap_type
            ),
        );
    }

    let declared = declaration.side(side);
    let preamble = preamble();
    let rule_for = |kind| declared.get(kind).or_else(|| preamble.get(kind));

    if let Some(rule) = rule_for(RuleKind::DenyInstallation) {
        if rule.matches(ctx) {
            let name = rule_name(side, RuleKind::DenyInstallation);
            let reason = format!("installation denied by {}", name);
            return Evaluation::new(Eligibility::Denied, Some(name), reason);
        }
    }

    if let Some(rule) = rule_for(RuleKind::AllowInstallation) {
        let name = rule_name(side, RuleKind::AllowInstallation);
        if rule.matches(ctx) {
            let reason = format!("installation allowed by {}", name);
            return Evaluation::new(Eligibility::Allowed, Some(name), reason);
        }
        let reason = format!("installation not permitted by {}", name);
        return Evaluation::new(Eligibility::Denied, Some(name), reason);
    }

    Evaluation::new(Eligibility::Denied, None, "no installation rule allows this")
}

fn connection(
    definition: &InterfaceDefinition,
    declaration: &BaseDeclaration,
    plug: EndpointView<'_>,
    slot: EndpointView<'_>,
    mode: PlatformMode,
) -> Evaluation {
    for side in [Side::Plug, Side::Slot] {
        let (own, instance) = match side {
            Side::Plug => (MatchContext { plug: Some(plug), slot: None, mode }, plug.instance),
            Side::Slot => (MatchContext { plug: None, slot: Some(slot), mode }, slot.instance),
        };
        let install = installation(definition, declaration, side, instance, &own);
        if install.is_denied() {
            return install;
        }
    }

    let ctx = MatchContext { plug: Some(plug), slot: Some(slot), mode };
    let sides = [(Side::Plug, &declaration.plugs), (Side::Slot, &declaration.slots)];

    // Absolute gate.
    for (side, rules) in sides {
        if let Some(rule) = rules.get(RuleKind::DenyConnection) {
            if rule.matches(&ctx) {
                let name = rule_name(side, RuleKind::DenyConnection);
                let reason = format!("connection denied by {}", name);
                return Evaluation::new(Eligibility::Denied, Some(name), reason);
            }
        }
    }
    for (side, rules) in sides {
        if let Some(rule) = rules.get(RuleKind::AllowConnection) {
            if !rule.matches(&ctx) {
                let name = rule_name(side, RuleKind::AllowConnection);
                let reason = format!("connection not permitted by {}", name);
                return Evaluation::new(Eligibility::Denied, Some(name), reason);
            }
        }
    }

    // Auto-connection gate.
    for (side, rules) in sides {
        if let Some(rule) = rules.get(RuleKind::DenyAutoConnection) {
            if rule.matches(&ctx) {
                let name = rule_name(side, RuleKind::DenyAutoConnection);
                let reason = format!("auto-connection denied by {}", name);
                return Evaluation::new(Eligibility::RequiresManualConsent, Some(name), reason);
            }
        }
    }

    let mut allowed_by = None;
    for (side, rules) in sides {
        if let Some(rule) = rules.get(RuleKind::AllowAutoConnection) {
            let name = rule_name(side, RuleKind::AllowAutoConnection);
            if !rule.matches(&ctx) {
                let reason = format!("auto-connection not permitted by {}", name);
                return Evaluation::new(Eligibility::RequiresManualConsent, Some(name), reason);
            }
            if allowed_by.is_none() {
                allowed_by = Some(name);
            }
        }
    }

    match allowed_by {
        Some(name) => {
            let reason = format!("auto-connection allowed by {}", name);
            Evaluation::new(Eligibility::Allowed, Some(name), reason)
        }
        None => Evaluation::new(
            Eligibility::RequiresManualConsent,
            None,
            "no rule allows auto-connection",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::SnapType;
    use crate::interfaces::builtin::cifs_mount_control;

    fn evaluator_with(defs: Vec<InterfaceDefinition>, mode: PlatformMode) -> BaseDeclarationEvaluator {
        let mut registry = InterfaceRegistry::new();
        registry.register_all(defs).unwrap();
        BaseDeclarationEvaluator::new(Arc::new(registry), mode)
    }

    fn core() -> Instance {
        Instance::new("core", "16", SnapType::Core)
    }

    #[test]
    fn test_cifs_non_core_slot_is_denied() {
        let ev = evaluator_with(vec![cifs_mount_control::definition()], PlatformMode::Classic);
        let plug = PlugRef::new(Instance::app("mounter", "3"), "cifs-mount-control");
        let slot = SlotRef::new(Instance::app("impostor", "1"), "cifs-mount-control");

        let result = ev.evaluate_connection(&plug, &slot).unwrap();
        assert_eq!(result.eligibility, Eligibility::Denied);
    }

    #[test]
    fn test_cifs_core_slot_requires_consent() {
        let ev = evaluator_with(vec![cifs_mount_control::definition()], PlatformMode::Classic);
        let plug = PlugRef::new(Instance::app("mounter", "3"), "cifs-mount-control");
        let slot = SlotRef::new(core(), "cifs-mount-control");

        let result = ev.evaluate_connection(&plug, &slot).unwrap();
        assert_eq!(result.eligibility, Eligibility::RequiresManualConsent);
        assert_eq!(result.rule_name.as_deref(), Some("slots/deny-auto-connection"));
    }

    #[test]
    fn test_deny_wins_over_any_number_of_allows() {
        let def = InterfaceDefinition::new("x")
            .with_plug_rules(
                r#"
x:
  allow-connection: true
  allow-auto-connection: true
"#,
            )
            .with_slot_rules(
                r#"
x:
  allow-installation: true
  allow-connection:
    - slot-snap-type: [core]
    - on-classic: true
  allow-auto-connection: true
  deny-connection:
    plug-attributes:
      path: /etc/.*
"#,
            );
        let ev = evaluator_with(vec![def], PlatformMode::Classic);
        let slot = SlotRef::new(core(), "x");

        let good = PlugRef::new(Instance::app("a", "1"), "x").with_attr("path", "/srv/share");
        assert_eq!(ev.evaluate_connection(&good, &slot).unwrap().eligibility, Eligibility::Allowed);

        let bad = PlugRef::new(Instance::app("a", "1"), "x").with_attr("path", "/etc/shadow");
        let result = ev.evaluate_connection(&bad, &slot).unwrap();
        assert_eq!(result.eligibility, Eligibility::Denied);
        assert_eq!(result.rule_name.as_deref(), Some("slots/deny-connection"));
    }

    #[test]
    fn test_deny_installation_wins() {
        let def = InterfaceDefinition::new("x").with_plug_rules(
            r#"
x:
  allow-installation: true
  deny-installation:
    plug-snap-type: [gadget]
"#,
        );
        let ev = evaluator_with(vec![def], PlatformMode::Core);
        let gadget = PlugRef::new(Instance::new("pc", "1", SnapType::Gadget), "x");
        let app = PlugRef::new(Instance::app("a", "1"), "x");

        assert!(ev.evaluate_plug_installation(&gadget).unwrap().is_denied());
        assert_eq!(
            ev.evaluate_plug_installation(&app).unwrap().eligibility,
            Eligibility::Allowed
        );
    }

    #[test]
    fn test_installation_defaults() {
        // No rules: the preamble allows.
        let open = InterfaceDefinition::new("open");
        // Rules present but none match: denied.
        let strict = InterfaceDefinition::new("strict").with_slot_rules(
            "strict:\n  allow-installation:\n    slot-snap-type: [gadget]\n",
        );
        let ev = evaluator_with(vec![open, strict], PlatformMode::Core);
        let app = Instance::app("a", "1");

        let open_slot = SlotRef::new(app.clone(), "open");
        assert_eq!(
            ev.evaluate_slot_installation(&open_slot).unwrap().eligibility,
            Eligibility::Allowed
        );
        let strict_slot = SlotRef::new(app, "strict");
        assert!(ev.evaluate_slot_installation(&strict_slot).unwrap().is_denied());
    }

    #[test]
    fn test_deny_only_side_allows_the_rest() {
        let def = InterfaceDefinition::new("deny-only").with_slot_rules(
            "deny-only:\n  deny-installation:\n    slot-snap-type: [gadget]\n",
        );
        let ev = evaluator_with(vec![def], PlatformMode::Core);

        let on_gadget = SlotRef::new(Instance::new("pi", "1", SnapType::Gadget), "deny-only");
        let denied = ev.evaluate_slot_installation(&on_gadget).unwrap();
        assert!(denied.is_denied());
        assert_eq!(denied.rule_name.as_deref(), Some("slots/deny-installation"));

        let on_app = SlotRef::new(Instance::app("a", "1"), "deny-only");
        assert_eq!(
            ev.evaluate_slot_installation(&on_app).unwrap().eligibility,
            Eligibility::Allowed
        );
    }

    #[test]
    fn test_reserved_for_os() {
        let def = InterfaceDefinition::new("x").reserved_for_os();
        let ev = evaluator_with(vec![def], PlatformMode::Core);

        let on_app = SlotRef::new(Instance::app("a", "1"), "x");
        assert!(ev.evaluate_slot_installation(&on_app).unwrap().is_denied());

        let on_snapd = SlotRef::new(Instance::new("snapd", "1", SnapType::Snapd), "x");
        assert!(!ev.evaluate_slot_installation(&on_snapd).unwrap().is_denied());

        // Plugs are not affected.
        let plug = PlugRef::new(Instance::app("a", "1"), "x");
        assert!(!ev.evaluate_plug_installation(&plug).unwrap().is_denied());
    }

    #[test]
    fn test_connection_without_auto_rules_requires_consent() {
        let ev = evaluator_with(vec![InterfaceDefinition::new("x")], PlatformMode::Core);
        let plug = PlugRef::new(Instance::app("a", "1"), "x");
        let slot = SlotRef::new(core(), "x");

        let result = ev.evaluate_connection(&plug, &slot).unwrap();
        assert_eq!(result.eligibility, Eligibility::RequiresManualConsent);
        assert!(result.rule_name.is_none());
    }

    #[test]
    fn test_auto_connection_by_attribute_equality() {
        let def = InterfaceDefinition::new("x").with_plug_rules(
            r#"
x:
  allow-auto-connection:
    plug-attributes:
      share: $SLOT(share)
"#,
        );
        let ev = evaluator_with(vec![def], PlatformMode::Core);
        let slot = SlotRef::new(core(), "x").with_attr("share", "media");

        let same = PlugRef::new(Instance::app("a", "1"), "x").with_attr("share", "media");
        let other = PlugRef::new(Instance::app("a", "1"), "x").with_attr("share", "backup");
        assert_eq!(ev.evaluate_connection(&same, &slot).unwrap().eligibility, Eligibility::Allowed);
        assert_eq!(
            ev.evaluate_connection(&other, &slot).unwrap().eligibility,
            Eligibility::RequiresManualConsent
        );
    }

    #[test]
    fn test_mismatched_interfaces_denied_and_unknown_errors() {
        let ev = evaluator_with(vec![InterfaceDefinition::new("x")], PlatformMode::Core);
        let plug = PlugRef::new(Instance::app("a", "1"), "x");
        let slot = SlotRef::new(core(), "y");
        assert!(ev.evaluate_connection(&plug, &slot).unwrap().is_denied());

        let unknown = PlugRef::new(Instance::app("a", "1"), "y");
        assert!(matches!(
            ev.evaluate_connection(&unknown, &slot),
            Err(RegistryError::NotFound { .. })
        ));
    }
}
