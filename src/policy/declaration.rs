//! Base-declaration rule grammar.
//!
//! Each interface carries two rule texts, one for its plugs and one for its
//! slots, in the same YAML shape:
//!
//! ```yaml
//! cifs-mount-control:
//!   allow-installation:
//!     slot-snap-type:
//!       - core
//!   deny-auto-connection: true
//! ```
//!
//! Every category key takes `true`, `false`, one constraint map, or a list of
//! constraint maps (alternatives). Parsing happens once, at registration.

use serde::Deserialize;
use thiserror::Error;

use super::constraints::{Constraints, MatchContext, RuleContext};
use crate::interfaces::Side;

/// Errors from parsing base-declaration text.
#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("Declaration is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Declaration is for interface {found:?}, expected {expected:?}")]
    NameMismatch { expected: String, found: String },

    #[error("Invalid rule {rule}: {reason}")]
    InvalidRule { rule: String, reason: String },
}

/// The six rule categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    AllowInstallation,
    DenyInstallation,
    AllowConnection,
    DenyConnection,
    AllowAutoConnection,
    DenyAutoConnection,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::AllowInstallation => "allow-installation",
            RuleKind::DenyInstallation => "deny-installation",
            RuleKind::AllowConnection => "allow-connection",
            RuleKind::DenyConnection => "deny-connection",
            RuleKind::AllowAutoConnection => "allow-auto-connection",
            RuleKind::DenyAutoConnection => "deny-auto-connection",
        }
    }
}

/// One category's rule.
#[derive(Debug, Clone)]
pub enum Rule {
    Always,
    Never,
    /// Matches when any alternative matches
    AnyOf(Vec<Constraints>),
}

impl Rule {
    pub fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        match self {
            Rule::Always => true,
            Rule::Never => false,
            Rule::AnyOf(alternatives) => alternatives.iter().any(|c| c.matches(ctx)),
        }
    }

    fn parse(value: &serde_yaml::Value, context: RuleContext, kind: RuleKind) -> Result<Self, DeclarationError> {
        let name = kind.as_str();
        match value {
            serde_yaml::Value::Bool(true) => Ok(Rule::Always),
            serde_yaml::Value::Bool(false) => Ok(Rule::Never),
            serde_yaml::Value::Mapping(map) => {
                Ok(Rule::AnyOf(vec![Constraints::parse(map, context, name)?]))
            }
            serde_yaml::Value::Sequence(items) => {
                let mut alternatives = Vec::with_capacity(items.len());
                for item in items {
                    let map = item.as_mapping().ok_or_else(|| DeclarationError::InvalidRule {
                        rule: name.to_string(),
                        reason: "alternatives must be constraint maps".to_string(),
                    })?;
                    alternatives.push(Constraints::parse(map, context, name)?);
                }
                Ok(Rule::AnyOf(alternatives))
            }
            // "true"/"false" strings are accepted, as in assertion headers.
            serde_yaml::Value::String(s) if s == "true" => Ok(Rule::Always),
            serde_yaml::Value::String(s) if s == "false" => Ok(Rule::Never),
            _ => Err(DeclarationError::InvalidRule {
                rule: name.to_string(),
                reason: "expected a boolean, a constraint map or a list of constraint maps"
                    .to_string(),
            }),
        }
    }
}

/// The rules of one side (plugs or slots) of one interface. Absent categories
/// are `None`.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub allow_installation: Option<Rule>,
    pub deny_installation: Option<Rule>,
    pub allow_connection: Option<Rule>,
    pub deny_connection: Option<Rule>,
    pub allow_auto_connection: Option<Rule>,
    pub deny_auto_connection: Option<Rule>,
}

impl RuleSet {
    pub fn get(&self, kind: RuleKind) -> Option<&Rule> {
        match kind {
            RuleKind::AllowInstallation => self.allow_installation.as_ref(),
            RuleKind::DenyInstallation => self.deny_installation.as_ref(),
            RuleKind::AllowConnection => self.allow_connection.as_ref(),
            RuleKind::DenyConnection => self.deny_connection.as_ref(),
            RuleKind::AllowAutoConnection => self.allow_auto_connection.as_ref(),
            RuleKind::DenyAutoConnection => self.deny_auto_connection.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allow_installation.is_none()
            && self.deny_installation.is_none()
            && self.allow_connection.is_none()
            && self.deny_connection.is_none()
            && self.allow_auto_connection.is_none()
            && self.deny_auto_connection.is_none()
    }
}

/// Raw category map; unknown categories are rejected here.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawRuleSet {
    allow_installation: Option<serde_yaml::Value>,
    deny_installation: Option<serde_yaml::Value>,
    allow_connection: Option<serde_yaml::Value>,
    deny_connection: Option<serde_yaml::Value>,
    allow_auto_connection: Option<serde_yaml::Value>,
    deny_auto_connection: Option<serde_yaml::Value>,
}

/// Parsed base declaration of one interface.
#[derive(Debug, Clone, Default)]
pub struct BaseDeclaration {
    pub plugs: RuleSet,
    pub slots: RuleSet,
}

impl BaseDeclaration {
    /// Parse both rule texts of an interface.
    pub fn parse(interface: &str, plugs: &str, slots: &str) -> Result<Self, DeclarationError> {
        Ok(Self {
            plugs: parse_rule_set(interface, plugs, Side::Plug)?,
            slots: parse_rule_set(interface, slots, Side::Slot)?,
        })
    }

    pub fn side(&self, side: Side) -> &RuleSet {
        match side {
            Side::Plug => &self.plugs,
            Side::Slot => &self.slots,
        }
    }
}

/// Parse one side's text. Empty text means no rules.
pub fn parse_rule_set(interface: &str, text: &str, side: Side) -> Result<RuleSet, DeclarationError> {
    if text.trim().is_empty() {
        return Ok(RuleSet::default());
    }

    let top: serde_yaml::Mapping = serde_yaml::from_str(text)?;
    let mut entries = top.into_iter();
    let (key, body) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        (None, _) => return Ok(RuleSet::default()),
        (Some(_), Some(_)) => {
            return Err(DeclarationError::InvalidRule {
                rule: interface.to_string(),
                reason: "declaration text must describe exactly one interface".to_string(),
            })
        }
    };

    let found = key.as_str().unwrap_or_default();
    if found != interface {
        return Err(DeclarationError::NameMismatch {
            expected: interface.to_string(),
            found: found.to_string(),
        });
    }

    let raw: RawRuleSet = match body {
        serde_yaml::Value::Null => RawRuleSet::default(),
        other => serde_yaml::from_value(other)?,
    };

    let install = RuleContext::Installation(side);
    let connect = RuleContext::Connection;
    let parse = |value: Option<serde_yaml::Value>, context, kind| {
        value.map(|v| Rule::parse(&v, context, kind)).transpose()
    };

    Ok(RuleSet {
        allow_installation: parse(raw.allow_installation, install, RuleKind::AllowInstallation)?,
        deny_installation: parse(raw.deny_installation, install, RuleKind::DenyInstallation)?,
        allow_connection: parse(raw.allow_connection, connect, RuleKind::AllowConnection)?,
        deny_connection: parse(raw.deny_connection, connect, RuleKind::DenyConnection)?,
        allow_auto_connection: parse(
            raw.allow_auto_connection,
            connect,
            RuleKind::AllowAutoConnection,
        )?,
        deny_auto_connection: parse(
            raw.deny_auto_connection,
            connect,
            RuleKind::DenyAutoConnection,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CIFS_SLOTS: &str = r#"
  cifs-mount-control:
    allow-installation:
      slot-snap-type:
        - core
    deny-auto-connection: true
"#;

    #[test]
    fn test_parse_cifs_slot_rules() {
        let rules = parse_rule_set("cifs-mount-control", CIFS_SLOTS, Side::Slot).unwrap();
        assert!(matches!(rules.deny_auto_connection, Some(Rule::Always)));
        match &rules.allow_installation {
            Some(Rule::AnyOf(alts)) => {
                assert_eq!(alts.len(), 1);
                assert_eq!(alts[0].slot_snap_type.as_ref().unwrap().len(), 1);
            }
            other => panic!("unexpected rule: {:?}", other),
        }
        assert!(rules.allow_connection.is_none());
    }

    #[test]
    fn test_empty_text_has_no_rules() {
        assert!(parse_rule_set("x", "", Side::Plug).unwrap().is_empty());
        assert!(parse_rule_set("x", "  \n", Side::Plug).unwrap().is_empty());
        assert!(parse_rule_set("x", "x:\n", Side::Plug).unwrap().is_empty());
    }

    #[test]
    fn test_name_mismatch() {
        let err = parse_rule_set("other", CIFS_SLOTS, Side::Slot).unwrap_err();
        assert!(matches!(err, DeclarationError::NameMismatch { .. }));
    }

    #[test]
    fn test_unknown_category_rejected() {
        let text = "x:\n  allow-instalation: true\n";
        assert!(parse_rule_set("x", text, Side::Slot).is_err());
    }

    #[test]
    fn test_alternatives_list() {
        let text = r#"
x:
  allow-auto-connection:
    - plug-snap-type: [gadget]
    - on-classic: true
"#;
        let rules = parse_rule_set("x", text, Side::Plug).unwrap();
        match rules.get(RuleKind::AllowAutoConnection) {
            Some(Rule::AnyOf(alts)) => assert_eq!(alts.len(), 2),
            other => panic!("unexpected rule: {:?}", other),
        }
    }

    #[test]
    fn test_bad_rule_value() {
        let text = "x:\n  deny-connection: 3\n";
        let err = parse_rule_set("x", text, Side::Plug).unwrap_err();
        assert!(matches!(err, DeclarationError::InvalidRule { .. }));
    }
}
