//! Constraint sets inside base-declaration rules and their matching.
//!
//! A constraint set is one YAML map such as
//!
//! ```yaml
//! slot-snap-type: [core]
//! plug-attributes:
//!   mount-point: $SLOT(path)
//! on-classic: true
//! ```
//!
//! Every listed constraint must hold for the set to match.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use super::declaration::DeclarationError;
use crate::instance::{attr_to_string, Attributes, Instance, PlatformMode, SnapType};
use crate::interfaces::Side;

/// What kind of rule a constraint set belongs to. Installation rules only see
/// one endpoint, so they may not reference the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleContext {
    Installation(Side),
    Connection,
}

/// One endpoint as seen by rule matching.
#[derive(Debug, Clone, Copy)]
pub struct EndpointView<'a> {
    pub instance: &'a Instance,
    pub attrs: &'a Attributes,
}

/// Everything a constraint can look at. For installation rules only the
/// installing side is set.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub plug: Option<EndpointView<'a>>,
    pub slot: Option<EndpointView<'a>>,
    pub mode: PlatformMode,
}

impl<'a> MatchContext<'a> {
    fn side(&self, side: Side) -> Option<EndpointView<'a>> {
        match side {
            Side::Plug => self.plug,
            Side::Slot => self.slot,
        }
    }
}

/// A conjunction of constraints.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub plug_snap_type: Option<Vec<SnapType>>,
    pub slot_snap_type: Option<Vec<SnapType>>,
    pub plug_attributes: Option<AttributeConstraints>,
    pub slot_attributes: Option<AttributeConstraints>,
    pub on_classic: Option<bool>,
}

/// Constraints on the attributes of one endpoint, keyed by attribute name.
#[derive(Debug, Clone, Default)]
pub struct AttributeConstraints(pub BTreeMap<String, AttrMatcher>);

/// How one attribute value is matched.
#[derive(Debug, Clone)]
pub enum AttrMatcher {
    /// Anchored regular expression over the value's string form
    Pattern(Regex),
    /// Must equal the named attribute of the given side (`$PLUG(x)`, `$SLOT(x)`)
    Peer { side: Side, attr: String },
    /// Scalar must be listed; a sequence must have all its elements listed
    OneOf(Vec<Value>),
    /// Nested constraints on a map-valued attribute
    Map(AttributeConstraints),
    /// Booleans and numbers compare by equality
    Literal(Value),
}

impl Constraints {
    /// Parse one constraint map.
    pub fn parse(
        map: &serde_yaml::Mapping,
        context: RuleContext,
        rule: &str,
    ) -> Result<Self, DeclarationError> {
        let mut out = Constraints::default();

        for (key, value) in map {
            let key = key
                .as_str()
                .ok_or_else(|| invalid(rule, "constraint keys must be strings"))?;
            if let RuleContext::Installation(side) = context {
                let own = side.as_str();
                if (key.starts_with("plug-") && side != Side::Plug)
                    || (key.starts_with("slot-") && side != Side::Slot)
                {
                    return Err(invalid(
                        rule,
                        &format!("{} installation rule cannot constrain {}", own, key),
                    ));
                }
            }

            match key {
                "plug-snap-type" => out.plug_snap_type = Some(parse_snap_types(value, rule)?),
                "slot-snap-type" => out.slot_snap_type = Some(parse_snap_types(value, rule)?),
                "plug-attributes" => {
                    out.plug_attributes = Some(AttributeConstraints::parse(value, context, rule)?)
                }
                "slot-attributes" => {
                    out.slot_attributes = Some(AttributeConstraints::parse(value, context, rule)?)
                }
                "on-classic" => {
                    out.on_classic = Some(
                        value
                            .as_bool()
                            .ok_or_else(|| invalid(rule, "on-classic must be a boolean"))?,
                    )
                }
                other => return Err(invalid(rule, &format!("unknown constraint: {}", other))),
            }
        }

        Ok(out)
    }

    /// Whether every constraint holds.
    pub fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        if let Some(on_classic) = self.on_classic {
            if on_classic != ctx.mode.is_classic() {
                return false;
            }
        }
        if let Some(types) = &self.plug_snap_type {
            if !snap_type_matches(types, ctx.plug) {
                return false;
            }
        }
        if let Some(types) = &self.slot_snap_type {
            if !snap_type_matches(types, ctx.slot) {
                return false;
            }
        }
        if let Some(attrs) = &self.plug_attributes {
            match ctx.plug {
                Some(plug) if attrs.matches(plug.attrs, ctx) => {}
                _ => return false,
            }
        }
        if let Some(attrs) = &self.slot_attributes {
            match ctx.slot {
                Some(slot) if attrs.matches(slot.attrs, ctx) => {}
                _ => return false,
            }
        }
        true
    }
}

fn snap_type_matches(allowed: &[SnapType], endpoint: Option<EndpointView<'_>>) -> bool {
    match endpoint {
        Some(ep) => allowed.iter().any(|t| t.accepts(ep.instance.snap_type)),
        None => false,
    }
}

fn parse_snap_types(value: &serde_yaml::Value, rule: &str) -> Result<Vec<SnapType>, DeclarationError> {
    let items = match value {
        serde_yaml::Value::Sequence(seq) => seq.iter().collect::<Vec<_>>(),
        single @ serde_yaml::Value::String(_) => vec![single],
        _ => return Err(invalid(rule, "snap type constraint must be a list of types")),
    };

    items
        .into_iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| invalid(rule, "snap types must be strings"))?
                .parse::<SnapType>()
                .map_err(|e| invalid(rule, &e))
        })
        .collect()
}

impl AttributeConstraints {
    fn parse(
        value: &serde_yaml::Value,
        context: RuleContext,
        rule: &str,
    ) -> Result<Self, DeclarationError> {
        let json: Value = serde_json::to_value(value)
            .map_err(|e| invalid(rule, &format!("attribute constraints: {}", e)))?;
        Self::from_json(&json, context, rule)
    }

    fn from_json(value: &Value, context: RuleContext, rule: &str) -> Result<Self, DeclarationError> {
        let map = value
            .as_object()
            .ok_or_else(|| invalid(rule, "attribute constraints must be a map"))?;

        let mut out = BTreeMap::new();
        for (name, expected) in map {
            out.insert(name.clone(), AttrMatcher::from_json(expected, context, rule)?);
        }
        Ok(AttributeConstraints(out))
    }

    /// Whether `attrs` satisfies every constraint. A missing attribute never matches.
    pub fn matches(&self, attrs: &Attributes, ctx: &MatchContext<'_>) -> bool {
        self.0.iter().all(|(name, matcher)| match attrs.get(name) {
            Some(actual) => matcher.matches(actual, ctx),
            None => false,
        })
    }

    fn matches_object(&self, obj: &serde_json::Map<String, Value>, ctx: &MatchContext<'_>) -> bool {
        self.0.iter().all(|(name, matcher)| match obj.get(name) {
            Some(actual) => matcher.matches(actual, ctx),
            None => false,
        })
    }
}

impl AttrMatcher {
    fn from_json(value: &Value, context: RuleContext, rule: &str) -> Result<Self, DeclarationError> {
        match value {
            Value::String(s) => {
                if let Some((side, attr)) = parse_peer_ref(s) {
                    if context != RuleContext::Connection {
                        return Err(invalid(
                            rule,
                            &format!("{} is only valid in connection rules", s),
                        ));
                    }
                    return Ok(AttrMatcher::Peer { side, attr });
                }
                let re = Regex::new(&format!("^(?:{})$", s))
                    .map_err(|e| invalid(rule, &format!("bad attribute pattern {:?}: {}", s, e)))?;
                Ok(AttrMatcher::Pattern(re))
            }
            Value::Array(items) => Ok(AttrMatcher::OneOf(items.clone())),
            Value::Object(_) => Ok(AttrMatcher::Map(AttributeConstraints::from_json(
                value, context, rule,
            )?)),
            Value::Bool(_) | Value::Number(_) => Ok(AttrMatcher::Literal(value.clone())),
            Value::Null => Err(invalid(rule, "attribute constraint cannot be null")),
        }
    }

    fn matches(&self, actual: &Value, ctx: &MatchContext<'_>) -> bool {
        match self {
            AttrMatcher::Pattern(re) => match actual {
                Value::Array(_) | Value::Object(_) | Value::Null => false,
                scalar => re.is_match(&attr_to_string(scalar)),
            },
            AttrMatcher::Peer { side, attr } => ctx
                .side(*side)
                .and_then(|ep| ep.attrs.get(attr))
                .map_or(false, |peer| peer == actual),
            AttrMatcher::OneOf(allowed) => match actual {
                Value::Array(items) => items.iter().all(|item| allowed.contains(item)),
                scalar => allowed.contains(scalar),
            },
            AttrMatcher::Map(nested) => match actual {
                Value::Object(obj) => nested.matches_object(obj, ctx),
                _ => false,
            },
            AttrMatcher::Literal(expected) => expected == actual,
        }
    }
}

/// `$PLUG(name)` / `$SLOT(name)`
fn parse_peer_ref(s: &str) -> Option<(Side, String)> {
    let (side, rest) = if let Some(rest) = s.strip_prefix("$PLUG(") {
        (Side::Plug, rest)
    } else if let Some(rest) = s.strip_prefix("$SLOT(") {
        (Side::Slot, rest)
    } else {
        return None;
    };
    let attr = rest.strip_suffix(')')?;
    if attr.is_empty() {
        return None;
    }
    Some((side, attr.to_string()))
}

fn invalid(rule: &str, reason: &str) -> DeclarationError {
    DeclarationError::InvalidRule {
        rule: rule.to_string(),
        reason: reason.to_string(),
    }
}
