//! Placeholder substitution for fragment text.
//!
//! Recognised placeholders are `@{SNAP_NAME}`, `@{SNAP_INSTANCE_NAME}`,
//! `@{SNAP_REVISION}`, `@{SNAP_TYPE}`, `@{PLUG:attr}` and `@{SLOT:attr}`.
//! Any other `@{...}` is backend syntax (AppArmor's `@{HOME}`, `@{PROC}`) and
//! is copied through untouched.
//!
//! Attribute values must be scalars free of control characters: a newline in
//! a plug attribute would otherwise let the plug author append rules.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use thiserror::Error;

use crate::instance::{attr_to_string, Attributes, Instance};

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\{([A-Z][A-Z0-9_]*)(?::([A-Za-z0-9_.-]+))?\}").unwrap());

/// Values available while substituting one fragment.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub instance: &'a Instance,

    /// Plug attributes, when the plug side is visible to this fragment
    pub plug_attrs: Option<&'a Attributes>,

    /// Slot attributes, when the slot side is visible to this fragment
    pub slot_attrs: Option<&'a Attributes>,
}

/// Why a placeholder could not be substituted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unresolved placeholder {0}")]
    Unresolved(String),

    #[error("placeholder {placeholder}: {reason}")]
    InvalidValue { placeholder: String, reason: String },
}

/// Substitute placeholders in `text`.
///
/// Fails on the first placeholder that is unresolved or whose attribute
/// value cannot be spliced into rule text.
pub fn substitute(text: &str, ctx: &TemplateContext<'_>) -> Result<String, TemplateError> {
    if !text.contains("@{") {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in PLACEHOLDER_PATTERN.captures_iter(text) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        out.push_str(&text[last..whole.start]);
        match resolve(&caps, ctx)? {
            Some(value) => out.push_str(&value),
            None => out.push_str(&text[whole.clone()]),
        }
        last = whole.end;
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// `Ok(None)` leaves the placeholder as written.
fn resolve(
    caps: &Captures<'_>,
    ctx: &TemplateContext<'_>,
) -> Result<Option<String>, TemplateError> {
    let name = &caps[1];
    let attr = caps.get(2).map(|m| m.as_str());

    let value = match (name, attr) {
        ("SNAP_NAME", None) => ctx.instance.snap_name().to_string(),
        ("SNAP_INSTANCE_NAME", None) => ctx.instance.name.clone(),
        ("SNAP_REVISION", None) => ctx.instance.revision.clone(),
        ("SNAP_TYPE", None) => ctx.instance.snap_type.to_string(),
        ("PLUG", Some(attr)) => lookup(ctx.plug_attrs, attr, &caps[0])?,
        ("SLOT", Some(attr)) => lookup(ctx.slot_attrs, attr, &caps[0])?,
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn lookup(
    attrs: Option<&Attributes>,
    name: &str,
    placeholder: &str,
) -> Result<String, TemplateError> {
    let value = attrs
        .and_then(|attrs| attrs.get(name))
        .ok_or_else(|| TemplateError::Unresolved(placeholder.to_string()))?;
    let invalid = |reason: &str| TemplateError::InvalidValue {
        placeholder: placeholder.to_string(),
        reason: reason.to_string(),
    };

    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {}
        _ => return Err(invalid("value is not a scalar")),
    }
    let text = attr_to_string(value);
    if text.chars().any(char::is_control) {
        return Err(invalid("value contains control characters"));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::SnapType;

    #[test]
    fn test_instance_placeholders() {
        let inst = Instance::new("foo_beta", "42", SnapType::App);
        let ctx = TemplateContext { instance: &inst, plug_attrs: None, slot_attrs: None };
        let out = substitute(
            "/snap/@{SNAP_NAME}/@{SNAP_REVISION} @{SNAP_INSTANCE_NAME} @{SNAP_TYPE}",
            &ctx,
        )
        .unwrap();
        assert_eq!(out, "/snap/foo/42 foo_beta app");
    }

    #[test]
    fn test_unknown_placeholders_untouched() {
        let inst = Instance::app("foo", "1");
        let ctx = TemplateContext { instance: &inst, plug_attrs: None, slot_attrs: None };
        let text = "owner @{HOME}/.config/ r,\n@{PROC}/mounts r,\n@{lowercase} {x}";
        assert_eq!(substitute(text, &ctx).unwrap(), text);
    }

    #[test]
    fn test_attribute_placeholders() {
        let inst = Instance::app("foo", "1");
        let mut plug = Attributes::new();
        plug.insert("path".to_string(), serde_json::json!("/mnt/share"));
        let mut slot = Attributes::new();
        slot.insert("port".to_string(), serde_json::json!(445));

        let ctx = TemplateContext { instance: &inst, plug_attrs: Some(&plug), slot_attrs: Some(&slot) };
        let out = substitute("mount @{PLUG:path} port=@{SLOT:port}", &ctx).unwrap();
        assert_eq!(out, "mount /mnt/share port=445");
    }

    #[test]
    fn test_unresolved_attribute() {
        let inst = Instance::app("foo", "1");
        let plug = Attributes::new();
        let ctx = TemplateContext { instance: &inst, plug_attrs: Some(&plug), slot_attrs: None };
        assert_eq!(
            substitute("a @{PLUG:missing}", &ctx).unwrap_err(),
            TemplateError::Unresolved("@{PLUG:missing}".to_string())
        );
        assert_eq!(
            substitute("@{SLOT:port}", &ctx).unwrap_err(),
            TemplateError::Unresolved("@{SLOT:port}".to_string())
        );
    }

    #[test]
    fn test_multiline_attribute_rejected() {
        let inst = Instance::app("foo", "1");
        let mut plug = Attributes::new();
        plug.insert(
            "path".to_string(),
            serde_json::json!("/mnt/x,\ncapability sys_module,\n/** rwkix"),
        );
        let ctx = TemplateContext { instance: &inst, plug_attrs: Some(&plug), slot_attrs: None };

        let err = substitute("mount fstype=cifs ** -> @{PLUG:path},", &ctx).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::InvalidValue { ref placeholder, .. } if placeholder == "@{PLUG:path}"
        ));
    }

    #[test]
    fn test_control_and_structured_attributes_rejected() {
        let inst = Instance::app("foo", "1");
        let mut plug = Attributes::new();
        plug.insert("cr".to_string(), serde_json::json!("/mnt/a\r/mnt/b"));
        plug.insert("nul".to_string(), serde_json::json!("/mnt/a\u{0}"));
        plug.insert("list".to_string(), serde_json::json!(["/mnt/a", "/mnt/b"]));
        plug.insert("map".to_string(), serde_json::json!({"path": "/mnt/a"}));
        plug.insert("none".to_string(), serde_json::Value::Null);
        plug.insert("ro".to_string(), serde_json::json!(true));
        let ctx = TemplateContext { instance: &inst, plug_attrs: Some(&plug), slot_attrs: None };

        for attr in ["cr", "nul", "list", "map", "none"] {
            let text = format!("@{{PLUG:{}}}", attr);
            assert!(
                matches!(substitute(&text, &ctx), Err(TemplateError::InvalidValue { .. })),
                "{} accepted",
                attr
            );
        }
        assert_eq!(substitute("ro=@{PLUG:ro}", &ctx).unwrap(), "ro=true");
    }
}
