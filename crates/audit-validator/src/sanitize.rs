//! Recursive sanitization of the open `extensions` map. `ExtensionValue` is
//! an owned tree built by `serde_json` deserialization, so a true reference
//! cycle can't occur structurally; `circular_reference_found` is kept in the
//! outcome anyway so a future caller plugging in a graph-shaped source
//! format has somewhere to report it, and is always `false` here.

use crate::sanitize_string;
use audit_core::model::ExtensionValue;
use std::collections::HashMap;

const DEPTH_SENTINEL: &str = "[max nesting depth exceeded]";

pub struct SanitizeOutcome {
    pub value: HashMap<String, ExtensionValue>,
    pub circular_reference_found: bool,
    pub depth_truncated: bool,
    /// Set when at least one nested string value needed control-character
    /// stripping or truncation, the same hardening applied to top-level
    /// string fields.
    pub strings_sanitized: bool,
}

pub fn sanitize_extensions(
    input: &HashMap<String, ExtensionValue>,
    max_depth: usize,
    max_string_len: usize,
) -> SanitizeOutcome {
    let mut depth_truncated = false;
    let mut strings_sanitized = false;
    let value = input
        .iter()
        .map(|(k, v)| (k.clone(), walk(v, max_depth, 1, max_string_len, &mut depth_truncated, &mut strings_sanitized)))
        .collect();

    SanitizeOutcome { value, circular_reference_found: false, depth_truncated, strings_sanitized }
}

fn walk(
    value: &ExtensionValue,
    max_depth: usize,
    current_depth: usize,
    max_string_len: usize,
    truncated: &mut bool,
    sanitized: &mut bool,
) -> ExtensionValue {
    if current_depth > max_depth {
        if matches!(value, ExtensionValue::Map(_) | ExtensionValue::List(_)) {
            *truncated = true;
            return ExtensionValue::String(DEPTH_SENTINEL.to_string());
        }
        return value.clone();
    }

    match value {
        ExtensionValue::Map(map) => ExtensionValue::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), walk(v, max_depth, current_depth + 1, max_string_len, truncated, sanitized)))
                .collect(),
        ),
        ExtensionValue::List(items) => ExtensionValue::List(
            items
                .iter()
                .map(|v| walk(v, max_depth, current_depth + 1, max_string_len, truncated, sanitized))
                .collect(),
        ),
        ExtensionValue::String(s) => {
            let (clean, changed) = sanitize_string(s, max_string_len);
            if changed {
                *sanitized = true;
            }
            ExtensionValue::String(clean)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested(depth: usize) -> ExtensionValue {
        if depth == 0 {
            ExtensionValue::String("leaf".to_string())
        } else {
            let mut map = HashMap::new();
            map.insert("child".to_string(), nested(depth - 1));
            ExtensionValue::Map(map)
        }
    }

    #[test]
    fn truncates_beyond_max_depth() {
        let mut input = HashMap::new();
        input.insert("deep".to_string(), nested(5));

        let outcome = sanitize_extensions(&input, 2, 10_000);
        assert!(outcome.depth_truncated);
    }

    #[test]
    fn leaves_shallow_structures_untouched() {
        let mut input = HashMap::new();
        input.insert("flag".to_string(), ExtensionValue::Bool(true));

        let outcome = sanitize_extensions(&input, 3, 10_000);
        assert!(!outcome.depth_truncated);
        assert!(matches!(outcome.value.get("flag"), Some(ExtensionValue::Bool(true))));
    }

    #[test]
    fn sanitizes_nested_string_values() {
        let mut inner = HashMap::new();
        inner.insert("note".to_string(), ExtensionValue::String("<script>alert(1)</script>".to_string()));
        let mut input = HashMap::new();
        input.insert("context".to_string(), ExtensionValue::Map(inner));

        let outcome = sanitize_extensions(&input, 3, 10_000);
        assert!(outcome.strings_sanitized);
        let Some(ExtensionValue::Map(context)) = outcome.value.get("context") else {
            panic!("expected nested map to survive sanitization");
        };
        let Some(ExtensionValue::String(note)) = context.get("note") else {
            panic!("expected nested string to survive sanitization");
        };
        assert!(!note.contains('<'));
        assert!(!note.contains('>'));
    }

    #[test]
    fn truncates_overlong_nested_strings() {
        let mut input = HashMap::new();
        input.insert("blob".to_string(), ExtensionValue::String("a".repeat(20)));

        let outcome = sanitize_extensions(&input, 3, 5);
        assert!(outcome.strings_sanitized);
        assert!(matches!(outcome.value.get("blob"), Some(ExtensionValue::String(s)) if s.ends_with("...[truncated]")));
    }
}
