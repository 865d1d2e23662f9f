//! Target/credential value access: placeholder interpolation and the dotted
//! path walk used by the generic (wildcard) check.
//!
//! The original implementation duck-types its way across mappings and plain
//! objects (`policy/_utils.py`'s `dict_from_object`/`xgetattr`). Here both
//! targets and credentials are represented uniformly as [`serde_json::Value`];
//! anything `Serialize` converts into one via [`to_value`].

use serde::Serialize;
use serde_json::Value;

/// Convert any serializable value into the `Value` representation the
/// engine evaluates against.
pub fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Interpolate `%(key)s`-style placeholders in `pattern` using fields of
/// `target` (which must serialize to a JSON object to supply any values).
///
/// Returns `None` if any referenced key is missing from `target`, matching
/// the original's `match % dict_from_object(target)` raising `KeyError`.
pub fn interpolate(pattern: &str, target: &Value) -> Option<String> {
    let mut out = String::with_capacity(pattern.len());
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && pattern[i..].starts_with("%(") {
            let rest = &pattern[i + 2..];
            let close = rest.find(")s")?;
            let key = &rest[..close];
            let value = target.get(key)?;
            out.push_str(&display_value(value));
            i += 2 + close + 2;
        } else {
            let ch = pattern[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    Some(out)
}

/// Render a JSON value the way Python's `str()` would for the scalar and
/// list shapes the DSL cares about: strings print unquoted, everything else
/// uses its natural textual form.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        Value::Bool(b) => {
            if *b {
                "True".to_string()
            } else {
                "False".to_string()
            }
        }
        other => other.to_string(),
    }
}

/// Try to decode `text` as a conservative JSON literal (integer, float,
/// bool, null, string, array) — never an arbitrary expression. Mirrors the
/// original's `ast.literal_eval(self.kind)`, which also accepts single-quoted
/// Python string literals (e.g. `'Member'`); `serde_json` only understands
/// double quotes, so a single-quoted literal is rewritten to a double-quoted
/// one before decoding.
pub fn try_decode_literal(text: &str) -> Option<Value> {
    if let Some(inner) = single_quoted_string(text) {
        return Some(Value::String(inner.to_string()));
    }
    serde_json::from_str::<Value>(text).ok()
}

/// Strip matching single quotes from a string like `'Member'`, rejecting any
/// embedded quote so a value containing `'` never round-trips incorrectly.
fn single_quoted_string(text: &str) -> Option<&str> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    if inner.contains('\'') {
        return None;
    }
    Some(inner)
}

/// Walk `path` (dot-separated) into `root`, comparing the terminal value's
/// string form against `expected`. At any non-terminal segment that yields
/// an array of non-string values, recurse into each element and succeed if
/// any element matches (list-of-records support, `spec.md` §4.2).
pub fn find_in_object(root: &Value, path: &[&str], expected: &str) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return display_value(root) == expected;
    };

    let Some(next) = root.get(head) else {
        return false;
    };

    if let Value::Array(items) = next {
        return items.iter().any(|item| find_in_object(item, rest, expected));
    }

    find_in_object(next, rest, expected)
}
