//! Log-safe rendering of request bodies.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Replacement written in place of a sensitive value.
pub const MASK: &str = "*******";

static SENSITIVE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)password|secret|refreshToken").expect("SENSITIVE_FIELD should compile")
});

/// Whether a field with this name has its value masked in logs.
pub fn is_sensitive_field(name: &str) -> bool {
    SENSITIVE_FIELD.is_match(name)
}

/// Render `body` for logging with every sensitive field masked.
///
/// Works on a copy; the value that goes over the wire is untouched. Nested
/// objects and objects inside arrays are masked too.
pub fn redact_for_log(body: &Value) -> String {
    let mut copy = body.clone();
    mask_in_place(&mut copy);
    copy.to_string()
}

/// Like [`redact_for_log`], for an optional body. `None` renders as empty.
pub fn redact_optional(body: Option<&Value>) -> String {
    body.map(redact_for_log).unwrap_or_default()
}

fn mask_in_place(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if is_sensitive_field(key) {
                    *field = Value::String(MASK.to_string());
                } else {
                    mask_in_place(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_in_place),
        _ => {}
    }
}
