//! Structural schema validation for tool inputs and outputs.
//!
//! What this module provides
//! - `validate(schema, value)` checking a JSON value against a declared
//!   schema: required fields, type match, numeric bounds, string length and
//!   pattern, enum membership, with recursion into `properties` and `items`
//! - `Violation` describing each failure precisely (path + reason) for
//!   assertions and error payloads
//!
//! The same function runs on tool input before dispatch and on tool output
//! after a successful call. An output violation is a backend contract
//! failure, not a transport failure; callers surface it without retrying.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single field-level violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// JSON-path-style location, e.g. `$.query` or `$.items[2]`.
    pub path: String,
    pub reason: String,
}

impl Violation {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Validate `value` against `schema`, collecting every violation.
///
/// A null schema accepts anything; registration without a schema means the
/// payload is opaque to the engine.
pub fn validate(schema: &Value, value: &Value) -> Result<(), Vec<Violation>> {
    if schema.is_null() {
        return Ok(());
    }
    let mut violations = Vec::new();
    check_value(schema, value, "$", &mut violations);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(declared: &str, value: &Value) -> bool {
    match declared {
        "string" => value.is_string(),
        // An integer is also a number
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn check_value(schema: &Value, value: &Value, path: &str, out: &mut Vec<Violation>) {
    if let Some(declared) = schema.get("type").and_then(|t| t.as_str()) {
        if !matches_type(declared, value) {
            out.push(Violation::new(
                path,
                format!("expected {}, got {}", declared, type_name(value)),
            ));
            // Constraints below assume the declared type
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            out.push(Violation::new(
                path,
                format!("value not in enum {}", Value::Array(allowed.clone())),
            ));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(|m| m.as_f64()) {
            if n < min {
                out.push(Violation::new(path, format!("{} is below minimum {}", n, min)));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(|m| m.as_f64()) {
            if n > max {
                out.push(Violation::new(path, format!("{} is above maximum {}", n, max)));
            }
        }
    }

    if let Some(s) = value.as_str() {
        check_string(schema, s, path, out);
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if !obj.contains_key(field) {
                    out.push(Violation::new(
                        path,
                        format!("missing required field: {}", field),
                    ));
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            for (name, subschema) in props {
                if let Some(v) = obj.get(name) {
                    check_value(subschema, v, &format!("{}.{}", path, name), out);
                }
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in items.iter().enumerate() {
                check_value(item_schema, item, &format!("{}[{}]", path, i), out);
            }
        }
    }
}

fn check_string(schema: &Value, s: &str, path: &str, out: &mut Vec<Violation>) {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(|m| m.as_u64()) {
        if len < min {
            out.push(Violation::new(
                path,
                format!("length {} is below minLength {}", len, min),
            ));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(|m| m.as_u64()) {
        if len > max {
            out.push(Violation::new(
                path,
                format!("length {} is above maxLength {}", len, max),
            ));
        }
    }
    if let Some(pattern) = schema.get("pattern").and_then(|p| p.as_str()) {
        match regex::Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(s) {
                    out.push(Violation::new(
                        path,
                        format!("value does not match pattern {}", pattern),
                    ));
                }
            }
            Err(_) => {
                out.push(Violation::new(
                    path,
                    format!("schema declares an invalid pattern {}", pattern),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn search_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1, "maxLength": 256},
                "limit": {"type": "integer", "minimum": 1, "maximum": 100},
                "mode": {"type": "string", "enum": ["semantic", "keyword"]}
            },
            "required": ["query"]
        })
    }

    #[test]
    fn accepts_valid_input() {
        let input = json!({"query": "sci-fi", "limit": 10, "mode": "semantic"});
        assert!(validate(&search_schema(), &input).is_ok());
    }

    #[test]
    fn missing_required_field_names_the_field() {
        let err = validate(&search_schema(), &json!({"limit": 10})).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].path, "$");
        assert!(err[0].reason.contains("query"));
    }

    #[test]
    fn type_mismatch_reports_both_types() {
        let err = validate(&search_schema(), &json!({"query": 42})).unwrap_err();
        assert_eq!(err[0].path, "$.query");
        assert_eq!(err[0].reason, "expected string, got integer");
    }

    #[test]
    fn numeric_bounds_enforced() {
        let err = validate(&search_schema(), &json!({"query": "x", "limit": 101})).unwrap_err();
        assert_eq!(err[0].path, "$.limit");
        assert!(err[0].reason.contains("maximum"));

        let err = validate(&search_schema(), &json!({"query": "x", "limit": 0})).unwrap_err();
        assert!(err[0].reason.contains("minimum"));
    }

    #[test]
    fn enum_membership_enforced() {
        let err = validate(&search_schema(), &json!({"query": "x", "mode": "fuzzy"})).unwrap_err();
        assert_eq!(err[0].path, "$.mode");
        assert!(err[0].reason.contains("enum"));
    }

    #[test]
    fn string_length_and_pattern() {
        let schema = json!({
            "type": "object",
            "properties": {
                "device_id": {"type": "string", "pattern": "^dev-[0-9]+$"},
                "note": {"type": "string", "maxLength": 4}
            }
        });
        let err = validate(&schema, &json!({"device_id": "nope", "note": "too long"})).unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(err.iter().any(|v| v.path == "$.device_id"));
        assert!(err.iter().any(|v| v.path == "$.note"));
    }

    #[test]
    fn recurses_into_arrays_and_objects() {
        let schema = json!({
            "type": "object",
            "properties": {
                "results": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"score": {"type": "number", "minimum": 0.0, "maximum": 1.0}},
                        "required": ["score"]
                    }
                }
            }
        });
        let value = json!({"results": [{"score": 0.5}, {"score": 1.5}, {}]});
        let err = validate(&schema, &value).unwrap_err();
        assert!(err.iter().any(|v| v.path == "$.results[1].score"));
        assert!(err.iter().any(|v| v.path == "$.results[2]" && v.reason.contains("score")));
    }

    #[test]
    fn null_schema_accepts_anything() {
        assert!(validate(&Value::Null, &json!({"anything": [1, 2, 3]})).is_ok());
    }

    #[test]
    fn integer_accepted_where_number_declared() {
        let schema = json!({"type": "number", "minimum": 0});
        assert!(validate(&schema, &json!(3)).is_ok());
        assert!(validate(&schema, &json!(3.5)).is_ok());
    }
}
