// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Schema Validator: checks a value against a JSON-Schema subset
//! (`type`, `properties`, `required`, `items`, `enum`, `minimum`/`maximum`,
//! `minLength`/`maxLength`, `pattern`, `additionalProperties`, intra-document
//! `$ref`). Unknown keywords are ignored. See spec §4.2.

use crate::model::InputFieldSpec;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// One validation failure.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
    pub expected: String,
    pub actual: String,
}

/// Result of validating a value against a schema: an empty `errors` vec
/// means the value is valid.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, field_path: impl Into<String>, message: impl Into<String>, expected: impl Into<String>, actual: &Value) {
        self.errors.push(ValidationError {
            field_path: field_path.into(),
            message: message.into(),
            expected: expected.into(),
            actual: describe(actual),
        });
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
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

fn matches_declared_type(declared: &str, value: &Value) -> bool {
    match declared {
        "integer" => matches!(value, Value::Number(n) if n.is_i64() || n.is_u64()),
        "number" => value.is_number(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true, // unknown type keyword value: ignore, per "unknown keywords are ignored"
    }
}

/// Resolves an intra-document `$ref` (`#/...` JSON pointer) against the
/// root schema document. Remote refs are unsupported (SPEC_FULL.md §10).
fn resolve_ref<'a>(root: &'a Value, ptr: &str) -> Option<&'a Value> {
    let fragment = ptr.strip_prefix('#')?;
    root.pointer(fragment)
}

/// Validates `value` against `schema`, resolving any `$ref` against
/// `root`. `path` is the JSON-pointer-ish field path accumulated so far,
/// used in reported errors.
pub fn validate_at<'a>(root: &'a Value, schema: &'a Value, value: &Value, path: &str, out: &mut ValidationResult) {
    let schema = if let Some(ref_str) = schema.get("$ref").and_then(Value::as_str) {
        match resolve_ref(root, ref_str) {
            Some(resolved) => resolved,
            None => {
                out.push(path, format!("unresolvable $ref '{ref_str}'"), ref_str, value);
                return;
            }
        }
    } else {
        schema
    };

    if let Some(declared) = schema.get("type").and_then(Value::as_str) {
        if !matches_declared_type(declared, value) {
            out.push(
                path,
                format!("expected type '{declared}', got '{}'", type_name(value)),
                declared,
                value,
            );
            return;
        }
    }

    if let Some(enum_values) = schema.get("enum").and_then(Value::as_array) {
        if !enum_values.contains(value) {
            out.push(
                path,
                "value is not one of the allowed enum values".to_string(),
                format!("{enum_values:?}"),
                value,
            );
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(min_len) = schema.get("minLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) < min_len {
                out.push(path, format!("string shorter than minLength {min_len}"), min_len.to_string(), value);
            }
        }
        if let Some(max_len) = schema.get("maxLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) > max_len {
                out.push(path, format!("string longer than maxLength {max_len}"), max_len.to_string(), value);
            }
        }
        if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
            match Regex::new(pattern) {
                Ok(re) if !re.is_match(s) => {
                    out.push(path, format!("string does not match pattern '{pattern}'"), pattern, value);
                }
                Err(e) => {
                    out.push(path, format!("invalid pattern '{pattern}': {e}"), pattern, value);
                }
                _ => {}
            }
        }
    }

    if let Some(n) = value.as_f64() {
        if value.is_number() {
            if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                if n < min {
                    out.push(path, format!("value below minimum {min}"), min.to_string(), value);
                }
            }
            if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                if n > max {
                    out.push(path, format!("value above maximum {max}"), max.to_string(), value);
                }
            }
        }
    }

    if let Value::Object(obj) = value {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for req in required {
                if let Some(name) = req.as_str() {
                    if !obj.contains_key(name) {
                        out.push(
                            format!("{path}.{name}"),
                            "missing required field".to_string(),
                            "present".to_string(),
                            &Value::Null,
                        );
                    }
                }
            }
        }

        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (key, sub_schema) in properties {
                if let Some(sub_value) = obj.get(key) {
                    validate_at(root, sub_schema, sub_value, &format!("{path}.{key}"), out);
                }
            }
        }

        if let Some(Value::Bool(false)) = schema.get("additionalProperties") {
            let known: Vec<&str> = schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|p| p.keys().map(String::as_str).collect())
                .unwrap_or_default();
            for key in obj.keys() {
                if !known.contains(&key.as_str()) {
                    out.push(
                        format!("{path}.{key}"),
                        "additional property not allowed".to_string(),
                        "absent".to_string(),
                        obj.get(key).unwrap(),
                    );
                }
            }
        }
    }

    if let Value::Array(items) = value {
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in items.iter().enumerate() {
                validate_at(root, item_schema, item, &format!("{path}[{i}]"), out);
            }
        }
    }
}

/// Validates `value` against a top-level schema document (the root and
/// the schema are the same document).
pub fn validate(schema: &Value, value: &Value) -> ValidationResult {
    let mut out = ValidationResult::default();
    validate_at(schema, schema, value, "$", &mut out);
    out
}

/// Builds a JSON-Schema-subset equivalent of a workflow's
/// `inputSchema: mapping<fieldName, {type, required, default, description}>`
/// so the generic validator above can check it.
pub fn workflow_schema_as_json_schema(fields: &HashMap<String, InputFieldSpec>) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for (name, spec) in fields {
        properties.insert(name.clone(), serde_json::json!({"type": spec.field_type}));
        if spec.required {
            required.push(Value::String(name.clone()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
    })
}

/// Validates workflow input, applying declared defaults first, and builds
/// a human-readable "suggested prompt" enumerating any still-missing
/// required fields with their declared type and description (spec §4.2).
pub fn validate_workflow_input(
    fields: &HashMap<String, InputFieldSpec>,
    input: &Value,
) -> (ValidationResult, Value, Option<String>) {
    let mut filled = input.clone();
    if let Value::Object(obj) = &mut filled {
        for (name, spec) in fields {
            if !obj.contains_key(name) {
                if let Some(default) = &spec.default {
                    obj.insert(name.clone(), default.clone());
                }
            }
        }
    }

    let schema = workflow_schema_as_json_schema(fields);
    let result = validate(&schema, &filled);

    let suggested_prompt = if result.is_valid() {
        None
    } else {
        let mut missing: Vec<String> = Vec::new();
        for err in &result.errors {
            let field_name = err.field_path.trim_start_matches("$.");
            if let Some(spec) = fields.get(field_name) {
                let description = spec
                    .description
                    .clone()
                    .unwrap_or_else(|| "no description".to_string());
                missing.push(format!(
                    "'{field_name}' ({}): {description}",
                    spec.field_type
                ));
            }
        }
        if missing.is_empty() {
            None
        } else {
            Some(format!(
                "Missing or invalid required input fields: {}",
                missing.join(", ")
            ))
        }
    };

    (result, filled, suggested_prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_required_properties() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let result = validate(&schema, &serde_json::json!({}));
        assert!(!result.is_valid());
        assert_eq!(result.errors[0].field_path, "$.name");
    }

    #[test]
    fn validates_enum_and_range() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "tier": {"type": "string", "enum": ["basic", "premium"]},
                "age": {"type": "integer", "minimum": 0, "maximum": 120}
            }
        });
        let result = validate(&schema, &serde_json::json!({"tier": "gold", "age": 200}));
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn validates_pattern_and_lengths() {
        let schema = serde_json::json!({
            "type": "string",
            "minLength": 2,
            "maxLength": 5,
            "pattern": "^[a-z]+$"
        });
        assert!(!validate(&schema, &serde_json::json!("A")).is_valid());
        assert!(validate(&schema, &serde_json::json!("abc")).is_valid());
    }

    #[test]
    fn resolves_intra_document_ref() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {"user": {"$ref": "#/$defs/user"}},
            "$defs": {"user": {"type": "object", "required": ["id"]}}
        });
        let result = validate(&schema, &serde_json::json!({"user": {}}));
        assert_eq!(result.errors[0].field_path, "$.user.id");
    }

    #[test]
    fn suggested_prompt_lists_missing_fields() {
        let mut fields = HashMap::new();
        fields.insert(
            "userId".to_string(),
            InputFieldSpec {
                field_type: "integer".to_string(),
                required: true,
                default: None,
                description: Some("the user id".to_string()),
            },
        );
        let (result, _, prompt) = validate_workflow_input(&fields, &serde_json::json!({}));
        assert!(!result.is_valid());
        let prompt = prompt.unwrap();
        assert!(prompt.contains("userId"));
        assert!(prompt.contains("the user id"));
    }

    #[test]
    fn defaults_are_applied_before_validation() {
        let mut fields = HashMap::new();
        fields.insert(
            "limit".to_string(),
            InputFieldSpec {
                field_type: "integer".to_string(),
                required: true,
                default: Some(Value::from(10)),
                description: None,
            },
        );
        let (result, filled, _) = validate_workflow_input(&fields, &serde_json::json!({}));
        assert!(result.is_valid());
        assert_eq!(filled["limit"], Value::from(10));
    }
}
