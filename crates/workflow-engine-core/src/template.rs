// Copyright (c) 2025 Workflow Engine Team
// SPDX-License-Identifier: Apache-2.0

//! Template Resolver: expands `{{ <path> [| <filter>...] }}` expressions
//! against a [`ContextSnapshot`](crate::context::ContextSnapshot).
//!
//! Grammar (spec §4.1): a path is a dotted sequence of identifiers with
//! optional integer subscripts (`tasks.fetch-user.output.orders[0].id`).
//! Filters: `toJson` and `default:<literal>`, composed left-to-right.
//!
//! This does not reuse a general-purpose template-engine crate: the
//! pipe-filter path grammar above has no clean mapping onto helper-style
//! template syntax, and the whole-string type-preservation rule
//! (`"{{ input.count }}"` must return the JSON integer, not `"42"`) needs
//! direct access to the resolved `serde_json::Value`, not a rendered
//! string. See DESIGN.md for the full justification.

use crate::context::ContextSnapshot;
use crate::error::{OrchestratorError, Result};
use serde_json::Value;

/// One segment of a resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    ToJson,
    Default(Value),
}

#[derive(Debug, Clone)]
struct TemplateExpr {
    path: Vec<PathSegment>,
    filters: Vec<Filter>,
}

/// Finds the span (byte offsets into `s`, inclusive of the braces) and the
/// trimmed inner text of every `{{ ... }}` occurrence in `s`.
fn find_expressions(s: &str) -> Result<Vec<(usize, usize, &str)>> {
    let mut out = Vec::new();
    let bytes = s.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            let start = i;
            let close = s[i + 2..]
                .find("}}")
                .ok_or_else(|| OrchestratorError::TemplateMalformed(format!("unterminated '{{{{' in: {s}")))?;
            let inner_start = i + 2;
            let inner_end = inner_start + close;
            let end = inner_end + 2;
            out.push((start, end, s[inner_start..inner_end].trim()));
            i = end;
        } else {
            i += 1;
        }
    }
    Ok(out)
}

pub(crate) fn parse_path(path_str: &str) -> Result<Vec<PathSegment>> {
    if path_str.is_empty() {
        return Err(OrchestratorError::TemplateMalformed(
            "empty template path".into(),
        ));
    }
    let mut segments = Vec::new();
    for piece in path_str.split('.') {
        if piece.is_empty() {
            return Err(OrchestratorError::TemplateMalformed(format!(
                "empty path segment in '{path_str}'"
            )));
        }
        if let Some(bracket_pos) = piece.find('[') {
            let key = &piece[..bracket_pos];
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            let mut rest = &piece[bracket_pos..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']').ok_or_else(|| {
                    OrchestratorError::TemplateMalformed(format!(
                        "unterminated subscript in '{piece}'"
                    ))
                })?;
                let idx: usize = stripped[..close].parse().map_err(|_| {
                    OrchestratorError::TemplateMalformed(format!(
                        "non-integer subscript in '{piece}'"
                    ))
                })?;
                segments.push(PathSegment::Index(idx));
                rest = &stripped[close + 1..];
            }
            if !rest.is_empty() {
                return Err(OrchestratorError::TemplateMalformed(format!(
                    "trailing characters after subscript in '{piece}'"
                )));
            }
        } else {
            segments.push(PathSegment::Key(piece.to_string()));
        }
    }
    Ok(segments)
}

fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    if let Some(unquoted) = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
    {
        return Value::String(unquoted.to_string());
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => {
            if let Ok(i) = raw.parse::<i64>() {
                Value::from(i)
            } else if let Ok(f) = raw.parse::<f64>() {
                Value::from(f)
            } else {
                Value::String(raw.to_string())
            }
        }
    }
}

fn parse_filter(raw: &str) -> Result<Filter> {
    let raw = raw.trim();
    if raw == "toJson" {
        return Ok(Filter::ToJson);
    }
    if let Some(arg) = raw.strip_prefix("default:") {
        return Ok(Filter::Default(parse_literal(arg)));
    }
    Err(OrchestratorError::TemplateMalformed(format!(
        "unknown filter '{raw}'"
    )))
}

fn parse_expression(inner: &str) -> Result<TemplateExpr> {
    let mut parts = inner.split('|');
    let path_str = parts.next().unwrap_or("").trim();
    let path = parse_path(path_str)?;
    let mut filters = Vec::new();
    for filter_str in parts {
        filters.push(parse_filter(filter_str)?);
    }
    Ok(TemplateExpr { path, filters })
}

/// Resolves one parsed expression against a snapshot, applying filters
/// left-to-right (spec §9 Open Question: composition order).
fn eval_expression(expr: &TemplateExpr, snapshot: &ContextSnapshot) -> Result<Value> {
    let mut current = snapshot.get_path(&expr.path).cloned();
    for filter in &expr.filters {
        match filter {
            Filter::Default(default_value) => {
                if matches!(current, None | Some(Value::Null)) {
                    current = Some(default_value.clone());
                }
            }
            Filter::ToJson => {
                let value = current.clone().unwrap_or(Value::Null);
                let encoded = serde_json::to_string(&value).map_err(OrchestratorError::from)?;
                current = Some(Value::String(encoded));
            }
        }
    }
    current.ok_or_else(|| OrchestratorError::TemplateMissingBinding {
        path: path_to_string(&expr.path),
    })
}

fn path_to_string(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for (i, seg) in path.iter().enumerate() {
        match seg {
            PathSegment::Key(k) => {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathSegment::Index(idx) => {
                out.push_str(&format!("[{idx}]"));
            }
        }
    }
    out
}

/// JSON-encodes a scalar for embedding in surrounding text: strings and
/// null are unquoted, numbers/bools print as-is, objects/arrays are
/// compact JSON (spec §4.1: "scalars unquoted").
fn embed_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

/// Resolves a single string: if it is exactly one `{{ ... }}` expression
/// (ignoring surrounding whitespace), the resolved value's type is
/// preserved. Otherwise every embedded expression is replaced in place and
/// the result is always a string.
pub fn resolve_string(s: &str, snapshot: &ContextSnapshot) -> Result<Value> {
    let expressions = find_expressions(s)?;
    if expressions.is_empty() {
        return Ok(Value::String(s.to_string()));
    }

    if expressions.len() == 1
        && s[..expressions[0].0].trim().is_empty()
        && s[expressions[0].1..].trim().is_empty()
    {
        let expr = parse_expression(expressions[0].2)?;
        return eval_expression(&expr, snapshot);
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for (start, end, inner) in expressions {
        out.push_str(&s[last..start]);
        let expr = parse_expression(inner)?;
        let value = eval_expression(&expr, snapshot)?;
        out.push_str(&embed_as_string(&value));
        last = end;
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

/// Recursively resolves every string leaf in a JSON value (objects and
/// arrays are traversed; non-string leaves pass through unchanged).
pub fn resolve_value(value: &Value, snapshot: &ContextSnapshot) -> Result<Value> {
    match value {
        Value::String(s) => resolve_string(s, snapshot),
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve_value(item, snapshot)?);
            }
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_value(v, snapshot)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Scans a raw (unresolved) string for `tasks.<id>.output...` references,
/// used by the graph builder to discover implicit dependency edges. Never
/// fails — malformed templates are reported later, at resolution time.
pub fn extract_task_refs(s: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let Ok(expressions) = find_expressions(s) else {
        return refs;
    };
    for (_, _, inner) in expressions {
        let path_str = inner.split('|').next().unwrap_or("").trim();
        if let Some(rest) = path_str.strip_prefix("tasks.") {
            if let Some(id) = rest.split('.').next() {
                if !id.is_empty() {
                    refs.push(id.to_string());
                }
            }
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextSnapshot;

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot::from_value(serde_json::json!({
            "input": {"count": 42, "name": "Ada"},
            "tasks": {
                "a": {"output": {"name": "Ada", "orders": [{"id": 9}]}}
            },
            "forEach": {}
        }))
    }

    #[test]
    fn whole_string_preserves_type() {
        let snap = snapshot();
        let result = resolve_string("{{ input.count }}", &snap).unwrap();
        assert_eq!(result, Value::from(42));
    }

    #[test]
    fn embedded_expression_coerces_to_string() {
        let snap = snapshot();
        let result = resolve_string("hi {{tasks.a.output.name}}", &snap).unwrap();
        assert_eq!(result, Value::String("hi Ada".to_string()));
    }

    #[test]
    fn subscript_path_resolves() {
        let snap = snapshot();
        let result = resolve_string("{{ tasks.a.output.orders[0].id }}", &snap).unwrap();
        assert_eq!(result, Value::from(9));
    }

    #[test]
    fn missing_binding_without_default_fails() {
        let snap = snapshot();
        let err = resolve_string("{{ input.missing }}", &snap).unwrap_err();
        assert_eq!(err.kind(), "TemplateMissingBinding");
    }

    #[test]
    fn default_filter_substitutes_missing() {
        let snap = snapshot();
        let result = resolve_string("{{ input.missing | default:7 }}", &snap).unwrap();
        assert_eq!(result, Value::from(7));
    }

    #[test]
    fn to_json_filter_serializes() {
        let snap = snapshot();
        let result = resolve_string("{{ tasks.a.output | toJson }}", &snap).unwrap();
        assert!(matches!(result, Value::String(_)));
        if let Value::String(s) = result {
            assert!(s.contains("\"name\":\"Ada\""));
        }
    }

    #[test]
    fn unknown_filter_is_malformed() {
        let snap = snapshot();
        let err = resolve_string("{{ input.count | bogus }}", &snap).unwrap_err();
        assert_eq!(err.kind(), "TemplateMalformed");
    }

    #[test]
    fn nested_structure_resolves_leaves() {
        let snap = snapshot();
        let value = serde_json::json!({
            "greeting": "hi {{tasks.a.output.name}}",
            "nested": ["{{ input.count }}", 3],
        });
        let resolved = resolve_value(&value, &snap).unwrap();
        assert_eq!(resolved["greeting"], Value::String("hi Ada".to_string()));
        assert_eq!(resolved["nested"][0], Value::from(42));
        assert_eq!(resolved["nested"][1], Value::from(3));
    }

    #[test]
    fn extracts_implicit_task_refs() {
        let refs = extract_task_refs("{{ tasks.fetch-user.output.name }} and {{tasks.other.output}}");
        assert_eq!(refs, vec!["fetch-user".to_string(), "other".to_string()]);
    }
}
