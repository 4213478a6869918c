//! Tool-call argument validation against the declared input schema.

use crate::error::BridgeError;
use crate::registry::ToolDescriptor;
use serde_json::Value;

/// Validate `args` against the tool's declared input schema.
///
/// Collects every violation rather than stopping at the first: unknown
/// parameters (with did-you-mean suggestions), missing required parameters,
/// and JSON Schema constraint violations.
pub fn validate_arguments(tool: &ToolDescriptor, args: &Value) -> Result<(), BridgeError> {
    let schema = &tool.input_schema;
    let props = schema
        .get("properties")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();
    let required: Vec<String> = schema
        .get("required")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();

    let args_obj = args.as_object().cloned().unwrap_or_default();
    let valid_params: Vec<String> = props.keys().cloned().collect();
    let valid_param_refs: Vec<&str> = valid_params.iter().map(String::as_str).collect();

    let mut violations: Vec<Value> = Vec::new();

    // Unknown parameters (with suggestions).
    for k in args_obj.keys() {
        if props.contains_key(k) {
            continue;
        }
        let suggestions = find_similar_strings(k, &valid_param_refs);
        violations.push(serde_json::json!({
            "type": "invalid-parameter",
            "parameter": k,
            "suggestions": suggestions,
            "validParameters": valid_params,
        }));
    }

    // Missing required parameters.
    for r in &required {
        if !args_obj.contains_key(r) {
            violations.push(serde_json::json!({
                "type": "missing-required-parameter",
                "parameter": r,
            }));
        }
    }

    // JSON Schema validation (types/constraints).
    if let Ok(compiled) = jsonschema::validator_for(schema) {
        for e in compiled.iter_errors(args) {
            // Filter out "required" errors; we already report them with a nicer shape.
            if matches!(
                e.kind(),
                jsonschema::error::ValidationErrorKind::Required { .. }
            ) {
                continue;
            }
            let instance_path = e.instance_path().to_string();
            violations.push(serde_json::json!({
                "type": "constraint-violation",
                "message": e.to_string(),
                "instancePath": instance_path,
            }));
        }
    }

    if violations.is_empty() {
        return Ok(());
    }

    // Message: optimize for unknown-parameter typos (even if there are other violations too).
    let message = if let Some(v) = violations
        .iter()
        .find(|v| v.get("type").and_then(|t| t.as_str()) == Some("invalid-parameter"))
    {
        let p = v.get("parameter").and_then(|v| v.as_str()).unwrap_or("?");
        let suggestion = v
            .get("suggestions")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|v| v.as_str());
        if let Some(s) = suggestion {
            format!("unknown parameter '{p}' (did you mean '{s}'?)")
        } else {
            format!("unknown parameter '{p}'")
        }
    } else {
        format!("validation failed with {} error(s)", violations.len())
    };

    Err(BridgeError::InvalidArguments {
        tool: tool.name.clone(),
        message,
        violations: Value::Array(violations),
    })
}

fn find_similar_strings(unknown: &str, known: &[&str]) -> Vec<String> {
    let mut candidates: Vec<(f64, String)> = Vec::new();
    for k in known {
        let score = strsim::jaro(unknown, k);
        if score > 0.7 {
            candidates.push((score, (*k).to_string()));
        }
    }
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    candidates.into_iter().map(|(_, s)| s).collect()
}
