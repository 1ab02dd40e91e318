//! 工具参数校验：按注册的 JSON Schema 检查必填字段与基本类型
//!
//! 只覆盖 schemars 为参数记录生成的子集（object / required / type），
//! 更细的约束交给反序列化。

use serde_json::Value;

use crate::core::ToolError;

/// 解析 tool_call 的原始参数文本；空串视为 {}
pub fn parse_arguments(raw: &str) -> Result<Value, ToolError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ToolError::Validation(format!("invalid tool arguments: {e}")))?;
    if !value.is_object() {
        return Err(ToolError::Validation(
            "invalid tool arguments: expected a JSON object".to_string(),
        ));
    }
    Ok(value)
}

/// 按 schema 校验参数
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), ToolError> {
    let obj = args.as_object().ok_or_else(|| {
        ToolError::Validation("invalid tool arguments: expected a JSON object".to_string())
    })?;

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(|r| r.as_str())
            .filter(|name| obj.get(*name).map(|v| v.is_null()).unwrap_or(true))
            .collect();
        if !missing.is_empty() {
            return Err(ToolError::Validation(format!(
                "missing required argument(s): {}",
                missing.join(", ")
            )));
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in obj {
            let Some(prop) = props.get(key) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            if !type_matches(prop.get("type"), value) {
                return Err(ToolError::Validation(format!(
                    "argument '{key}' should be {}",
                    describe_type(prop.get("type"))
                )));
            }
        }
    }

    Ok(())
}

fn type_matches(expected: Option<&Value>, value: &Value) -> bool {
    match expected {
        None => true,
        Some(Value::String(t)) => matches_one(t, value),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .any(|t| matches_one(t, value)),
        Some(_) => true,
    }
}

fn matches_one(ty: &str, value: &Value) -> bool {
    match ty {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe_type(expected: Option<&Value>) -> String {
    match expected {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(" or "),
        _ => "valid".to_string(),
    }
}
