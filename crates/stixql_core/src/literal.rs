use serde_json::Value;

/// Render a scalar JSON value as a query-text literal. Strings are quoted and
/// escaped through the JSON encoder so embedded quotes can never break out of
/// the clause; numbers and booleans render bare.
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string()),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "\"\"".to_string(),
        // Arrays/objects are structural; callers split them before rendering.
        other => serde_json::to_string(other).unwrap_or_else(|_| "\"\"".to_string()),
    }
}
