use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::db::sanitize::validate_path;
use crate::error::Result;

/// Encode a dotted document path as a JSON path literal: `a.b.c` →
/// `$.a.b.c`. Numeric segments are emitted in property form; the engine
/// resolves them against arrays and objects alike.
pub fn json_path(path: &str) -> Result<String> {
  validate_path(path)?;
  Ok(format!("$.{path}"))
}

/// SQL expression extracting `path` from a JSON document column.
pub fn extract_expr(column: &str, path: &str) -> Result<String> {
  Ok(format!("json_extract({column}, '{}')", json_path(path)?))
}

/// Bind a comparison operand. Booleans coerce to 0/1 (matching what
/// `json_extract` yields for JSON booleans); arrays and objects bind as
/// their minified JSON text, which equals the engine's rendering.
pub fn bind_comparable(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => SqlValue::Integer(i),
      None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    nested => SqlValue::Text(nested.to_string()),
  }
}

/// Bind an update operand as JSON text, to be rehydrated with `json(?)` so
/// nested values keep their structure.
pub fn bind_json(value: &Value) -> SqlValue {
  SqlValue::Text(value.to_string())
}
