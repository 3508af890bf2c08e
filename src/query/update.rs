use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::error::Result;
use crate::query::path::{bind_comparable, bind_json, json_path};
use crate::types::{UpdateOp, UpdateSpec};

/// How an update statement executes.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledUpdate {
  /// `SET data = <expr>`, built by nesting JSON-function wrappers over the
  /// document column. Params appear in placeholder order.
  Patch {
    set_expr: String,
    params: Vec<SqlValue>,
  },
  /// Full document replacement. The facade forces `_id` back to the matched
  /// row's key with `json_set(?, '$._id', _id)`.
  Replace { doc_json: String },
  /// At least one operator's predicate depends on array content; the whole
  /// update runs client-side inside a transaction.
  ReadModifyWrite,
}

pub fn compile_update(spec: &UpdateSpec) -> Result<CompiledUpdate> {
  match spec {
    UpdateSpec::Replace(doc) => Ok(CompiledUpdate::Replace {
      doc_json: serde_json::to_string(doc)?,
    }),
    UpdateSpec::Ops(_) if spec.needs_read_modify_write() => Ok(CompiledUpdate::ReadModifyWrite),
    UpdateSpec::Ops(ops) => {
      let mut expr = String::from("data");
      let mut params = Vec::new();
      for op in ops {
        expr = wrap(expr, op, &mut params)?;
      }
      Ok(CompiledUpdate::Patch {
        set_expr: expr,
        params,
      })
    }
  }
}

/// Wrap the accumulated rewrite expression in one more operator. Inner
/// reads reference the original `data` column.
fn wrap(prev: String, op: &UpdateOp, params: &mut Vec<SqlValue>) -> Result<String> {
  let sql = match op {
    UpdateOp::Set { path, value } => {
      let p = json_path(path)?;
      params.push(bind_json(value));
      format!("json_set({prev}, '{p}', json(?))")
    }
    UpdateOp::Unset { path } => {
      let p = json_path(path)?;
      format!("json_remove({prev}, '{p}')")
    }
    UpdateOp::Inc { path, amount } => {
      let p = json_path(path)?;
      params.push(bind_comparable(&Value::Number(amount.clone())));
      format!("json_set({prev}, '{p}', COALESCE(json_extract(data, '{p}'), 0) + ?)")
    }
    UpdateOp::Push { path, value } => {
      let p = json_path(path)?;
      params.push(bind_json(value));
      params.push(bind_json(value));
      format!(
        "json_set({prev}, '{p}', json(CASE \
         WHEN json_type(json_extract(data, '{p}')) = 'array' \
         THEN json_insert(json_extract(data, '{p}'), '$[#]', json(?)) \
         ELSE json_array(json(?)) END))"
      )
    }
    UpdateOp::Rename { from, to } => {
      let from_p = json_path(from)?;
      let to_p = json_path(to)?;
      format!("json_remove(json_set({prev}, '{to_p}', json_extract(data, '{from_p}')), '{from_p}')")
    }
    // Diverted to ReadModifyWrite before wrapping starts.
    UpdateOp::Pull { .. } => unreachable!("$pull compiles to read-modify-write"),
  };
  Ok(sql)
}
