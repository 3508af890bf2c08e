use serde_json::{Number, Value};

use crate::error::{Error, Result};
use crate::types::document::{get_path, remove_path, set_path, Document, ID_FIELD};

/// A parsed update expression: either a full replacement document or an
/// ordered list of operator applications.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
  Replace(Document),
  Ops(Vec<UpdateOp>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
  Set { path: String, value: Value },
  Unset { path: String },
  Inc { path: String, amount: Number },
  Push { path: String, value: Value },
  Pull { path: String, predicate: Value },
  Rename { from: String, to: String },
}

impl UpdateSpec {
  /// Parse an update document. Presence of any `$`-operator key selects
  /// operator mode; mixing operator and plain keys is rejected. Anything
  /// else is a replacement document.
  pub fn parse(value: &Value) -> Result<UpdateSpec> {
    let obj = value
      .as_object()
      .ok_or_else(|| Error::validation("update must be an object"))?;

    if !obj.keys().any(|k| k.starts_with('$')) {
      return Ok(UpdateSpec::Replace(obj.clone()));
    }

    let mut ops = Vec::new();
    for (key, arg) in obj {
      if !key.starts_with('$') {
        return Err(Error::validation(
          "cannot mix update operators with replacement fields",
        ));
      }
      let entries = arg
        .as_object()
        .ok_or_else(|| Error::validation(format!("{key} expects an object of paths")))?;
      if entries.is_empty() {
        return Err(Error::validation(format!("{key} is empty")));
      }
      for (path, operand) in entries {
        ops.push(Self::parse_op(key, path, operand)?);
      }
    }
    Ok(UpdateSpec::Ops(ops))
  }

  fn parse_op(op: &str, path: &str, operand: &Value) -> Result<UpdateOp> {
    reject_id_path(path)?;
    if op == "$rename" {
      if let Some(target) = operand.as_str() {
        reject_id_path(target)?;
      }
    }
    let path = path.to_string();
    let parsed = match op {
      "$set" => UpdateOp::Set {
        path,
        value: operand.clone(),
      },
      "$unset" => UpdateOp::Unset { path },
      "$inc" => UpdateOp::Inc {
        path,
        amount: operand
          .as_number()
          .cloned()
          .ok_or_else(|| Error::validation("$inc expects a numeric amount"))?,
      },
      "$push" => UpdateOp::Push {
        path,
        value: operand.clone(),
      },
      "$pull" => UpdateOp::Pull {
        path,
        predicate: operand.clone(),
      },
      "$rename" => UpdateOp::Rename {
        from: path,
        to: operand
          .as_str()
          .ok_or_else(|| Error::validation("$rename expects a string target path"))?
          .to_string(),
      },
      other => return Err(Error::validation(format!("unknown update operator: {other}"))),
    };
    Ok(parsed)
  }

  /// True when the update cannot be expressed as a single SQL rewrite and
  /// must take the read-modify-write path.
  pub fn needs_read_modify_write(&self) -> bool {
    match self {
      UpdateSpec::Replace(_) => false,
      UpdateSpec::Ops(ops) => ops.iter().any(|op| matches!(op, UpdateOp::Pull { .. })),
    }
  }
}

impl UpdateOp {
  /// Apply this operator to a document in memory. Mirrors the SQL
  /// translation so both execution paths agree.
  pub fn apply(&self, doc: &mut Document) {
    match self {
      UpdateOp::Set { path, value } => set_path(doc, path, value.clone()),
      UpdateOp::Unset { path } => {
        remove_path(doc, path);
      }
      UpdateOp::Inc { path, amount } => {
        let current = get_path(doc, path).and_then(numeric).unwrap_or(0.0);
        let next = current + amount.as_f64().unwrap_or(0.0);
        let value = if next.fract() == 0.0 && next.abs() < 9.0e15 {
          Value::from(next as i64)
        } else {
          Value::from(next)
        };
        set_path(doc, path, value);
      }
      UpdateOp::Push { path, value } => match get_path(doc, path) {
        Some(Value::Array(items)) => {
          let mut items = items.clone();
          items.push(value.clone());
          set_path(doc, path, Value::Array(items));
        }
        _ => set_path(doc, path, Value::Array(vec![value.clone()])),
      },
      UpdateOp::Pull { path, predicate } => {
        if let Some(Value::Array(items)) = get_path(doc, path) {
          let kept: Vec<Value> = items
            .iter()
            .filter(|item| !pull_matches(predicate, item))
            .cloned()
            .collect();
          set_path(doc, path, Value::Array(kept));
        }
      }
      UpdateOp::Rename { from, to } => {
        let value = remove_path(doc, from).unwrap_or(Value::Null);
        set_path(doc, to, value);
      }
    }
  }
}

fn reject_id_path(path: &str) -> Result<()> {
  if path == ID_FIELD || path.starts_with("_id.") {
    return Err(Error::validation("_id is immutable"));
  }
  Ok(())
}

/// Evaluate a `$pull` predicate against one array element: an operator
/// mapping applies each comparison, anything else is deep equality.
fn pull_matches(predicate: &Value, item: &Value) -> bool {
  match predicate {
    Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
      ops.iter().all(|(op, operand)| match op.as_str() {
        "$eq" => values_equal(operand, item),
        "$ne" => !values_equal(operand, item),
        "$gt" => compare(item, operand).is_some_and(|o| o.is_gt()),
        "$gte" => compare(item, operand).is_some_and(|o| o.is_ge()),
        "$lt" => compare(item, operand).is_some_and(|o| o.is_lt()),
        "$lte" => compare(item, operand).is_some_and(|o| o.is_le()),
        "$in" => operand
          .as_array()
          .is_some_and(|list| list.iter().any(|v| values_equal(v, item))),
        "$nin" => operand
          .as_array()
          .is_some_and(|list| !list.iter().any(|v| values_equal(v, item))),
        _ => false,
      })
    }
    other => values_equal(other, item),
  }
}

fn numeric(value: &Value) -> Option<f64> {
  value.as_f64()
}

fn values_equal(a: &Value, b: &Value) -> bool {
  match (a.as_f64(), b.as_f64()) {
    (Some(x), Some(y)) => x == y,
    _ => a == b,
  }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
  match (a, b) {
    (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
    (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
    _ => None,
  }
}
