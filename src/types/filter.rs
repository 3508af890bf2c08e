use serde_json::Value;

use crate::error::{Error, Result};

/// A parsed filter expression: leaves are path/operator/value triples,
/// internal nodes are logical combinators.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
  /// Matches every document. Produced by the empty filter `{}`.
  All,
  And(Vec<Filter>),
  Or(Vec<Filter>),
  Nor(Vec<Filter>),
  Not(Box<Filter>),
  Leaf { path: String, op: CmpOp },
}

/// Comparison operators. Closed set; anything else is rejected at parse
/// time.
#[derive(Debug, Clone, PartialEq)]
pub enum CmpOp {
  Eq(Value),
  Ne(Value),
  Gt(Value),
  Gte(Value),
  Lt(Value),
  Lte(Value),
  In(Vec<Value>),
  Nin(Vec<Value>),
  Exists(bool),
  /// `$regex`, restricted to the engine's LIKE dialect.
  Like(String),
}

impl Filter {
  /// Parse a filter document. Top-level keys combine with AND; a value that
  /// is a mapping whose keys all begin with `$` is an operator application
  /// set, any other value is an equality match.
  pub fn parse(value: &Value) -> Result<Filter> {
    let obj = value
      .as_object()
      .ok_or_else(|| Error::validation("filter must be an object"))?;
    if obj.is_empty() {
      return Ok(Filter::All);
    }

    let mut clauses = Vec::with_capacity(obj.len());
    for (key, val) in obj {
      match key.as_str() {
        "$and" => clauses.push(Filter::And(Self::parse_list("$and", val)?)),
        "$or" => clauses.push(Filter::Or(Self::parse_list("$or", val)?)),
        "$nor" => clauses.push(Filter::Nor(Self::parse_list("$nor", val)?)),
        "$not" => clauses.push(Filter::Not(Box::new(Self::parse(val)?))),
        k if k.starts_with('$') => {
          return Err(Error::validation(format!("unknown operator: {k}")));
        }
        path => clauses.push(Self::parse_field(path, val)?),
      }
    }

    Ok(match clauses.len() {
      1 => clauses.remove(0),
      _ => Filter::And(clauses),
    })
  }

  fn parse_list(op: &str, value: &Value) -> Result<Vec<Filter>> {
    let items = value
      .as_array()
      .ok_or_else(|| Error::validation(format!("{op} expects an array")))?;
    if items.is_empty() {
      return Err(Error::validation(format!("{op} requires a non-empty array")));
    }
    items.iter().map(Self::parse).collect()
  }

  fn parse_field(path: &str, value: &Value) -> Result<Filter> {
    match value {
      Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
        let mut leaves = Vec::with_capacity(ops.len());
        for (op, operand) in ops {
          if op == "$not" {
            leaves.push(Filter::Not(Box::new(Self::parse_field(path, operand)?)));
          } else {
            leaves.push(Filter::Leaf {
              path: path.to_string(),
              op: Self::parse_cmp(op, operand)?,
            });
          }
        }
        Ok(match leaves.len() {
          1 => leaves.remove(0),
          _ => Filter::And(leaves),
        })
      }
      other => Ok(Filter::Leaf {
        path: path.to_string(),
        op: CmpOp::Eq(other.clone()),
      }),
    }
  }

  fn parse_cmp(op: &str, operand: &Value) -> Result<CmpOp> {
    let cmp = match op {
      "$eq" => CmpOp::Eq(operand.clone()),
      "$ne" => CmpOp::Ne(operand.clone()),
      "$gt" => CmpOp::Gt(operand.clone()),
      "$gte" => CmpOp::Gte(operand.clone()),
      "$lt" => CmpOp::Lt(operand.clone()),
      "$lte" => CmpOp::Lte(operand.clone()),
      "$in" => CmpOp::In(Self::operand_list("$in", operand)?),
      "$nin" => CmpOp::Nin(Self::operand_list("$nin", operand)?),
      "$exists" => CmpOp::Exists(
        operand
          .as_bool()
          .ok_or_else(|| Error::validation("$exists expects a boolean"))?,
      ),
      "$regex" => CmpOp::Like(
        operand
          .as_str()
          .ok_or_else(|| Error::validation("$regex expects a string pattern"))?
          .to_string(),
      ),
      other => return Err(Error::validation(format!("unknown operator: {other}"))),
    };
    Ok(cmp)
  }

  fn operand_list(op: &str, operand: &Value) -> Result<Vec<Value>> {
    operand
      .as_array()
      .map(|a| a.to_vec())
      .ok_or_else(|| Error::validation(format!("{op} expects an array")))
  }

  /// Top-level equality constraints, used to synthesise upsert documents.
  /// Descends AND nodes only.
  pub fn equality_constraints(&self) -> Vec<(&str, &Value)> {
    let mut out = Vec::new();
    self.collect_equalities(&mut out);
    out
  }

  fn collect_equalities<'a>(&'a self, out: &mut Vec<(&'a str, &'a Value)>) {
    match self {
      Filter::And(children) => {
        for child in children {
          child.collect_equalities(out);
        }
      }
      Filter::Leaf {
        path,
        op: CmpOp::Eq(value),
      } => out.push((path, value)),
      _ => {}
    }
  }
}
