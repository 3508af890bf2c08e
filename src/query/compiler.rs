use rusqlite::types::Value as SqlValue;

use crate::error::Result;
use crate::query::path::{bind_comparable, extract_expr};
use crate::types::{CmpOp, Filter, ID_FIELD};

/// A WHERE fragment plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
  pub sql: String,
  pub params: Vec<SqlValue>,
}

/// Folds a filter tree into SQL over JSON-extracted values. Parameterised
/// by the document and id columns so the same compiler serves collection
/// tables (`data`/`_id`) and change-log images (`after_json`/`before_json`
/// with `doc_id`).
pub struct FilterCompiler<'a> {
  doc_column: &'a str,
  id_column: &'a str,
}

impl<'a> FilterCompiler<'a> {
  pub fn new(doc_column: &'a str, id_column: &'a str) -> Self {
    Self {
      doc_column,
      id_column,
    }
  }

  pub fn for_collection() -> Self {
    Self::new("data", "_id")
  }

  pub fn compile(&self, filter: &Filter) -> Result<CompiledFilter> {
    let mut sql = String::new();
    let mut params = Vec::new();
    self.emit(filter, &mut sql, &mut params)?;
    Ok(CompiledFilter { sql, params })
  }

  fn emit(&self, filter: &Filter, out: &mut String, params: &mut Vec<SqlValue>) -> Result<()> {
    match filter {
      Filter::All => out.push('1'),
      Filter::And(children) => self.emit_joined(children, " AND ", false, out, params)?,
      Filter::Or(children) => self.emit_joined(children, " OR ", false, out, params)?,
      Filter::Nor(children) => self.emit_joined(children, " AND ", true, out, params)?,
      Filter::Not(child) => {
        out.push_str("NOT (");
        self.emit(child, out, params)?;
        out.push(')');
      }
      Filter::Leaf { path, op } => self.emit_leaf(path, op, out, params)?,
    }
    Ok(())
  }

  fn emit_joined(
    &self,
    children: &[Filter],
    joiner: &str,
    negate_each: bool,
    out: &mut String,
    params: &mut Vec<SqlValue>,
  ) -> Result<()> {
    out.push('(');
    for (i, child) in children.iter().enumerate() {
      if i > 0 {
        out.push_str(joiner);
      }
      if negate_each {
        out.push_str("NOT (");
      }
      self.emit(child, out, params)?;
      if negate_each {
        out.push(')');
      }
    }
    out.push(')');
    Ok(())
  }

  fn emit_leaf(
    &self,
    path: &str,
    op: &CmpOp,
    out: &mut String,
    params: &mut Vec<SqlValue>,
  ) -> Result<()> {
    // Top-level `_id` hits the indexed column directly.
    let expr = if path == ID_FIELD {
      self.id_column.to_string()
    } else {
      extract_expr(self.doc_column, path)?
    };

    match op {
      CmpOp::Eq(v) if v.is_null() => out.push_str(&format!("{expr} IS NULL")),
      CmpOp::Eq(v) => {
        out.push_str(&format!("{expr} = ?"));
        params.push(bind_comparable(v));
      }
      CmpOp::Ne(v) if v.is_null() => out.push_str(&format!("{expr} IS NOT NULL")),
      CmpOp::Ne(v) => {
        out.push_str(&format!("{expr} != ?"));
        params.push(bind_comparable(v));
      }
      CmpOp::Gt(v) => {
        out.push_str(&format!("{expr} > ?"));
        params.push(bind_comparable(v));
      }
      CmpOp::Gte(v) => {
        out.push_str(&format!("{expr} >= ?"));
        params.push(bind_comparable(v));
      }
      CmpOp::Lt(v) => {
        out.push_str(&format!("{expr} < ?"));
        params.push(bind_comparable(v));
      }
      CmpOp::Lte(v) => {
        out.push_str(&format!("{expr} <= ?"));
        params.push(bind_comparable(v));
      }
      CmpOp::In(values) if values.is_empty() => out.push('0'),
      CmpOp::In(values) => {
        out.push_str(&format!("{expr} IN ({})", placeholders(values.len())));
        params.extend(values.iter().map(bind_comparable));
      }
      CmpOp::Nin(values) if values.is_empty() => out.push('1'),
      CmpOp::Nin(values) => {
        out.push_str(&format!("{expr} NOT IN ({})", placeholders(values.len())));
        params.extend(values.iter().map(bind_comparable));
      }
      CmpOp::Exists(true) => out.push_str(&format!("{expr} IS NOT NULL")),
      CmpOp::Exists(false) => out.push_str(&format!("{expr} IS NULL")),
      CmpOp::Like(pattern) => {
        out.push_str(&format!("{expr} LIKE ?"));
        params.push(SqlValue::Text(pattern.clone()));
      }
    }
    Ok(())
  }
}

fn placeholders(n: usize) -> String {
  let mut s = String::with_capacity(n * 3);
  for i in 0..n {
    if i > 0 {
      s.push_str(", ");
    }
    s.push('?');
  }
  s
}
