use rusqlite::params;

use crate::collection::Collection;
use crate::db::sanitize::quote_ident;
use crate::error::{Error, Result};
use crate::query::path::extract_expr;
use crate::types::{SortDirection, SortSpec, ID_FIELD};

/// A declarative index: its catalogue name and ordered `(path, direction)`
/// keys.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
  pub name: String,
  pub keys: Vec<(String, SortDirection)>,
}

impl Collection {
  /// Create an expression index over JSON paths from a `{path: 1 | -1}`
  /// specification. Returns the index name. Idempotent.
  pub async fn create_index(&self, keys: serde_json::Value) -> Result<String> {
    self.db.ensure_collection(&self.name).await?;
    let spec = SortSpec::parse(&keys)?;
    if spec.is_empty() {
      return Err(Error::validation("index spec must name at least one path"));
    }

    let name = index_name(&self.name, &spec);
    let mut terms = Vec::with_capacity(spec.0.len());
    for (path, direction) in &spec.0 {
      let expr = if path == ID_FIELD {
        ID_FIELD.to_string()
      } else {
        extract_expr("data", path)?
      };
      terms.push(format!("{expr} {}", direction.sql()));
    }
    let ddl = format!(
      "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
      quote_ident(&name),
      quote_ident(&self.name),
      terms.join(", ")
    );
    self
      .db
      .inner
      .conn
      .call(move |conn| conn.execute_batch(&ddl).map_err(|e| e.into()))
      .await?;
    tracing::debug!(index = %name, collection = %self.name, "index created");
    Ok(name)
  }

  pub async fn drop_index(&self, name: &str) -> Result<()> {
    self.db.guard()?;
    let sql = format!("DROP INDEX IF EXISTS {}", quote_ident(name));
    self
      .db
      .inner
      .conn
      .call(move |conn| conn.execute_batch(&sql).map_err(|e| e.into()))
      .await?;
    Ok(())
  }

  /// Read this collection's indexes back from the engine catalogue,
  /// parsing each defining expression into `(path, direction)` keys.
  pub async fn list_indexes(&self) -> Result<Vec<IndexModel>> {
    self.db.ensure_collection(&self.name).await?;
    let table = self.name.clone();
    let raw: Vec<(String, String)> = self
      .db
      .inner
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(
          "SELECT name, sql FROM sqlite_master \
           WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL \
           ORDER BY name",
        )?;
        let mut rows = stmt.query(params![table])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
          out.push((row.get(0)?, row.get(1)?));
        }
        Ok(out)
      })
      .await?;

    Ok(
      raw
        .into_iter()
        .map(|(name, sql)| IndexModel {
          name,
          keys: parse_index_keys(&sql),
        })
        .collect(),
    )
  }
}

/// `<coll>_<sanitised-key-spec>`, e.g. `{a: 1, b.c: -1}` on `users` →
/// `users_a_1_b_c_-1`.
fn index_name(collection: &str, spec: &SortSpec) -> String {
  let mut name = collection.to_string();
  for (path, direction) in &spec.0 {
    name.push('_');
    name.push_str(&path.replace('.', "_"));
    name.push('_');
    name.push_str(match direction {
      SortDirection::Asc => "1",
      SortDirection::Desc => "-1",
    });
  }
  name
}

/// Parse the parenthesised column list of an index's defining SQL back into
/// `(path, direction)` pairs: split on commas at bracket depth 0, read the
/// trailing direction keyword, and unwrap `json_extract(data, '$....')`.
/// Anything else is used as the path verbatim.
fn parse_index_keys(sql: &str) -> Vec<(String, SortDirection)> {
  let Some(open) = sql.find('(') else {
    return Vec::new();
  };
  let Some(close) = sql.rfind(')') else {
    return Vec::new();
  };
  if close <= open {
    return Vec::new();
  }

  let body = &sql[open + 1..close];
  let mut keys = Vec::new();
  let mut depth = 0usize;
  let mut start = 0usize;
  for (i, c) in body.char_indices() {
    match c {
      '(' => depth += 1,
      ')' => depth = depth.saturating_sub(1),
      ',' if depth == 0 => {
        if let Some(key) = parse_key_segment(&body[start..i]) {
          keys.push(key);
        }
        start = i + 1;
      }
      _ => {}
    }
  }
  if let Some(key) = parse_key_segment(&body[start..]) {
    keys.push(key);
  }
  keys
}

fn parse_key_segment(segment: &str) -> Option<(String, SortDirection)> {
  let segment = segment.trim();
  if segment.is_empty() {
    return None;
  }
  let upper = segment.to_ascii_uppercase();
  let (expr, direction) = if let Some(stripped) = upper.strip_suffix(" DESC") {
    (&segment[..stripped.len()], SortDirection::Desc)
  } else if let Some(stripped) = upper.strip_suffix(" ASC") {
    (&segment[..stripped.len()], SortDirection::Asc)
  } else {
    (segment, SortDirection::Asc)
  };

  let expr = expr.trim();
  let path = expr
    .strip_prefix("json_extract(data, '$.")
    .and_then(|rest| rest.strip_suffix("')"))
    .unwrap_or(expr);
  Some((path.to_string(), direction))
}
