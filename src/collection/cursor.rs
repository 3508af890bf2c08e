use std::collections::VecDeque;

use futures_util::stream::{self, Stream};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::collection::{parse_document, Collection};
use crate::db::sanitize::quote_ident;
use crate::error::Result;
use crate::query::path::extract_expr;
use crate::query::FilterCompiler;
use crate::types::{Document, Filter, Projection, SortSpec, ID_FIELD};

/// A lazy, single-pass sequence of documents. Chainable methods accumulate
/// state; the query runs on first iteration and is never restarted.
pub struct Cursor {
  coll: Collection,
  filter: Value,
  sort: Option<Value>,
  projection: Option<Value>,
  skip: Option<u64>,
  limit: Option<u64>,
  state: State,
}

enum State {
  Pending,
  Active(VecDeque<Document>),
}

impl Cursor {
  pub(crate) fn new(coll: Collection, filter: Value) -> Self {
    Self {
      coll,
      filter,
      sort: None,
      projection: None,
      skip: None,
      limit: None,
      state: State::Pending,
    }
  }

  /// Order results by a `{path: 1 | -1}` mapping (key order significant).
  pub fn sort(mut self, spec: Value) -> Self {
    self.sort = Some(spec);
    self
  }

  pub fn skip(mut self, n: u64) -> Self {
    self.skip = Some(n);
    self
  }

  pub fn limit(mut self, n: u64) -> Self {
    self.limit = Some(n);
    self
  }

  /// Shape each result with an inclusion/exclusion projection.
  pub fn project(mut self, spec: Value) -> Self {
    self.projection = Some(spec);
    self
  }

  pub async fn next(&mut self) -> Result<Option<Document>> {
    if let State::Pending = self.state {
      let buffered = self.execute().await?;
      self.state = State::Active(buffered);
    }
    match &mut self.state {
      State::Active(buffered) => Ok(buffered.pop_front()),
      State::Pending => unreachable!(),
    }
  }

  pub async fn to_array(mut self) -> Result<Vec<Document>> {
    let mut out = Vec::new();
    while let Some(doc) = self.next().await? {
      out.push(doc);
    }
    Ok(out)
  }

  pub async fn for_each<F>(mut self, mut f: F) -> Result<()>
  where
    F: FnMut(Document),
  {
    while let Some(doc) = self.next().await? {
      f(doc);
    }
    Ok(())
  }

  /// Re-issue the plan as `SELECT COUNT(*)`, ignoring sort, skip, and
  /// limit.
  pub async fn count(self) -> Result<u64> {
    self.coll.count_documents(self.filter).await
  }

  pub fn into_stream(self) -> impl Stream<Item = Result<Document>> {
    stream::try_unfold(self, |mut cursor| async move {
      Ok(cursor.next().await?.map(|doc| (doc, cursor)))
    })
  }

  async fn execute(&mut self) -> Result<VecDeque<Document>> {
    self.coll.db.ensure_collection(&self.coll.name).await?;

    let tree = Filter::parse(&self.filter)?;
    let projection = match &self.projection {
      Some(spec) => Projection::parse(spec)?,
      None => Projection::Identity,
    };
    let sort = match &self.sort {
      Some(spec) => SortSpec::parse(spec)?,
      None => SortSpec::default(),
    };

    let (sql, params) = build_select(&self.coll.name, &tree, &sort, self.limit, self.skip)?;
    let raw: Vec<String> = self
      .coll
      .db
      .inner
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
          out.push(row.get::<_, String>(1)?);
        }
        Ok(out)
      })
      .await?;

    let mut buffered = VecDeque::with_capacity(raw.len());
    for data in raw {
      let doc = parse_document(&data)?;
      buffered.push_back(projection.apply(&doc));
    }
    Ok(buffered)
  }
}

/// Assemble the single SELECT composing filter, sort, skip, and limit.
fn build_select(
  collection: &str,
  filter: &Filter,
  sort: &SortSpec,
  limit: Option<u64>,
  skip: Option<u64>,
) -> Result<(String, Vec<SqlValue>)> {
  let mut sql = format!("SELECT _id, data FROM {}", quote_ident(collection));
  let mut params = Vec::new();

  if !matches!(filter, Filter::All) {
    let compiled = FilterCompiler::for_collection().compile(filter)?;
    sql.push_str(" WHERE ");
    sql.push_str(&compiled.sql);
    params.extend(compiled.params);
  }

  if !sort.is_empty() {
    sql.push_str(" ORDER BY ");
    for (i, (path, direction)) in sort.0.iter().enumerate() {
      if i > 0 {
        sql.push_str(", ");
      }
      if path == ID_FIELD {
        sql.push_str("_id");
      } else {
        sql.push_str(&extract_expr("data", path)?);
      }
      sql.push(' ');
      sql.push_str(direction.sql());
    }
  }

  match (limit, skip) {
    (Some(limit), Some(skip)) => {
      sql.push_str(" LIMIT ? OFFSET ?");
      params.push(SqlValue::Integer(limit as i64));
      params.push(SqlValue::Integer(skip as i64));
    }
    (Some(limit), None) => {
      sql.push_str(" LIMIT ?");
      params.push(SqlValue::Integer(limit as i64));
    }
    // Engine idiom: LIMIT -1 means unbounded, required before OFFSET.
    (None, Some(skip)) => {
      sql.push_str(" LIMIT -1 OFFSET ?");
      params.push(SqlValue::Integer(skip as i64));
    }
    (None, None) => {}
  }

  Ok((sql, params))
}
